//! The CSP solver driving thread-specific propagation.
//!
//! A [`Solver`] maintains the bounds of all integer variables of one solver
//! thread, the reverse map from order literals to the bound facts they
//! encode, and a watch graph from variables to constraint states. It reacts
//! to Boolean literal assignments by tightening bounds, and to bound changes
//! by queueing constraint states for propagation.

pub mod var_state;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::mem;

use index_vec::IndexVec;
use tracing::{debug, trace};

use crate::{
	config::{Config, Heuristic, SolverConfig},
	constraints::{ConRef, Constraint, ConstraintState},
	intervals::IntervalSet,
	num::{div_floor, midpoint, IntVal, SumVal},
	oracle::{Assignment, ClauseCreator, ClauseType, InitClauseCreator, Lit, TRUE_LIT},
	solver::var_state::{VarRef, VarState},
	stats::{SolverStatistics, Timer},
};

/// Map from constraint references to their (optional) thread-local states.
pub(crate) type StateVec = IndexVec<ConRef, Option<ConstraintState>>;

/// Map from constraint references to the (shared) constraint descriptions.
pub(crate) type ConstraintVec = IndexVec<ConRef, Option<Constraint>>;

#[derive(Clone, Debug, Default)]
/// Per decision level undo state.
struct Level {
	/// The associated decision level.
	level: u32,
	/// Variables whose lower bound was first tightened on this level.
	undo_lower: Vec<VarRef>,
	/// Variables whose upper bound was first tightened on this level.
	undo_upper: Vec<VarRef>,
	/// Constraint states that were marked inactive on this level.
	inactive: Vec<ConRef>,
	/// Watches removed from the watch table on this level, to be restored on
	/// undo.
	removed_watches: Vec<(VarRef, IntVal, ConRef)>,
}

impl Level {
	/// Create an empty record for the given decision level.
	fn new(level: u32) -> Self {
		Level {
			level,
			..Level::default()
		}
	}
}

#[derive(Clone, Debug)]
/// Thread-specific propagation state.
pub struct Solver {
	/// Solver configuration.
	config: SolverConfig,
	/// Solver statistics.
	stats: SolverStatistics,
	/// State of all integer variables.
	var_states: IndexVec<VarRef, VarState>,
	/// Thread-local constraint states, indexed like the constraint store.
	cstates: StateVec,
	/// Map from order literals to the `(var, value)` bound facts they encode.
	///
	/// If there is an order literal for `var <= value`, then the pair
	/// `(var, value)` is contained under that literal.
	litmap: HashMap<Lit, Vec<(VarRef, IntVal)>>,
	/// Map from reification literals to the constraints they reify.
	lit_watches: HashMap<Lit, Vec<ConRef>>,
	/// Watch table from variables to `(hint, constraint)` pairs.
	///
	/// The meaning of the hint depends on the kind of constraint; for linear
	/// constraints it is the coefficient of the variable.
	var_watches: IndexVec<VarRef, Vec<(IntVal, ConRef)>>,
	/// Stack of per decision level undo records.
	levels: Vec<Level>,
	/// Constraint states queued for propagation on the current level.
	todo: VecDeque<ConRef>,
	/// Accumulated lower bound changes since the last `check`.
	ldiff: IndexVec<VarRef, IntVal>,
	/// Variables with a non-zero entry in [`Self::ldiff`].
	in_ldiff: Vec<VarRef>,
	/// Accumulated upper bound changes since the last `check`.
	udiff: IndexVec<VarRef, IntVal>,
	/// Variables with a non-zero entry in [`Self::udiff`].
	in_udiff: Vec<VarRef>,
	/// Number of facts associated with the true/false literal that have been
	/// integrated on the top level.
	facts_integrated: (usize, usize),
	/// Offset to speed up `check_full`.
	lerp_last: usize,
	/// Offset into the oracle's trail to speed up `simplify`.
	trail_offset: usize,
	/// Current bound of the minimize constraint, if any.
	minimize_bound: Option<SumVal>,
	/// The minimize constraint might not have been fully propagated below
	/// this level. See [`Self::update_minimize`].
	minimize_level: u32,
}

impl Solver {
	/// Create a new solver with the given configuration.
	pub fn new(config: SolverConfig) -> Self {
		Solver {
			config,
			stats: SolverStatistics::default(),
			var_states: IndexVec::new(),
			cstates: IndexVec::new(),
			litmap: HashMap::new(),
			lit_watches: HashMap::new(),
			var_watches: IndexVec::new(),
			levels: vec![Level::new(0)],
			todo: VecDeque::new(),
			ldiff: IndexVec::new(),
			in_ldiff: Vec::new(),
			udiff: IndexVec::new(),
			in_udiff: Vec::new(),
			facts_integrated: (0, 0),
			lerp_last: 0,
			trail_offset: 0,
			minimize_bound: None,
			minimize_level: 0,
		}
	}

	/// The solver's configuration.
	pub fn config(&self) -> &SolverConfig {
		&self.config
	}

	/// The solver's statistics.
	pub fn stats(&self) -> &SolverStatistics {
		&self.stats
	}

	/// Mutable access to the solver's statistics.
	pub fn stats_mut(&mut self) -> &mut SolverStatistics {
		&mut self.stats
	}

	/// The current decision level the solver state corresponds to.
	pub(crate) fn level(&self) -> u32 {
		self.levels.last().expect("level stack is never empty").level
	}

	/// Add a new variable with the given initial bounds.
	pub fn add_variable(&mut self, min_int: IntVal, max_int: IntVal) -> VarRef {
		let var = self.var_states.next_idx();
		let _ = self.var_states.push(VarState::new(var, min_int, max_int));
		let _ = self.var_watches.push(Vec::new());
		let _ = self.ldiff.push(0);
		let _ = self.udiff.push(0);
		var
	}

	/// The number of variables known to the solver.
	pub fn num_variables(&self) -> usize {
		self.var_states.len()
	}

	/// Get the state of the given variable.
	pub fn var_state(&self, var: VarRef) -> &VarState {
		&self.var_states[var]
	}

	/// The value assigned to the given variable.
	///
	/// Should only be relied upon for total assignments, where the bounds
	/// have collapsed into a singleton.
	pub fn get_value(&self, var: VarRef) -> IntVal {
		self.var_states[var].lower_bound()
	}

	/// The lower bound of `var` as last seen by the watching constraint
	/// states, i.e. the current bound minus any not yet forwarded change.
	pub(crate) fn seen_lower_bound(&self, var: VarRef) -> IntVal {
		self.var_states[var].lower_bound() - self.ldiff[var]
	}

	/// The upper bound of `var` as last seen by the watching constraint
	/// states, i.e. the current bound minus any not yet forwarded change.
	pub(crate) fn seen_upper_bound(&self, var: VarRef) -> IntVal {
		self.var_states[var].upper_bound() - self.udiff[var]
	}

	/// The current bound of the minimize constraint, if any.
	pub fn minimize_bound(&self) -> Option<SumVal> {
		self.minimize_bound
	}

	/// Set the bound of the minimize constraint and request propagation from
	/// the given level on the next `check`.
	///
	/// Requesting propagation from `min(current, level)` ensures that bound
	/// tightenings after backtracking are respected even when the oracle does
	/// not re-propagate older levels.
	pub fn update_minimize(&mut self, con: ConRef, level: u32, bound: SumVal) {
		if self.minimize_bound.map_or(true, |b| bound < b) {
			self.minimize_bound = Some(bound);
			self.minimize_level = level;
			self.mark_todo(con);
		} else if level < self.minimize_level {
			self.minimize_level = level;
			self.mark_todo(con);
		}
	}

	/// Returns the literal associated with the fact `var <= value`.
	///
	/// The literal is created on demand; values outside the initial bounds
	/// map to the true/false literal without any allocation. Freshly created
	/// literals are negated for values at or above the configured sign value,
	/// biasing the oracle's default phase towards small magnitudes.
	pub fn get_literal(&mut self, cc: &mut dyn ClauseCreator, var: VarRef, value: IntVal) -> Lit {
		let vs = &self.var_states[var];
		if value < vs.min_bound() {
			return -TRUE_LIT;
		}
		if value >= vs.max_bound() {
			return TRUE_LIT;
		}
		if let Some(lit) = vs.get_literal(value) {
			return lit;
		}
		let mut lit = cc.add_literal();
		if value >= self.config.sign_value {
			lit = -lit;
		}
		trace!(lit, var = usize::from(var), value, "new order literal");
		self.var_states[var].set_literal(value, lit);
		self.litmap.entry(lit).or_default().push((var, value));
		cc.add_watch(lit);
		cc.add_watch(-lit);
		lit
	}

	/// Like [`Self::get_literal`], but may, on decision level 0 only, attach
	/// a known truth value to the fact `var <= value`.
	///
	/// If a non-fact literal already existed for the value, an equivalence is
	/// posted before it is replaced. Returns the (possibly true/false)
	/// literal together with a flag signalling conflict-free integration.
	pub fn update_literal(
		&mut self,
		cc: &mut dyn ClauseCreator,
		var: VarRef,
		value: IntVal,
		truth: Option<bool>,
	) -> (bool, Lit) {
		let Some(truth) = truth else {
			return (true, self.get_literal(cc, var, value));
		};
		if cc.assignment().decision_level() > 0 {
			return (true, self.get_literal(cc, var, value));
		}
		let lit = if truth { TRUE_LIT } else { -TRUE_LIT };
		let mut ret = true;
		let vs = &self.var_states[var];
		if value < vs.min_bound() {
			// the fact is already encoded by the false literal
			if lit != -TRUE_LIT {
				ret = cc.add_clause(&[-TRUE_LIT], ClauseType::Learnt);
			}
		} else if value >= vs.max_bound() {
			if lit != TRUE_LIT {
				ret = cc.add_clause(&[-TRUE_LIT], ClauseType::Learnt);
			}
		} else if let Some(old) = vs.get_literal(value) {
			if old != lit {
				self.remove_literal(var, old, value);
				self.var_states[var].set_literal(value, lit);
				self.litmap.entry(lit).or_default().push((var, value));
				ret = cc.add_clause(&[if truth { old } else { -old }], ClauseType::Learnt);
			}
		} else {
			self.var_states[var].set_literal(value, lit);
			self.litmap.entry(lit).or_default().push((var, value));
		}
		(ret, lit)
	}

	/// Remove the `(var, value)` pair associated with the given literal from
	/// the reverse map.
	fn remove_literal(&mut self, var: VarRef, lit: Lit, value: IntVal) {
		debug_assert!(lit != TRUE_LIT && lit != -TRUE_LIT);
		let entries = self
			.litmap
			.get_mut(&lit)
			.expect("literal missing from reverse map");
		let i = entries
			.iter()
			.position(|&(v, val)| v == var && val == value)
			.expect("bound fact missing from reverse map");
		let _ = entries.swap_remove(i);
		if entries.is_empty() {
			let _ = self.litmap.remove(&lit);
		}
	}

	/// Add a watch connecting the given variable to a constraint state.
	pub(crate) fn add_var_watch(&mut self, var: VarRef, i: IntVal, cs: ConRef) {
		self.var_watches[var].push((i, cs));
	}

	/// Remove a watch connecting the given variable to a constraint state.
	pub(crate) fn remove_var_watch(&mut self, var: VarRef, i: IntVal, cs: ConRef) {
		let watches = &mut self.var_watches[var];
		if let Some(idx) = watches.iter().position(|&w| w == (i, cs)) {
			let _ = watches.swap_remove(idx);
		}
	}

	/// Create the thread-local state for the given constraint and attach its
	/// watches, unless the state already exists.
	pub fn add_constraint(&mut self, con: ConRef, constraint: &Constraint) {
		if self.cstates.len() <= usize::from(con) {
			self.cstates.resize(usize::from(con) + 1, None);
		}
		if self.cstates[con].is_some() {
			return;
		}
		let state = ConstraintState::new(con, constraint, self);
		for (var, hint) in constraint.watches() {
			self.add_var_watch(var, hint, con);
		}
		self.lit_watches
			.entry(constraint.literal())
			.or_default()
			.push(con);
		self.cstates[con] = Some(state);
		self.mark_todo(con);
	}

	/// Remove the given constraint from the propagation state.
	pub fn remove_constraint(&mut self, con: ConRef, constraint: &Constraint) {
		for (var, hint) in constraint.watches() {
			self.remove_var_watch(var, hint, con);
		}
		if let Some(watched) = self.lit_watches.get_mut(&constraint.literal()) {
			if let Some(idx) = watched.iter().position(|&c| c == con) {
				let _ = watched.swap_remove(idx);
			}
		}
		for level in &mut self.levels {
			level.inactive.retain(|&c| c != con);
			level.removed_watches.retain(|&(_, _, c)| c != con);
		}
		if let Some(state) = self.cstates[con].take() {
			if state.in_todo {
				self.todo.retain(|&c| c != con);
			}
		}
	}

	/// Add the given constraint state to the todo list if it is not yet
	/// contained.
	pub(crate) fn mark_todo(&mut self, con: ConRef) {
		if let Some(state) = self.cstates[con].as_mut() {
			if !state.in_todo {
				state.in_todo = true;
				self.todo.push_back(con);
			}
		}
	}

	/// Record that the given constraint state became inactive on the current
	/// level.
	pub(crate) fn push_inactive(&mut self, con: ConRef) {
		self.levels
			.last_mut()
			.expect("level stack is never empty")
			.inactive
			.push(con);
	}

	/// Open a new decision level record if the given level is larger than the
	/// current one.
	fn push_level(&mut self, level: u32) {
		debug_assert!(!self.levels.is_empty());
		if self.level() < level {
			self.levels.push(Level::new(level));
		}
	}

	/// Propagates constraints and order literals.
	///
	/// Constraints whose reification literal became true are added to the
	/// todo list, and bounds of variables are adjusted according to the truth
	/// of order literals.
	pub fn propagate(&mut self, cc: &mut dyn ClauseCreator, changes: &[Lit]) -> bool {
		let timer = Timer::start();
		let level = cc.assignment().decision_level();
		self.push_level(level);
		debug!(level, ?changes, "propagate");

		let mut ret = true;
		for &lit in changes {
			if let Some(watched) = self.lit_watches.get(&lit).cloned() {
				for con in watched {
					self.mark_todo(con);
				}
			}
			if !self.update_domain(cc, lit) {
				ret = false;
				break;
			}
		}
		timer.stop(&mut self.stats.time_propagate);
		ret
	}

	/// If `lit` is an order literal, update the lower or upper bound of the
	/// associated variables and propagate adjacent order literals.
	fn update_domain(&mut self, cc: &mut dyn ClauseCreator, lit: Lit) -> bool {
		debug_assert!(cc.assignment().is_true(lit));
		let level = self.level();
		let decision_level = cc.assignment().decision_level();

		// update and propagate upper bounds: `lit` encodes `var <= value`
		let start = if lit == TRUE_LIT {
			self.facts_integrated.0
		} else {
			0
		};
		let mut i = start;
		while i < self.litmap.get(&lit).map_or(0, Vec::len) {
			let (var, value) = self.litmap[&lit][i];
			i += 1;
			if self.var_states[var].upper_bound() > value {
				let diff = value - self.var_states[var].upper_bound();
				if decision_level > 0 && !self.var_states[var].pushed_upper(level) {
					self.var_states[var].push_upper(level);
					self.levels
						.last_mut()
						.expect("level stack is never empty")
						.undo_upper
						.push(var);
				}
				self.var_states[var].set_upper_bound(value);
				if self.udiff[var] == 0 {
					self.in_udiff.push(var);
				}
				self.udiff[var] += diff;
			}

			// make the succeeding order literals true
			let succ: Vec<_> = self.var_states[var].lits_gt(value).collect();
			if !self.propagate_variables(cc, var, lit, &succ, 1) {
				return false;
			}
		}

		// update and propagate lower bounds: `-lit` encodes `var <= value`,
		// so `lit` being true means `var > value`
		let start = if lit == TRUE_LIT {
			self.facts_integrated.1
		} else {
			0
		};
		let mut i = start;
		while i < self.litmap.get(&-lit).map_or(0, Vec::len) {
			let (var, value) = self.litmap[&-lit][i];
			i += 1;
			if self.var_states[var].lower_bound() < value + 1 {
				let diff = value + 1 - self.var_states[var].lower_bound();
				if decision_level > 0 && !self.var_states[var].pushed_lower(level) {
					self.var_states[var].push_lower(level);
					self.levels
						.last_mut()
						.expect("level stack is never empty")
						.undo_lower
						.push(var);
				}
				self.var_states[var].set_lower_bound(value + 1);
				if self.ldiff[var] == 0 {
					self.in_ldiff.push(var);
				}
				self.ldiff[var] += diff;
			}

			// make the preceding order literals false
			let prev: Vec<_> = self.var_states[var].lits_lt(value).collect();
			if !self.propagate_variables(cc, var, lit, &prev, -1) {
				return false;
			}
		}

		true
	}

	/// Propagate the preceding or succeeding order literals of a bound fact.
	///
	/// The traversal direction is determined by `sign`: `1` makes succeeding
	/// literals true, `-1` makes preceding literals false. With chain
	/// propagation each implied literal becomes the new premise so that
	/// reasons stay short.
	fn propagate_variables(
		&mut self,
		cc: &mut dyn ClauseCreator,
		var: VarRef,
		mut reason_lit: Lit,
		consequences: &[(IntVal, Lit)],
		sign: Lit,
	) -> bool {
		for &(value, lit) in consequences {
			if cc.assignment().is_true(sign * lit) {
				break;
			}
			if !self.propagate_variable(cc, var, value, reason_lit, sign) {
				return false;
			}
			// Literals can only be updated on level 0 where the reason is
			// already guaranteed to be a fact.
			if self.config.propagate_chain && cc.assignment().decision_level() > 0 {
				reason_lit = sign * lit;
			}
		}
		true
	}

	/// Propagate a single adjacent order literal of `reason_lit`.
	///
	/// The target order literal is given by `(var, value)` and must exist.
	/// If the reason is a fact, the target literal is simplified to a fact as
	/// well.
	fn propagate_variable(
		&mut self,
		cc: &mut dyn ClauseCreator,
		var: VarRef,
		value: IntVal,
		reason_lit: Lit,
		sign: Lit,
	) -> bool {
		debug_assert!(cc.assignment().is_true(reason_lit));
		debug_assert!(self.var_states[var].has_literal(value));

		let lit = self.var_states[var]
			.get_literal(value)
			.expect("literal must exist");
		let mut con = sign * lit;

		// on-the-fly simplification of facts
		if cc.assignment().is_fixed(reason_lit) && !cc.assignment().is_fixed(con) {
			let (ret, lit) = self.update_literal(cc, var, value, Some(sign > 0));
			if !ret {
				return false;
			}
			con = sign * lit;
		}

		if !cc.assignment().is_true(con) && !cc.add_clause(&[-reason_lit, con], ClauseType::Learnt)
		{
			return false;
		}
		true
	}

	/// The number of order literals currently associated with the true and
	/// false literal.
	fn num_facts(&self) -> (usize, usize) {
		(
			self.litmap.get(&TRUE_LIT).map_or(0, Vec::len),
			self.litmap.get(&-TRUE_LIT).map_or(0, Vec::len),
		)
	}

	/// Apply the accumulated bound change of `var` to all watching constraint
	/// states, removing watches of constraints that became removable.
	fn update_constraints(&mut self, var: VarRef, diff: IntVal) {
		let level = self.level();
		let mut watches = mem::take(&mut self.var_watches[var]);
		watches.retain(|&(hint, con)| {
			let Some(state) = self.cstates[con].as_mut() else {
				return false;
			};
			if state.removable(level) {
				self.levels
					.last_mut()
					.expect("level stack is never empty")
					.removed_watches
					.push((var, hint, con));
				false
			} else {
				if state.update(hint, diff) {
					self.mark_todo(con);
				}
				true
			}
		});
		debug_assert!(self.var_watches[var].is_empty());
		self.var_watches[var] = watches;
	}

	/// Propagate facts that have not been integrated on the current level
	/// and all constraints gathered during `propagate`.
	pub fn check(
		&mut self,
		cc: &mut dyn ClauseCreator,
		constraints: &ConstraintVec,
		check_state: bool,
	) -> bool {
		let timer = Timer::start();
		let ret = self.check_(cc, constraints, check_state);
		timer.stop(&mut self.stats.time_check);
		ret
	}

	/// Implementation of [`Self::check`].
	fn check_(
		&mut self,
		cc: &mut dyn ClauseCreator,
		constraints: &ConstraintVec,
		check_state: bool,
	) -> bool {
		let decision_level = cc.assignment().decision_level();
		// Most of the time check only has to run for levels that have also
		// been propagated. The exception is if a minimize bound has to be
		// integrated when backtracking from a bound update.
		if decision_level != self.level() && self.level() >= self.minimize_level {
			return true;
		}

		loop {
			// integrate top-level facts
			if self.facts_integrated != self.num_facts() {
				debug_assert_eq!(decision_level, 0);
				if !self.update_domain(cc, TRUE_LIT) {
					return false;
				}
				self.facts_integrated = self.num_facts();
			}

			// forward the accumulated bound changes to the constraint states
			let in_udiff = mem::take(&mut self.in_udiff);
			for var in in_udiff {
				let diff = self.udiff[var];
				if diff != 0 {
					self.udiff[var] = 0;
					self.update_constraints(var, diff);
				}
			}
			let in_ldiff = mem::take(&mut self.in_ldiff);
			for var in in_ldiff {
				let diff = self.ldiff[var];
				if diff != 0 {
					self.ldiff[var] = 0;
					self.update_constraints(var, diff);
				}
			}

			let Some(con) = self.todo.pop_front() else {
				if self.facts_integrated == self.num_facts() {
					return true;
				}
				continue;
			};
			let Some(mut state) = self.cstates[con].take() else {
				continue;
			};
			state.in_todo = false;
			let constraint = constraints[con]
				.as_ref()
				.expect("constraint missing for queued state");
			let mut ret = true;
			if !cc.assignment().is_false(constraint.literal()) {
				ret = state.propagate(self, cc, constraint, check_state);
			} else if constraint.tagged_removable() && !state.marked_inactive() {
				state.mark_inactive(self.level());
				self.push_inactive(con);
			}
			debug_assert!(self.cstates[con].is_none());
			self.cstates[con] = Some(state);
			if !ret {
				return false;
			}
		}
	}

	/// Undo all decision level specific state.
	///
	/// This restores the bounds of variables and clears constraints that were
	/// not propagated on the current decision level. It is safe to call even
	/// when propagation aborted mid-conflict; the todo queue is always fully
	/// cleared.
	pub fn undo(&mut self) {
		let timer = Timer::start();
		debug_assert!(self.levels.len() > 1);
		let lvl = self.levels.pop().expect("level stack is never empty");
		trace!(level = lvl.level, "undo");

		for var in lvl.undo_lower {
			let vs = &mut self.var_states[var];
			let value = vs.lower_bound();
			vs.pop_lower();
			let diff = value - vs.lower_bound() - self.ldiff[var];
			if diff != 0 {
				for &(hint, con) in &self.var_watches[var] {
					if let Some(state) = self.cstates[con].as_mut() {
						state.undo(hint, diff);
					}
				}
			}
			self.ldiff[var] = 0;
		}
		for var in mem::take(&mut self.in_ldiff) {
			self.ldiff[var] = 0;
		}

		for var in lvl.undo_upper {
			let vs = &mut self.var_states[var];
			let value = vs.upper_bound();
			vs.pop_upper();
			let diff = value - vs.upper_bound() - self.udiff[var];
			if diff != 0 {
				for &(hint, con) in &self.var_watches[var] {
					if let Some(state) = self.cstates[con].as_mut() {
						state.undo(hint, diff);
					}
				}
			}
			self.udiff[var] = 0;
		}
		for var in mem::take(&mut self.in_udiff) {
			self.udiff[var] = 0;
		}

		for con in lvl.inactive {
			if let Some(state) = self.cstates[con].as_mut() {
				state.mark_active();
			}
		}

		for (var, hint, con) in lvl.removed_watches {
			self.var_watches[var].push((hint, con));
		}

		for con in mem::take(&mut self.todo) {
			if let Some(state) = self.cstates[con].as_mut() {
				state.in_todo = false;
			}
		}

		timer.stop(&mut self.stats.time_undo);
	}

	/// Select a variable that is not assigned under the current (total)
	/// Boolean assignment and introduce an order literal at the midpoint of
	/// its bounds, forcing the oracle to branch on it.
	///
	/// If all variables are assigned, the assignment is a model; with
	/// `check_solution` all constraints are verified against it.
	pub fn check_full(
		&mut self,
		cc: &mut dyn ClauseCreator,
		constraints: &ConstraintVec,
		check_solution: bool,
	) {
		let n = self.var_states.len();
		let mut split = false;
		for i in (self.lerp_last..n).chain(0..self.lerp_last) {
			let (assigned, lb, ub) = {
				let vs = &self.var_states[VarRef::new(i)];
				(vs.is_assigned(), vs.lower_bound(), vs.upper_bound())
			};
			if !assigned {
				self.lerp_last = i;
				let _ = self.get_literal(cc, VarRef::new(i), midpoint(lb, ub));
				split = true;
				if !self.config.split_all {
					return;
				}
			}
		}
		if split {
			return;
		}

		if check_solution {
			for (con, constraint) in constraints.iter_enumerated() {
				let Some(constraint) = constraint else {
					continue;
				};
				if cc.assignment().is_true(constraint.literal()) {
					if let Some(state) = self.cstates.get(con).and_then(Option::as_ref) {
						debug_assert!(state.check_full(self, constraint));
					}
				}
			}
		}
	}

	/// Integrate a constraint of the form `clit <-> co * var <= rhs` without
	/// creating a constraint object, by directly binding the corresponding
	/// order literal of `var`.
	///
	/// The strict case is handled explicitly to avoid introducing unnecessary
	/// literals. For non-strict constraints only the implication from `clit`
	/// is posted.
	pub fn add_simple(
		&mut self,
		cc: &mut dyn ClauseCreator,
		clit: Lit,
		co: IntVal,
		var: VarRef,
		rhs: IntVal,
		strict: bool,
	) -> bool {
		// the constraint is never propagated
		if !strict && cc.assignment().is_false(clit) {
			return true;
		}

		let (truth, value) = if co > 0 {
			(
				cc.assignment().value(clit),
				div_floor(rhs as SumVal, co as SumVal),
			)
		} else {
			(
				cc.assignment().value(-clit),
				-div_floor(rhs as SumVal, -co as SumVal) - 1,
			)
		};
		let value = value as IntVal;

		let vs = &self.var_states[var];
		if strict
			&& vs.min_bound() <= value
			&& value < vs.max_bound()
			&& !vs.has_literal(value)
		{
			// use the constraint literal itself as order literal
			let mut lit = clit;
			if co < 0 {
				lit = -lit;
			}
			let lit = match truth {
				None => {
					cc.add_watch(lit);
					cc.add_watch(-lit);
					lit
				}
				Some(true) => TRUE_LIT,
				Some(false) => -TRUE_LIT,
			};
			self.var_states[var].set_literal(value, lit);
			self.litmap.entry(lit).or_default().push((var, value));
			return true;
		}

		// otherwise bind the (possibly fresh) order literal to the
		// constraint literal
		let (ret, mut lit) = self.update_literal(cc, var, value, truth);
		if !ret {
			return false;
		}
		if co < 0 {
			lit = -lit;
		}
		if !cc.add_clause(&[-clit, lit], ClauseType::Learnt) {
			return false;
		}
		if strict && !cc.add_clause(&[-lit, clit], ClauseType::Learnt) {
			return false;
		}
		true
	}

	/// Integrate the given domain for the variable as a conjunction of
	/// order-literal implications.
	///
	/// Consider `var` in `{[1,3), [4,6), [7,9)}`. This adds the binary
	/// constraints
	/// - right to left: `true -> var < 9`, `var < 7 -> var < 6`,
	///   `var < 4 -> var < 3`, and
	/// - left to right: `true -> var >= 1`, `var >= 3 -> var >= 4`,
	///   `var >= 6 -> var >= 7`,
	/// all guarded by `literal`.
	pub fn add_dom(
		&mut self,
		cc: &mut dyn ClauseCreator,
		mut literal: Lit,
		var: VarRef,
		domain: &IntervalSet,
	) -> bool {
		if cc.assignment().is_false(literal) {
			return true;
		}
		if cc.assignment().is_true(literal) {
			literal = TRUE_LIT;
		}

		let intervals: Vec<_> = domain.iter().collect();

		let mut py: Option<IntVal> = None;
		for &(x, y) in &intervals {
			let ly = match py {
				None => TRUE_LIT,
				Some(py) => -self.get_literal(cc, var, py - 1),
			};
			let fact = literal == TRUE_LIT && cc.assignment().is_true(ly);
			let (ret, lx) =
				self.update_literal(cc, var, x - 1, if fact { Some(false) } else { None });
			if !ret || !cc.add_clause(&[-literal, -ly, -lx], ClauseType::Learnt) {
				return false;
			}
			py = Some(y);
		}

		let mut px: Option<IntVal> = None;
		for &(x, y) in intervals.iter().rev() {
			let ly = match px {
				None => TRUE_LIT,
				Some(px) => self.get_literal(cc, var, px - 1),
			};
			let fact = literal == TRUE_LIT && cc.assignment().is_true(ly);
			let (ret, lx) = self.update_literal(cc, var, y - 1, fact.then_some(true));
			if !ret || !cc.add_clause(&[-literal, -ly, lx], ClauseType::Learnt) {
				return false;
			}
			px = Some(x);
		}

		true
	}

	/// Simplify the state using fixed literals in the trail and the enqueued
	/// constraints in the todo list.
	///
	/// This assumes that newly added constraints have been enqueued before.
	pub fn simplify(
		&mut self,
		cc: &mut dyn ClauseCreator,
		constraints: &ConstraintVec,
		check_state: bool,
	) -> bool {
		// The initial propagation below will not introduce any order
		// literals other than true or false.
		loop {
			if !cc.propagate() {
				return false;
			}

			let trail_offset = cc.assignment().trail().len();
			if self.trail_offset == trail_offset && self.todo.is_empty() {
				return true;
			}

			let changes: Vec<Lit> = cc.assignment().trail()[self.trail_offset..trail_offset]
				.to_vec();
			if !self.propagate(cc, &changes) {
				return false;
			}
			self.trail_offset = trail_offset;

			if !self.check(cc, constraints, check_state) {
				return false;
			}
		}
	}

	/// Translate constraints into simpler oracle constructs where the clause
	/// budget allows it.
	///
	/// Translated constraints are detached from the propagation state and
	/// tombstoned in the constraint store. Returns `false` on conflict.
	pub fn translate(
		&mut self,
		cc: &mut InitClauseCreator<'_>,
		constraints: &mut ConstraintVec,
		config: &Config,
	) -> bool {
		let mut queue: Vec<(Lit, ConRef)> = constraints
			.iter_enumerated()
			.filter_map(|(con, c)| c.as_ref().map(|c| (c.literal(), con)))
			.collect();
		queue.sort_unstable();

		let mut added = Vec::new();
		for (_, con) in queue {
			let budget_left = cc.translate_clause_budget(config);
			let Some(mut state) = self.cstates.get_mut(con).and_then(Option::take) else {
				continue;
			};
			let constraint = constraints[con]
				.as_ref()
				.expect("constraint missing for translated state");
			let (ok, remove) = state.translate(self, cc, config, constraint, budget_left, &mut added);
			self.cstates[con] = Some(state);
			if !ok {
				return false;
			}
			if remove {
				let constraint = constraints[con]
					.take()
					.expect("constraint missing for translated state");
				self.remove_constraint(con, &constraint);
				cc.stats_mut().translate_removed += 1;
			}
		}

		// register and translate the constraints introduced during translation
		while let Some(constraint) = added.pop() {
			let con = constraints.push(Some(constraint));
			{
				let constraint = constraints[con].as_ref().expect("constraint just added");
				self.add_constraint(con, constraint);
			}
			cc.stats_mut().num_constraints += 1;
			cc.stats_mut().translate_added += 1;

			let budget_left = cc.translate_clause_budget(config);
			let Some(mut state) = self.cstates.get_mut(con).and_then(Option::take) else {
				continue;
			};
			let constraint = constraints[con].as_ref().expect("constraint just added");
			let (ok, remove) = state.translate(self, cc, config, constraint, budget_left, &mut added);
			self.cstates[con] = Some(state);
			if !ok {
				return false;
			}
			if remove {
				let constraint = constraints[con].take().expect("constraint just added");
				self.remove_constraint(con, &constraint);
				cc.stats_mut().translate_removed += 1;
			}
		}
		cc.commit()
	}

	/// Reset the state for a new solve step.
	///
	/// Order literals local to the previous step are removed, literals that
	/// became facts are mapped onto the true/false literal, and the minimize
	/// bound is reset.
	pub fn update(&mut self, cc: &mut dyn ClauseCreator) {
		self.minimize_bound = None;
		self.minimize_level = 0;
		self.trail_offset = 0;

		let mut remove_invalid = Vec::new();
		let mut remove_fixed = Vec::new();
		for (&lit, entries) in &self.litmap {
			if lit.abs() == TRUE_LIT {
				continue;
			}
			if !cc.assignment().has_literal(lit) {
				remove_invalid.push((lit, entries.clone()));
			} else if cc.assignment().is_fixed(lit) {
				remove_fixed.push((lit, entries.clone()));
			}
		}

		// remove solve step local literals
		for (lit, entries) in remove_invalid {
			for (var, value) in entries {
				self.var_states[var].unset_literal(value);
			}
			let _ = self.litmap.remove(&lit);
		}

		// Map bounds associated with top-level facts to the true/false
		// literal. Since it is unknown whether the facts have been
		// propagated, they are appended without touching the counts of
		// integrated facts.
		remove_fixed.sort_unstable_by_key(|&(lit, _)| lit);
		for (old, entries) in remove_fixed {
			let lit = if cc.assignment().is_true(old) {
				TRUE_LIT
			} else {
				-TRUE_LIT
			};
			for (var, value) in entries {
				self.litmap.entry(lit).or_default().push((var, value));
				self.var_states[var].set_literal(value, lit);
			}
			let _ = self.litmap.remove(&old);
		}
	}

	/// Remove the `(var, value)` pairs associated with a fact literal that
	/// match the given predicate.
	fn cleanup_literals_(
		&mut self,
		cc: &mut dyn ClauseCreator,
		lit: Lit,
		pred: impl Fn(&VarState, IntVal) -> bool,
	) -> bool {
		debug_assert!(lit == TRUE_LIT || lit == -TRUE_LIT);
		let Some(mut entries) = self.litmap.remove(&lit) else {
			return true;
		};

		// adjust the number of facts that have been integrated
		let integrated = if lit == TRUE_LIT {
			&mut self.facts_integrated.0
		} else {
			&mut self.facts_integrated.1
		};
		let count = entries
			.iter()
			.take(*integrated)
			.filter(|&&(var, value)| pred(&self.var_states[var], value))
			.count();
		*integrated -= count;

		// remove the matching pairs
		let mut removed = Vec::new();
		entries.retain(|&(var, value)| {
			if pred(&self.var_states[var], value) {
				removed.push((var, value));
				false
			} else {
				true
			}
		});
		if !entries.is_empty() {
			let _ = self.litmap.insert(lit, entries);
		}

		for (var, value) in removed {
			let old = self.var_states[var]
				.get_literal(value)
				.expect("literal must exist");
			if old != lit {
				// This cannot be triggered if propagation works correctly
				// because facts can only be propagated on level 0. To be on
				// the safe side in view of theory extensions, the old literal
				// is made equal to lit before removal.
				if !cc.add_clause(&[-lit, old], ClauseType::Static)
					|| !cc.add_clause(&[-old, lit], ClauseType::Static)
				{
					return false;
				}
				self.remove_literal(var, old, value);
			}
			self.var_states[var].unset_literal(value);
		}

		true
	}

	/// Remove all order literals associated with facts that are above the
	/// current upper or below the current lower bound of their variable.
	pub fn cleanup_literals(&mut self, cc: &mut dyn ClauseCreator) -> bool {
		// make sure that all top level literals are assigned to a fact literal
		self.update(cc);

		self.cleanup_literals_(cc, TRUE_LIT, |vs, value| value != vs.upper_bound())
			&& self.cleanup_literals_(cc, -TRUE_LIT, |vs, value| value != vs.lower_bound() - 1)
	}

	/// Integrate the lower and upper bounds from the given solver state.
	///
	/// This might add clauses to fix literals that have to be updated, which
	/// can lead to a conflict if the states have conflicting bounds.
	/// [`Self::update`] should be called on `other` before this function to
	/// really integrate all bounds.
	pub fn update_bounds(&mut self, cc: &mut dyn ClauseCreator, other: &Solver) -> bool {
		// update upper bounds
		for &(var, _) in other.litmap.get(&TRUE_LIT).into_iter().flatten() {
			let ub = other.var_states[var].upper_bound();
			if ub < self.var_states[var].upper_bound() {
				let (ret, _) = self.update_literal(cc, var, ub, Some(true));
				if !ret {
					return false;
				}
			}
		}

		// update lower bounds
		for &(var, _) in other.litmap.get(&-TRUE_LIT).into_iter().flatten() {
			let lb = other.var_states[var].lower_bound();
			if self.var_states[var].lower_bound() < lb {
				let (ret, _) = self.update_literal(cc, var, lb - 1, Some(false));
				if !ret {
					return false;
				}
			}
		}

		self.update_domain(cc, TRUE_LIT)
	}

	/// Copy the state of the master solver into this worker.
	///
	/// This must only be called on the top level, before search starts.
	pub fn copy_state(&mut self, master: &Solver) {
		debug_assert!(self.levels.len() == 1 && master.levels.len() == 1);
		self.var_states = master.var_states.clone();
		self.cstates = master.cstates.clone();
		self.litmap = master.litmap.clone();
		self.lit_watches = master.lit_watches.clone();
		self.var_watches = master.var_watches.clone();
		self.levels = master.levels.clone();
		self.todo = master.todo.clone();
		self.ldiff = master.ldiff.clone();
		self.in_ldiff = master.in_ldiff.clone();
		self.udiff = master.udiff.clone();
		self.in_udiff = master.in_udiff.clone();
		self.facts_integrated = master.facts_integrated;
		self.lerp_last = master.lerp_last;
		self.trail_offset = master.trail_offset;
		self.minimize_bound = None;
		self.minimize_level = 0;
	}

	/// Select a literal for the oracle to branch on according to the
	/// configured heuristic, or return the fallback.
	pub fn decide(&self, ass: &dyn Assignment, fallback: Lit) -> Lit {
		match self.config.heuristic {
			Heuristic::None => fallback,
			Heuristic::MaxChain => {
				let mut widest: Option<(&VarState, IntVal)> = None;
				for vs in &self.var_states {
					let width = vs.upper_bound() - vs.lower_bound();
					if width > 0 && widest.as_ref().map_or(true, |&(_, w)| width > w) {
						widest = Some((vs, width));
					}
				}
				let Some((vs, _)) = widest else {
					return fallback;
				};
				let target = midpoint(vs.lower_bound(), vs.upper_bound());
				let mut best: Option<(IntVal, Lit)> = None;
				for (value, lit) in vs.lits() {
					if ass.value(lit).is_some() {
						continue;
					}
					let dist = (value - target).abs();
					if best.map_or(true, |(d, _)| dist < d) {
						best = Some((dist, lit));
					}
				}
				best.map_or(fallback, |(_, lit)| lit)
			}
		}
	}
}
