//! The theory propagator gluing the CSP core to the Boolean oracle.
//!
//! The [`Propagator`] owns the configuration, the constraint store, and one
//! [`Solver`] per oracle thread. It dispatches the oracle's `init`,
//! `propagate`, `check`, `undo`, and `decide` callbacks to the thread's
//! solver, extracts models, and maintains the bound of the minimize
//! constraint shared between all threads.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::mem;
use std::sync::atomic::{AtomicI64, Ordering};

use itertools::Itertools;
use thiserror::Error;
use tracing::debug;

use crate::{
	config::Config,
	constraints::{
		distinct::DistinctConstraint, dom::DomConstraint, minimize::MinimizeConstraint,
		sum::SumConstraint, ConRef, Constraint,
	},
	intervals::IntervalSet,
	num::{check_valid_wide, ArithError, CheckedArith, IntVal, SumVal, WideVal},
	oracle::{
		ClauseCreator, ClauseType, ControlClauseCreator, InitClauseCreator, InitState, Lit,
		PropagateControl, PropagateInit, TRUE_LIT,
	},
	parsing::{
		parse, simplify, AbstractConstraintBuilder, CoVarVec, ParseError, Symbol, TheoryAtom,
	},
	solver::{var_state::VarRef, ConstraintVec, Solver},
	stats::{Statistics, Timer},
	Assignment,
};

/// Value of the shared minimize bound when no model has been found yet.
///
/// Since this is the largest value the objective can take, all models found
/// will have a value less than or equal to it.
const NO_BOUND: SumVal = SumVal::MAX;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
/// Error raised while initializing the propagator.
pub enum InitError {
	/// A theory atom did not match the declared grammar.
	#[error(transparent)]
	Parse(#[from] ParseError),
	/// An arithmetic operation left the supported value range.
	#[error(transparent)]
	Arith(#[from] ArithError),
	/// The requested configuration cannot be honored.
	#[error("configuration error: {0}")]
	Config(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// The symbols extending a model, reported by [`Propagator::on_model`].
pub struct ModelExtension {
	/// A `csp(name, value)` symbol for every shown variable.
	pub symbols: Vec<Symbol>,
	/// The objective value, if a minimize constraint exists.
	pub cost: Option<SumVal>,
}

/// A non-linear constraint collected during parsing, materialized once the
/// variable bounds are known.
#[derive(Clone, Debug, PartialEq, Eq)]
struct PendingNonlinear {
	/// The reification literal.
	lit: Lit,
	/// The coefficient of the product term.
	co_ab: IntVal,
	/// The first factor.
	va: VarRef,
	/// The second factor.
	vb: VarRef,
	/// The coefficient of the linear term.
	co_c: IntVal,
	/// The variable of the linear term.
	vc: Option<VarRef>,
	/// The right-hand side.
	rhs: IntVal,
	/// Whether both implication directions are requested.
	strict: bool,
}

#[derive(Debug)]
/// A propagator for CSP constraints.
pub struct Propagator {
	/// Global configuration.
	config: Config,
	/// The constraint store; tombstones mark removed constraints.
	constraints: ConstraintVec,
	/// One solver per oracle thread; index 0 is the master.
	solvers: Vec<Solver>,
	/// Map from symbols to variable indices.
	sym_map: HashMap<Symbol, VarRef>,
	/// Map from variable indices to symbols.
	var_map: BTreeMap<VarRef, Symbol>,
	/// Statistics of the current solve step.
	stats_step: Statistics,
	/// Statistics accumulated over all solve steps.
	stats_accu: Statistics,
	/// Variables to show.
	show_variable: HashSet<VarRef>,
	/// Signatures to show.
	show_signature: HashSet<(String, usize)>,
	/// Number of symbols already matched against the show signatures.
	show_offset: usize,
	/// Whether a show statement was seen; without one all variables are
	/// shown.
	show: bool,
	/// The minimize constraint, if any.
	minimize: Option<ConRef>,
	/// Whether the minimize constraint has been translated in an earlier
	/// step.
	translated_minimize: bool,
	/// The best objective bound over all threads.
	///
	/// Threads only read the bound during propagation; the single writer is
	/// the thread reporting a model, which is serialized by the oracle.
	minimize_bound: AtomicI64,
}

impl Propagator {
	/// Create a new propagator with the given configuration.
	pub fn new(config: Config) -> Self {
		Propagator {
			config,
			constraints: ConstraintVec::new(),
			solvers: Vec::new(),
			sym_map: HashMap::new(),
			var_map: BTreeMap::new(),
			stats_step: Statistics::default(),
			stats_accu: Statistics::default(),
			show_variable: HashSet::new(),
			show_signature: HashSet::new(),
			show_offset: 0,
			show: false,
			minimize: None,
			translated_minimize: false,
			minimize_bound: AtomicI64::new(NO_BOUND),
		}
	}

	/// The propagator's configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Mutable access to the configuration.
	///
	/// The configuration should not be changed once `init` has been called.
	pub fn config_mut(&mut self) -> &mut Config {
		&mut self.config
	}

	/// Statistics of the current solve step.
	pub fn statistics(&self) -> &Statistics {
		&self.stats_step
	}

	/// The solver state of the given thread.
	pub fn solver(&self, thread_id: u32) -> &Solver {
		&self.solvers[thread_id as usize]
	}

	/// The constraint store.
	pub(crate) fn constraint_store(&self) -> &ConstraintVec {
		&self.constraints
	}

	/// Get the master solver, creating it on first use.
	///
	/// This means that the configuration should be adjusted before any
	/// variables or constraints are added.
	fn master(&mut self) -> &mut Solver {
		if self.solvers.is_empty() {
			self.solvers
				.push(Solver::new(*self.config.solver_config(0)));
		}
		&mut self.solvers[0]
	}

	/// Add a variable for the given symbol, reusing the existing index if
	/// the symbol is already known.
	pub fn add_variable(&mut self, sym: Symbol) -> VarRef {
		if let Some(&var) = self.sym_map.get(&sym) {
			return var;
		}
		let (min_int, max_int) = (self.config.min_int, self.config.max_int);
		let var = self.master().add_variable(min_int, max_int);
		let _ = self.sym_map.insert(sym.clone(), var);
		let _ = self.var_map.insert(var, sym);
		var
	}

	/// The number of named variables.
	pub fn num_variables(&self) -> usize {
		self.var_map.len()
	}

	/// Get the variable associated with the given symbol.
	pub fn get_index(&self, sym: &Symbol) -> Option<VarRef> {
		self.sym_map.get(sym).copied()
	}

	/// Get the symbol associated with the given variable.
	pub fn get_symbol(&self, var: VarRef) -> Option<&Symbol> {
		self.var_map.get(&var)
	}

	/// The map from variable indices to symbols.
	pub fn var_map(&self) -> &BTreeMap<VarRef, Symbol> {
		&self.var_map
	}

	/// Enable the show statement; only explicitly shown variables are
	/// reported in models afterwards.
	pub fn show(&mut self) {
		self.show = true;
	}

	/// Show the given variable.
	pub fn show_variable(&mut self, var: VarRef) {
		let _ = self.show_variable.insert(var);
	}

	/// Show variables with the given signature.
	pub fn show_signature(&mut self, name: &str, arity: usize) {
		if self.show_signature.insert((name.to_owned(), arity)) {
			self.show_offset = 0;
		}
	}

	/// Determine whether the given variable should be shown.
	pub fn shown(&mut self, var: VarRef) -> bool {
		if !self.show {
			return true;
		}
		if self.var_map.len() > self.show_offset {
			for (&var, sym) in &self.var_map {
				if let Some(name) = sym.name() {
					if self
						.show_signature
						.contains(&(name.to_owned(), sym.arity()))
					{
						let _ = self.show_variable.insert(var);
					}
				}
			}
			self.show_offset = self.var_map.len();
		}
		self.show_variable.contains(&var)
	}

	/// Add a constraint to the store and attach it to the master solver.
	pub fn add_constraint(&mut self, constraint: Constraint) -> ConRef {
		let _ = self.master();
		let con = self.constraints.push(Some(constraint));
		let (solvers, constraints) = (&mut self.solvers, &self.constraints);
		if let Some(c) = &constraints[con] {
			solvers[0].add_constraint(con, c);
		}
		con
	}

	/// Integrate a constraint representable by a single order literal.
	pub fn add_simple(
		&mut self,
		cc: &mut dyn ClauseCreator,
		clit: Lit,
		co: IntVal,
		var: VarRef,
		rhs: IntVal,
		strict: bool,
	) -> bool {
		self.master().add_simple(cc, clit, co, var, rhs, strict)
	}

	/// Check if the propagator has a minimize constraint.
	pub fn has_minimize(&self) -> bool {
		self.minimize.is_some()
	}

	/// Get the propagator's minimize constraint, if any.
	pub fn get_minimize(&self) -> Option<&MinimizeConstraint> {
		let con = self.minimize?;
		match &self.constraints[con] {
			Some(Constraint::Minimize(m)) => Some(m),
			_ => None,
		}
	}

	/// Evaluate the minimize constraint w.r.t. the given thread.
	///
	/// Should only be called on total assignments.
	pub fn get_minimize_value(&self, thread_id: u32) -> SumVal {
		let minimize = self
			.get_minimize()
			.expect("no minimize constraint present");
		minimize.evaluate(&self.solvers[thread_id as usize])
	}

	/// Set the shared bound of the minimize constraint.
	pub fn update_minimize(&self, bound: SumVal) {
		self.minimize_bound.store(bound, Ordering::Relaxed);
	}

	/// Remove the minimize constraint from the store and the master solver.
	fn remove_minimize(&mut self) -> Option<MinimizeConstraint> {
		let con = self.minimize.take()?;
		let constraint = self.constraints[con]
			.take()
			.expect("minimize constraint missing from store");
		if let Some(master) = self.solvers.first_mut() {
			master.remove_constraint(con, &constraint);
		}
		let Constraint::Minimize(minimize) = constraint else {
			unreachable!("minimize reference points at non-minimize constraint")
		};
		Some(minimize)
	}

	/// Initialize the propagator, extracting constraints from the given
	/// theory atoms.
	///
	/// The function handles reinitialization for multi-shot and
	/// multi-threaded solving. A conflict detected during initialization is
	/// left to the oracle and is not an error.
	pub fn init(
		&mut self,
		init: &mut dyn PropagateInit,
		theory_atoms: &[TheoryAtom],
	) -> Result<(), InitError> {
		let timer = Timer::start();
		let mut stats = mem::take(&mut self.stats_step);
		let result = self.init_(init, theory_atoms, &mut stats);
		timer.stop(&mut stats.time_init);
		self.stats_step = stats;
		result
	}

	/// Implementation of [`Self::init`].
	fn init_(
		&mut self,
		init: &mut dyn PropagateInit,
		theory_atoms: &[TheoryAtom],
		stats: &mut Statistics,
	) -> Result<(), InitError> {
		let _ = self.master();
		let mut cc = InitClauseCreator::new(init, stats);

		// remove the minimize constraint of the previous step
		let minimize = self.remove_minimize();

		// remove solve step local and fixed literals
		for solver in &mut self.solvers {
			solver.update(&mut cc);
		}

		// add constraints
		let mut builder = ConstraintBuilder {
			propagator: &mut *self,
			cc: &mut cc,
			minimize_elems: CoVarVec::new(),
			nonlinear: Vec::new(),
		};
		if !parse(&mut builder, theory_atoms)? {
			return Ok(());
		}
		let minimize_elems = mem::take(&mut builder.minimize_elems);
		let nonlinear = mem::take(&mut builder.nonlinear);

		// gather bounds of the worker states in the master
		if self.solvers.len() > 1 {
			let (master, workers) = self.solvers.split_at_mut(1);
			for worker in workers.iter() {
				if !master[0].update_bounds(&mut cc, worker) {
					return Ok(());
				}
			}
		}

		// propagate the newly added constraints
		if !self.simplify_(&mut cc)? {
			return Ok(());
		}

		// materialize non-linear constraints now that bounds are known, and
		// propagate what they added
		if !nonlinear.is_empty() {
			if !self.integrate_nonlinear(&mut cc, nonlinear)? {
				return Ok(());
			}
			if !self.simplify_(&mut cc)? {
				return Ok(());
			}
		}

		// remove unnecessary literals after simplification
		if !self.solvers[0].cleanup_literals(&mut cc) {
			return Ok(());
		}

		// translate (simple enough) constraints
		let minimize = prepare_minimize(minimize_elems, minimize, self.config.sort_constraints)?;
		if !self.translate_(&mut cc, minimize)? {
			return Ok(());
		}

		// copy order literals from the master to the worker states
		let threads = cc.num_threads();
		while self.solvers.len() < threads {
			let config = *self.config.solver_config(self.solvers.len());
			self.solvers.push(Solver::new(config));
		}
		self.solvers.truncate(threads.max(1));
		let (master, workers) = self.solvers.split_at_mut(1);
		for worker in workers {
			worker.copy_state(&master[0]);
		}

		// watch all the remaining constraints
		for constraint in self.constraints.iter().flatten() {
			cc.add_watch(constraint.literal());
		}

		let _ = cc.commit();
		Ok(())
	}

	/// Run init-time simplification on the master state, measuring the time
	/// spent.
	fn simplify_(&mut self, cc: &mut InitClauseCreator<'_>) -> Result<bool, InitError> {
		let timer = Timer::start();
		let check_state = self.config.check_state;
		let (solvers, constraints) = (&mut self.solvers, &self.constraints);
		let ok = solvers[0].simplify(cc, constraints, check_state);
		timer.stop(&mut cc.stats_mut().time_simplify);
		// propagation during initialization is not attributed to the search
		solvers[0].stats_mut().time_propagate = 0.0;
		solvers[0].stats_mut().time_check = 0.0;
		Ok(ok)
	}

	/// Translate constraints and take care of the minimize constraint.
	fn translate_(
		&mut self,
		cc: &mut InitClauseCreator<'_>,
		minimize: Option<MinimizeConstraint>,
	) -> Result<bool, InitError> {
		let timer = Timer::start();

		// The minimize constraint is added after simplification to avoid
		// propagating its tagged clauses.
		if let Some(minimize) = minimize {
			if self.translated_minimize && !self.config.translate_minimize {
				return Err(InitError::Config(
					"translation of minimize constraints is disabled but was enabled before"
						.to_owned(),
				));
			}
			let con = self.add_constraint(Constraint::Minimize(minimize));
			self.minimize = Some(con);
			cc.stats_mut().num_constraints += 1;
		}

		cc.set_state(InitState::Translate);
		let config = self.config.clone();
		let (solvers, constraints) = (&mut self.solvers, &mut self.constraints);
		let ok = solvers[0].translate(cc, constraints, &config);
		if !ok {
			timer.stop(&mut cc.stats_mut().time_translate);
			return Ok(false);
		}

		if self.config.translate_minimize && self.minimize.is_some() {
			self.translate_minimize(cc)?;
			self.translated_minimize = true;
		}
		cc.set_state(InitState::Init);

		timer.stop(&mut cc.stats_mut().time_translate);
		Ok(true)
	}

	/// Translate the minimize constraint into oracle minimize literals over
	/// the order encoding and remove it from the propagation state.
	fn translate_minimize(
		&mut self,
		cc: &mut InitClauseCreator<'_>,
	) -> Result<(), InitError> {
		let minimize = self
			.remove_minimize()
			.expect("translate_minimize requires a minimize constraint");

		// the objective in terms of order literals:
		// `x = lb + Σ_{v in [lb, ub)} ¬(x <= v)`
		let mut offset = -(minimize.adjust() as SumVal);
		let footprint: u64 = minimize
			.elements()
			.iter()
			.map(|&(_, var)| {
				let vs = self.solvers[0].var_state(var);
				(vs.upper_bound() - vs.lower_bound()) as u64
			})
			.sum();
		if footprint > self.config.clause_limit as u64 {
			return Err(InitError::Config(
				"minimize constraint too large to translate".to_owned(),
			));
		}

		for &(co, var) in minimize.elements() {
			let (lb, ub) = {
				let vs = self.solvers[0].var_state(var);
				(vs.lower_bound(), vs.upper_bound())
			};
			if co > 0 {
				offset += co as SumVal * lb as SumVal;
				for value in lb..ub {
					let lit = self.solvers[0].get_literal(cc, var, value);
					cc.add_minimize(-lit, co, 0);
				}
			} else {
				offset += co as SumVal * ub as SumVal;
				for value in lb..ub {
					let lit = self.solvers[0].get_literal(cc, var, value);
					cc.add_minimize(lit, co.safe_inv()?, 0);
				}
			}
		}
		if offset != 0 {
			let offset = IntVal::try_from(offset).map_err(|_| {
				InitError::Config("minimize offset exceeds the value range".to_owned())
			})?;
			cc.add_minimize(TRUE_LIT, offset, 0);
		}
		Ok(())
	}

	/// Materialize the collected non-linear constraints.
	///
	/// The product of the two factors is represented by an auxiliary
	/// variable, linked to its factors by case-splitting on the factor with
	/// the smaller range; the atom itself becomes a linear constraint over
	/// the auxiliary variable.
	fn integrate_nonlinear(
		&mut self,
		cc: &mut InitClauseCreator<'_>,
		pending: Vec<PendingNonlinear>,
	) -> Result<bool, InitError> {
		let sort = self.config.sort_constraints;
		let clause_limit = self.config.clause_limit;
		for p in pending {
			if !p.strict && cc.assignment().is_false(p.lit) {
				continue;
			}
			debug_assert!(p.vc.is_some() || p.co_c == 0);

			let bounds = |solver: &Solver, var: VarRef| {
				let vs = solver.var_state(var);
				(vs.lower_bound(), vs.upper_bound())
			};
			let (la, ua) = bounds(&self.solvers[0], p.va);
			let (lb, ub) = bounds(&self.solvers[0], p.vb);

			// bounds of the product, in wide arithmetic
			let products = [
				la as WideVal * lb as WideVal,
				la as WideVal * ub as WideVal,
				ua as WideVal * lb as WideVal,
				ua as WideVal * ub as WideVal,
			];
			let wmin = check_valid_wide(*products.iter().min().expect("non-empty"))?;
			let wmax = check_valid_wide(*products.iter().max().expect("non-empty"))?;
			let w = self.master().add_variable(wmin, wmax);

			// case split over the factor with the smaller range
			let (s, s_lb, s_ub, other) = if ua - la <= ub - lb {
				(p.va, la, ua, p.vb)
			} else {
				(p.vb, lb, ub, p.va)
			};
			if (s_ub - s_lb) as u64 + 1 > clause_limit as u64 {
				return Err(InitError::Config(
					"non-linear constraint too large to translate".to_owned(),
				));
			}

			for k in s_lb..=s_ub {
				let lk = if s_lb == s_ub {
					TRUE_LIT
				} else {
					// define lk <-> s = k through the order literals
					let o_hi = self.solvers[0].get_literal(cc, s, k);
					let o_lo = self.solvers[0].get_literal(cc, s, k - 1);
					let lk = cc.add_literal();
					if !cc.add_clause(&[-lk, o_hi], ClauseType::Learnt)
						|| !cc.add_clause(&[-lk, -o_lo], ClauseType::Learnt)
						|| !cc.add_clause(&[lk, -o_hi, o_lo], ClauseType::Learnt)
					{
						return Ok(false);
					}
					lk
				};

				// lk -> w = k * other
				let up: Vec<_> = [(1, w), (k.safe_inv()?, other)]
					.into_iter()
					.filter(|&(co, _)| co != 0)
					.collect();
				let down: Vec<_> = up
					.iter()
					.map(|&(co, var)| Ok::<_, ArithError>((co.safe_inv()?, var)))
					.collect::<Result<_, _>>()?;
				let _ = self.add_constraint(Constraint::Sum(SumConstraint::new(lk, 0, up, sort)));
				let _ =
					self.add_constraint(Constraint::Sum(SumConstraint::new(lk, 0, down, sort)));
				cc.stats_mut().num_constraints += 2;
			}

			// the atom itself becomes linear over the auxiliary variable
			let mut elems = vec![(p.co_ab, w)];
			if let Some(vc) = p.vc {
				if p.co_c != 0 {
					elems.push((p.co_c, vc));
				}
			}
			let _ = self.add_constraint(Constraint::Sum(SumConstraint::new(
				p.lit,
				p.rhs,
				elems.clone(),
				sort,
			)));
			cc.stats_mut().num_constraints += 1;
			if p.strict {
				let neg: Vec<_> = elems
					.iter()
					.map(|&(co, var)| Ok::<_, ArithError>((co.safe_inv()?, var)))
					.collect::<Result<_, _>>()?;
				let rhs = p.rhs.safe_inv()?.safe_sub(1)?;
				let _ = self.add_constraint(Constraint::Sum(SumConstraint::new(
					-p.lit, rhs, neg, sort,
				)));
				cc.stats_mut().num_constraints += 1;
			}
		}
		Ok(true)
	}

	/// Delegate propagation to the thread's solver.
	pub fn propagate(&mut self, control: &mut dyn PropagateControl, changes: &[Lit]) {
		let thread = control.thread_id() as usize;
		let solver = &mut self.solvers[thread];
		let mut cc = ControlClauseCreator::new(control);
		let _ = solver.propagate(&mut cc, changes);
		let literals = cc.literals();
		solver.stats_mut().literals += literals;
	}

	/// Delegate checking to the thread's solver and make sure that all
	/// variables are assigned if the Boolean assignment is total.
	pub fn check(&mut self, control: &mut dyn PropagateControl) {
		let thread = control.thread_id() as usize;
		let level = control.assignment().decision_level();
		let size = control.assignment().trail().len();

		if let Some(con) = self.minimize {
			let shared = self.minimize_bound.load(Ordering::Relaxed);
			if shared != NO_BOUND {
				let adjust = self
					.get_minimize()
					.expect("minimize constraint missing from store")
					.adjust();
				self.solvers[thread].update_minimize(con, level, shared + adjust as SumVal);
			}
		}

		let check_state = self.config.check_state;
		let check_solution = self.config.check_solution;
		let (solvers, constraints) = (&mut self.solvers, &self.constraints);
		let solver = &mut solvers[thread];
		let mut cc = ControlClauseCreator::new(control);

		if solver.check(&mut cc, constraints, check_state) {
			// We do not have to introduce fresh order literals if literals
			// have been introduced during check; in that case there is a
			// guaranteed follow-up propagate call because all introduced
			// literals are watched.
			let total = {
				let ass = cc.assignment();
				ass.trail().len() == size && ass.is_total()
			};
			if total {
				solver.check_full(&mut cc, constraints, check_solution);
			}
		}
		let literals = cc.literals();
		solver.stats_mut().literals += literals;
	}

	/// Delegate undoing to the thread's solver.
	pub fn undo(&mut self, thread_id: u32) {
		self.solvers[thread_id as usize].undo();
	}

	/// Let the thread's solver pick a decision literal, or return the
	/// fallback.
	pub fn decide(&mut self, thread_id: u32, ass: &dyn Assignment, fallback: Lit) -> Lit {
		self.solvers[thread_id as usize].decide(ass, fallback)
	}

	/// The value of the given variable in the given thread.
	///
	/// Should only be called on total assignments.
	pub fn get_value(&self, var: VarRef, thread_id: u32) -> IntVal {
		self.solvers[thread_id as usize].get_value(var)
	}

	/// Extend the model of the given thread with the shown assignment and
	/// take care of minimization.
	pub fn on_model(&mut self, thread_id: u32) -> ModelExtension {
		let mut symbols = Vec::new();
		let shown: Vec<(VarRef, Symbol)> = self
			.var_map
			.iter()
			.map(|(&var, sym)| (var, sym.clone()))
			.collect();
		for (var, sym) in shown {
			if self.shown(var) {
				let value = self.solvers[thread_id as usize].get_value(var);
				symbols.push(Symbol::fun("csp", vec![sym, Symbol::Num(value)]));
			}
		}

		let mut cost = None;
		if self.has_minimize() {
			let bound = self.get_minimize_value(thread_id);
			debug!(bound, "model with objective");
			cost = Some(bound);
			self.stats_step.cost = Some(bound);
			let shared = self.minimize_bound.load(Ordering::Relaxed);
			if shared == NO_BOUND || bound - 1 < shared {
				self.update_minimize(bound - 1);
			}
		}

		ModelExtension { symbols, cost }
	}

	/// Gather the per-thread statistics, accumulate the step statistics, and
	/// return `(step, accumulated)` before resetting the step.
	pub fn on_statistics(&mut self) -> (Statistics, Statistics) {
		let thread_stats: Vec<_> = self.solvers.iter().map(|s| *s.stats()).collect();
		for (i, stats) in thread_stats.into_iter().enumerate() {
			*self.stats_step.solver_stats(i) = stats;
		}
		self.stats_accu.accu(&self.stats_step);
		let step = self.stats_step.clone();
		let accu = self.stats_accu.clone();
		self.stats_step.reset();
		for solver in &mut self.solvers {
			solver.stats_mut().reset();
		}
		(step, accu)
	}
}

/// Prepare the minimize constraint from the objective elements collected
/// during parsing, re-pooling any previous minimize constraint.
fn prepare_minimize(
	mut elems: CoVarVec,
	previous: Option<MinimizeConstraint>,
	sort: bool,
) -> Result<Option<MinimizeConstraint>, InitError> {
	if let Some(previous) = previous {
		for &(co, var) in previous.elements() {
			elems.push((co, Some(var)));
		}
		elems.push((previous.adjust().safe_inv()?, None));
	}
	if elems.is_empty() {
		return Ok(None);
	}
	let adjust = simplify(&mut elems, true)?;
	let elements = elems
		.into_iter()
		.filter_map(|(co, var)| var.map(|v| (co, v)))
		.collect();
	Ok(Some(MinimizeConstraint::new(adjust, elements, sort)))
}

/// CSP builder used with the [`parse`] function.
struct ConstraintBuilder<'a, 'b> {
	/// The propagator constraints are added to.
	propagator: &'a mut Propagator,
	/// The clause creator of the initialization.
	cc: &'a mut InitClauseCreator<'b>,
	/// Collected objective elements.
	minimize_elems: CoVarVec,
	/// Collected non-linear constraints.
	nonlinear: Vec<PendingNonlinear>,
}

impl AbstractConstraintBuilder for ConstraintBuilder<'_, '_> {
	fn solver_literal(&mut self, literal: Lit) -> Lit {
		self.cc.solver_literal(literal)
	}

	fn add_literal(&mut self) -> Lit {
		self.cc.add_literal()
	}

	fn is_true(&mut self, literal: Lit) -> bool {
		self.cc.assignment().is_true(literal)
	}

	fn add_clause(&mut self, clause: &[Lit]) -> bool {
		self.cc.add_clause(clause, ClauseType::Learnt)
	}

	fn add_show(&mut self) {
		self.propagator.show();
	}

	fn show_signature(&mut self, name: &str, arity: usize) {
		self.propagator.show_signature(name, arity);
	}

	fn show_variable(&mut self, var: VarRef) {
		self.propagator.show_variable(var);
	}

	fn add_variable(&mut self, sym: Symbol) -> VarRef {
		let known = self.propagator.sym_map.len();
		let var = self.propagator.add_variable(sym);
		if self.propagator.sym_map.len() > known {
			self.cc.stats_mut().num_variables += 1;
		}
		var
	}

	fn add_constraint(
		&mut self,
		lit: Lit,
		elems: Vec<(IntVal, VarRef)>,
		rhs: IntVal,
		strict: bool,
	) -> Result<bool, ParseError> {
		if !strict && self.cc.assignment().is_false(lit) {
			return Ok(true);
		}

		match elems.as_slice() {
			[] => {
				// the sum is constant
				if 0 <= rhs {
					if strict && !self.cc.add_clause(&[lit], ClauseType::Learnt) {
						return Ok(false);
					}
				} else if !self.cc.add_clause(&[-lit], ClauseType::Learnt) {
					return Ok(false);
				}
				Ok(true)
			}
			&[(co, var)] => Ok(self.propagator.add_simple(self.cc, lit, co, var, rhs, strict)),
			_ => {
				debug_assert!(!strict);
				let constraint = SumConstraint::new(
					lit,
					rhs,
					elems,
					self.propagator.config.sort_constraints,
				);
				let _ = self.propagator.add_constraint(Constraint::Sum(constraint));
				self.cc.stats_mut().num_constraints += 1;
				Ok(true)
			}
		}
	}

	fn add_nonlinear(
		&mut self,
		lit: Lit,
		co_ab: IntVal,
		va: VarRef,
		vb: VarRef,
		co_c: IntVal,
		vc: Option<VarRef>,
		rhs: IntVal,
		strict: bool,
	) -> Result<bool, ParseError> {
		self.nonlinear.push(PendingNonlinear {
			lit,
			co_ab,
			va,
			vb,
			co_c,
			vc,
			rhs,
			strict,
		});
		Ok(true)
	}

	fn add_minimize(&mut self, co: IntVal, var: Option<VarRef>) {
		self.minimize_elems.push((co, var));
	}

	fn add_distinct(
		&mut self,
		lit: Lit,
		elems: Vec<(Vec<(IntVal, VarRef)>, IntVal)>,
	) -> Result<bool, ParseError> {
		if self.cc.assignment().is_false(lit) {
			return Ok(true);
		}

		if elems.len() > 2 {
			let constraint = DistinctConstraint::new(lit, elems);
			let _ = self
				.propagator
				.add_constraint(Constraint::Distinct(constraint));
			self.cc.stats_mut().num_constraints += 1;
			return Ok(true);
		}

		// binary distinct constraints are represented with sum constraints
		for ((terms_i, fix_i), (terms_j, fix_j)) in elems.iter().tuple_combinations() {
			let mut celems: CoVarVec = Vec::with_capacity(terms_i.len() + terms_j.len() + 1);
			celems.extend(terms_i.iter().map(|&(co, var)| (co, Some(var))));
			for &(co, var) in terms_j {
				celems.push((co.safe_inv()?, Some(var)));
			}
			celems.push((fix_i.safe_sub(*fix_j)?, None));
			let rhs = simplify(&mut celems, true)?;
			let celems: Vec<(IntVal, VarRef)> = celems
				.into_iter()
				.filter_map(|(co, var)| var.map(|v| (co, v)))
				.collect();

			if celems.is_empty() {
				if rhs == 0 && !self.cc.add_clause(&[-lit], ClauseType::Learnt) {
					return Ok(false);
				}
				continue;
			}

			let a = self.cc.add_literal();
			let b = self.cc.add_literal();
			if !self.cc.add_clause(&[a, b, -lit], ClauseType::Learnt)
				|| !self.cc.add_clause(&[-a, -b], ClauseType::Learnt)
			{
				return Ok(false);
			}

			let neg: Vec<(IntVal, VarRef)> = celems
				.iter()
				.map(|&(co, var)| Ok::<_, ArithError>((co.safe_inv()?, var)))
				.collect::<Result<_, _>>()?;
			if !self.add_constraint(a, celems, rhs.safe_sub(1)?, false)?
				|| !self.add_constraint(b, neg, rhs.safe_inv()?.safe_sub(1)?, false)?
			{
				return Ok(false);
			}
		}
		Ok(true)
	}

	fn add_disjoint(
		&mut self,
		lit: Lit,
		elems: Vec<(IntVal, VarRef)>,
	) -> Result<bool, ParseError> {
		if self.cc.assignment().is_false(lit) {
			return Ok(true);
		}

		// with unit durations the tasks simply have to take distinct starts
		if elems.iter().all(|&(duration, _)| duration == 1) {
			let elements = elems
				.into_iter()
				.map(|(_, var)| (vec![(1, var)], 0))
				.collect();
			return self.add_distinct(lit, elements);
		}

		for (&(duration_i, var_i), &(duration_j, var_j)) in elems.iter().tuple_combinations() {
			if var_i == var_j {
				// a task always overlaps with itself
				if !self.cc.add_clause(&[-lit], ClauseType::Learnt) {
					return Ok(false);
				}
				continue;
			}
			let a = self.cc.add_literal();
			let b = self.cc.add_literal();
			if !self.cc.add_clause(&[a, b, -lit], ClauseType::Learnt) {
				return Ok(false);
			}
			// a -> i finishes before j starts; b -> j finishes before i
			if !self.add_constraint(
				a,
				vec![(1, var_i), (-1, var_j)],
				duration_i.safe_inv()?,
				false,
			)? || !self.add_constraint(
				b,
				vec![(1, var_j), (-1, var_i)],
				duration_j.safe_inv()?,
				false,
			)? {
				return Ok(false);
			}
		}
		Ok(true)
	}

	fn add_dom(
		&mut self,
		lit: Lit,
		var: VarRef,
		domain: &IntervalSet,
	) -> Result<bool, ParseError> {
		if self.cc.assignment().is_false(lit) {
			return Ok(true);
		}
		let constraint = DomConstraint::new(lit, var, domain);
		let _ = self.propagator.add_constraint(Constraint::Dom(constraint));
		self.cc.stats_mut().num_constraints += 1;
		Ok(true)
	}
}
