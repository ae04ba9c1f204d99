//! The linear sum constraint `lit -> Σ co·var <= rhs` and its propagation
//! state.
//!
//! The state caches the minimum and maximum of the sum over the currently
//! feasible bounds and is updated incrementally whenever the bound of a
//! watched variable moves. Propagation derives new bounds for individual
//! variables with the remaining slack, emitting the implying clause over the
//! order literals that witness the derivation.

use std::cmp::Reverse;

use tracing::trace;

use crate::{
	config::Config,
	num::{div_ceil, div_floor, IntVal, SumVal, MAX_VAL},
	oracle::{ClauseCreator, ClauseType, InitClauseCreator, Lit, WeightConstraintType},
	solver::{var_state::VarRef, Solver},
};

#[derive(Clone, Debug, PartialEq, Eq)]
/// A linear sum constraint `lit -> Σ co·var <= rhs`.
pub struct SumConstraint {
	/// The reification literal of the constraint.
	lit: Lit,
	/// The right-hand side of the constraint.
	rhs: IntVal,
	/// The coefficient/variable pairs of the left-hand side.
	elements: Vec<(IntVal, VarRef)>,
}

impl SumConstraint {
	/// Create a new sum constraint from simplified elements.
	///
	/// With `sort` enabled the elements are ordered by descending coefficient
	/// magnitude, which tends to derive the strongest bounds first.
	pub fn new(lit: Lit, rhs: IntVal, mut elements: Vec<(IntVal, VarRef)>, sort: bool) -> Self {
		debug_assert!(elements.iter().all(|&(co, _)| co != 0));
		if sort {
			elements.sort_by_key(|&(co, _)| Reverse(co.abs()));
		}
		SumConstraint { lit, rhs, elements }
	}

	/// The reification literal of the constraint.
	pub fn literal(&self) -> Lit {
		self.lit
	}

	/// The right-hand side of the constraint.
	pub fn rhs(&self) -> IntVal {
		self.rhs
	}

	/// The coefficient/variable pairs of the left-hand side.
	pub fn elements(&self) -> &[(IntVal, VarRef)] {
		&self.elements
	}

	/// Check the constraint against the values of a total assignment.
	pub(crate) fn check_full(&self, solver: &Solver) -> bool {
		let sum: SumVal = self
			.elements
			.iter()
			.map(|&(co, var)| co as SumVal * solver.get_value(var) as SumVal)
			.sum();
		sum <= self.rhs as SumVal
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Thread-local state of a [`SumConstraint`].
pub(crate) struct SumState {
	/// Cached minimum of the sum over the bounds last seen.
	min_sum: SumVal,
	/// Cached maximum of the sum over the bounds last seen.
	max_sum: SumVal,
}

impl SumState {
	/// Create the state for the given constraint.
	pub(crate) fn new(con: &SumConstraint, solver: &Solver) -> Self {
		let (min_sum, max_sum) = linear_bounds(con.elements(), solver);
		SumState { min_sum, max_sum }
	}

	/// Incorporate a bound change of a watched variable.
	pub(crate) fn update(&mut self, co: IntVal, diff: IntVal) -> bool {
		update_linear(&mut self.min_sum, &mut self.max_sum, co, diff);
		true
	}

	/// Undo a bound change of a watched variable.
	pub(crate) fn undo(&mut self, co: IntVal, diff: IntVal) {
		undo_linear(&mut self.min_sum, &mut self.max_sum, co, diff);
	}

	/// Propagate the constraint; returns `false` on conflict.
	pub(crate) fn propagate(
		&mut self,
		solver: &mut Solver,
		cc: &mut dyn ClauseCreator,
		con: &SumConstraint,
		check_state: bool,
		inactive: &mut bool,
	) -> bool {
		if check_state {
			let (min_sum, max_sum) = linear_bounds(con.elements(), solver);
			assert_eq!(
				(self.min_sum, self.max_sum),
				(min_sum, max_sum),
				"cached sums out of sync"
			);
		}
		propagate_linear(
			solver,
			cc,
			self.min_sum,
			self.max_sum,
			con.elements(),
			con.rhs() as SumVal,
			Some(con.literal()),
			inactive,
		)
	}

	/// Translate the constraint into a weight constraint over order literals
	/// when its footprint stays within the clause budget.
	///
	/// Returns `(ok, remove)`.
	pub(crate) fn translate(
		&mut self,
		solver: &mut Solver,
		cc: &mut InitClauseCreator<'_>,
		config: &Config,
		con: &SumConstraint,
		budget: u64,
	) -> (bool, bool) {
		if cc.assignment().is_false(con.literal()) {
			return (true, true);
		}
		let rhs = con.rhs() as SumVal;
		if self.max_sum <= rhs {
			return (true, true);
		}
		if self.min_sum > rhs {
			return (
				cc.add_clause(&[-con.literal()], ClauseType::Learnt),
				true,
			);
		}

		// number of order literals in the encoding
		let n: u64 = con
			.elements()
			.iter()
			.map(|&(_, var)| {
				let vs = solver.var_state(var);
				(vs.upper_bound() - vs.lower_bound()) as u64
			})
			.sum();
		let limit = (config.clause_limit as f64 * config.weight_constraint_ratio) as u64;
		if n == 0 || n > limit || n > budget {
			return (true, false);
		}

		if config.literals_only {
			for &(_, var) in con.elements() {
				let vs = solver.var_state(var);
				let (lb, ub) = (vs.lower_bound(), vs.upper_bound());
				for value in lb..ub {
					let _ = solver.get_literal(cc, var, value);
				}
			}
			return (true, false);
		}

		// The order encoding of `x` with bounds `[lb, ub]` satisfies
		// `x = lb + Σ_{v in [lb, ub)} ¬(x <= v)`.
		let mut wlits = Vec::with_capacity(n as usize);
		let mut bound = rhs;
		for &(co, var) in con.elements() {
			let vs = solver.var_state(var);
			let (lb, ub) = (vs.lower_bound(), vs.upper_bound());
			if co > 0 {
				bound -= co as SumVal * lb as SumVal;
				for value in lb..ub {
					let lit = solver.get_literal(cc, var, value);
					wlits.push((-lit, co));
				}
			} else {
				bound -= co as SumVal * ub as SumVal;
				for value in lb..ub {
					let lit = solver.get_literal(cc, var, value);
					wlits.push((lit, -co));
				}
			}
		}

		let total: SumVal = wlits.iter().map(|&(_, w)| w as SumVal).sum();
		if bound >= total {
			return (true, true);
		}
		if bound < 0 {
			return (
				cc.add_clause(&[-con.literal()], ClauseType::Learnt),
				true,
			);
		}
		if bound > MAX_VAL as SumVal {
			return (true, false);
		}

		let ok = cc.add_weight_constraint(
			con.literal(),
			wlits,
			bound as IntVal,
			WeightConstraintType::RightImplication,
		);
		(ok, true)
	}
}

/// Compute the minimum and maximum of a linear expression over the bounds as
/// currently seen by the watch machinery.
pub(crate) fn linear_bounds(elements: &[(IntVal, VarRef)], solver: &Solver) -> (SumVal, SumVal) {
	let mut min_sum = 0;
	let mut max_sum = 0;
	for &(co, var) in elements {
		let co = co as SumVal;
		let lb = solver.seen_lower_bound(var) as SumVal;
		let ub = solver.seen_upper_bound(var) as SumVal;
		if co > 0 {
			min_sum += co * lb;
			max_sum += co * ub;
		} else {
			min_sum += co * ub;
			max_sum += co * lb;
		}
	}
	(min_sum, max_sum)
}

/// Incorporate a bound change into cached linear bounds.
///
/// A positive `diff` is a lower bound increase, a negative `diff` an upper
/// bound decrease; which cached sum is affected depends on the sign of the
/// coefficient.
pub(crate) fn update_linear(min_sum: &mut SumVal, max_sum: &mut SumVal, co: IntVal, diff: IntVal) {
	let d = co as SumVal * diff as SumVal;
	if (diff > 0) == (co > 0) {
		*min_sum += d;
	} else {
		*max_sum += d;
	}
}

/// Revert a bound change from cached linear bounds.
pub(crate) fn undo_linear(min_sum: &mut SumVal, max_sum: &mut SumVal, co: IntVal, diff: IntVal) {
	let d = co as SumVal * diff as SumVal;
	if (diff > 0) == (co > 0) {
		*min_sum -= d;
	} else {
		*max_sum -= d;
	}
}

/// Propagate a linear constraint `clit -> Σ elements <= rhs`.
///
/// Without a reification literal the constraint is unconditional (used by the
/// minimize state). Returns `false` on conflict; sets `inactive` when the
/// constraint turned out to be entailed by the current bounds.
#[allow(
	clippy::too_many_arguments,
	reason = "splitting the cached bounds into a struct would obscure the callers"
)]
pub(crate) fn propagate_linear(
	solver: &mut Solver,
	cc: &mut dyn ClauseCreator,
	min_sum: SumVal,
	max_sum: SumVal,
	elements: &[(IntVal, VarRef)],
	rhs: SumVal,
	clit: Option<Lit>,
	inactive: &mut bool,
) -> bool {
	// entailed: all feasible assignments satisfy the constraint
	if max_sum <= rhs {
		*inactive = true;
		return true;
	}

	// refuted: no feasible assignment satisfies the constraint
	if min_sum > rhs {
		let mut clause = Vec::with_capacity(elements.len() + 1);
		if let Some(clit) = clit {
			clause.push(-clit);
		}
		let budget = min_sum - (rhs + 1);
		collect_reason(solver, cc, elements, None, budget, &mut clause);
		trace!(?clause, "sum constraint refuted");
		return cc.add_clause(&clause, ClauseType::Learnt);
	}

	// bounds can only be derived once the constraint literal holds
	if let Some(clit) = clit {
		if !cc.assignment().is_true(clit) {
			return true;
		}
	}

	for (idx, &(co, var)) in elements.iter().enumerate() {
		let co_s = co as SumVal;
		if co > 0 {
			let lb = solver.seen_lower_bound(var) as SumVal;
			let value = div_floor(rhs - min_sum + co_s * lb, co_s);
			if value >= solver.seen_upper_bound(var) as SumVal {
				continue;
			}
			let blit = solver.get_literal(cc, var, value as IntVal);
			if cc.assignment().is_true(blit) {
				continue;
			}
			let mut clause = Vec::with_capacity(elements.len() + 1);
			clause.push(blit);
			if let Some(clit) = clit {
				clause.push(-clit);
			}
			let budget = (min_sum - co_s * lb) - (rhs - co_s * (value + 1) + 1);
			collect_reason(solver, cc, elements, Some(idx), budget, &mut clause);
			trace!(var = usize::from(var), value, ?clause, "derive upper bound");
			if !cc.add_clause(&clause, ClauseType::Learnt) {
				return false;
			}
		} else {
			let ub = solver.seen_upper_bound(var) as SumVal;
			let value = div_ceil(rhs - min_sum + co_s * ub, co_s);
			if value <= solver.seen_lower_bound(var) as SumVal {
				continue;
			}
			let blit = -solver.get_literal(cc, var, (value - 1) as IntVal);
			if cc.assignment().is_true(blit) {
				continue;
			}
			let mut clause = Vec::with_capacity(elements.len() + 1);
			clause.push(blit);
			if let Some(clit) = clit {
				clause.push(-clit);
			}
			let budget = (min_sum - co_s * ub) - (rhs - co_s * (value - 1) + 1);
			collect_reason(solver, cc, elements, Some(idx), budget, &mut clause);
			trace!(var = usize::from(var), value, ?clause, "derive lower bound");
			if !cc.add_clause(&clause, ClauseType::Learnt) {
				return false;
			}
		}
	}
	true
}

/// Collect the order literals witnessing the min-side bounds of all elements
/// except `skip` into `clause`.
///
/// With reason refinement the witnesses are weakened as far as the given
/// slack `budget` allows, preferring literals that were assigned on lower
/// decision levels. If allowed, fresh literals may be introduced at the
/// weakest sufficient bound.
pub(crate) fn collect_reason(
	solver: &mut Solver,
	cc: &mut dyn ClauseCreator,
	elements: &[(IntVal, VarRef)],
	skip: Option<usize>,
	mut budget: SumVal,
	clause: &mut Vec<Lit>,
) {
	let refine = solver.config().refine_reasons;
	let introduce = solver.config().refine_introduce;

	for (j, &(co, var)) in elements.iter().enumerate() {
		if Some(j) == skip {
			continue;
		}
		let co_s = co as SumVal;
		if co > 0 {
			let lb = solver.seen_lower_bound(var);
			let min_bound = solver.var_state(var).min_bound();
			if lb == min_bound {
				continue;
			}
			let mut value = lb - 1;
			if refine && budget > 0 {
				let step = budget / co_s;
				let vmin = lb as SumVal - 1 - step;
				if vmin < min_bound as SumVal {
					// the initial bound suffices, no witness needed
					budget -= co_s * (lb - min_bound) as SumVal;
					solver.stats_mut().refined_reason += 1;
					continue;
				}
				let vmin = vmin as IntVal;
				let found = solver
					.var_state(var)
					.lits_ge(vmin)
					.next()
					.filter(|&(v, _)| v <= lb - 1);
				match found {
					Some((v, _)) if v < lb - 1 => {
						budget -= co_s * (lb - 1 - v) as SumVal;
						solver.stats_mut().refined_reason += 1;
						value = v;
					}
					Some(_) => {}
					None if introduce && vmin < lb - 1 => {
						budget -= co_s * (lb - 1 - vmin) as SumVal;
						solver.stats_mut().introduced_reason += 1;
						value = vmin;
					}
					None => {}
				}
			}
			let lit = solver.get_literal(cc, var, value);
			clause.push(lit);
		} else {
			let ub = solver.seen_upper_bound(var);
			let max_bound = solver.var_state(var).max_bound();
			if ub == max_bound {
				continue;
			}
			let mut value = ub;
			if refine && budget > 0 {
				let step = budget / -co_s;
				let vmax = ub as SumVal + step;
				if vmax >= max_bound as SumVal {
					budget -= -co_s * (max_bound - ub) as SumVal;
					solver.stats_mut().refined_reason += 1;
					continue;
				}
				let vmax = vmax as IntVal;
				let found = solver
					.var_state(var)
					.lits_le(vmax)
					.next()
					.filter(|&(v, _)| v >= ub);
				match found {
					Some((v, _)) if v > ub => {
						budget -= -co_s * (v - ub) as SumVal;
						solver.stats_mut().refined_reason += 1;
						value = v;
					}
					Some(_) => {}
					None if introduce && vmax > ub => {
						budget -= -co_s * (vmax - ub) as SumVal;
						solver.stats_mut().introduced_reason += 1;
						value = vmax;
					}
					None => {}
				}
			}
			let lit = solver.get_literal(cc, var, value);
			clause.push(-lit);
		}
	}
}

#[cfg(test)]
mod tests {
	use crate::{
		config::SolverConfig,
		constraints::sum::{linear_bounds, SumConstraint, SumState},
		oracle::{Assignment, ControlClauseCreator, TRUE_LIT},
		solver::Solver,
		tests::TestOracle,
	};

	#[test]
	fn test_incremental_sums() {
		let mut solver = Solver::new(SolverConfig::default());
		let x = solver.add_variable(0, 10);
		let y = solver.add_variable(-5, 5);
		let con = SumConstraint::new(TRUE_LIT, 7, vec![(2, x), (-3, y)], true);
		let mut state = SumState::new(&con, &solver);
		assert_eq!((state.min_sum, state.max_sum), (-15, 35));

		// lower bound of x rises by 4, upper bound of y drops by 2
		assert!(state.update(2, 4));
		assert!(state.update(-3, -2));
		assert_eq!((state.min_sum, state.max_sum), (-1, 35));

		state.undo(-3, -2);
		state.undo(2, 4);
		assert_eq!((state.min_sum, state.max_sum), (-15, 35));
		assert_eq!(linear_bounds(con.elements(), &solver), (-15, 35));
	}

	#[test]
	fn test_refuted_constraint_propagates_literal() {
		let mut oracle = TestOracle::with_vars(1);
		let r = 2;
		let mut solver = Solver::new(SolverConfig::default());
		let x = solver.add_variable(0, 10);
		let con = SumConstraint::new(r, -1, vec![(1, x)], true);
		let mut state = SumState::new(&con, &solver);

		// min_sum = 0 > -1, so the unit clause forces the reification
		// literal false
		let mut inactive = false;
		let mut cc = ControlClauseCreator::new(&mut oracle);
		assert!(state.propagate(&mut solver, &mut cc, &con, true, &mut inactive));
		drop(cc);
		assert_eq!(Assignment::value(&oracle, r), Some(false));
	}

	#[test]
	fn test_entailed_constraint_marked_inactive() {
		let mut oracle = TestOracle::new();
		let mut solver = Solver::new(SolverConfig::default());
		let x = solver.add_variable(0, 10);
		let con = SumConstraint::new(TRUE_LIT, 10, vec![(1, x)], true);
		let mut state = SumState::new(&con, &solver);

		let mut inactive = false;
		let mut cc = ControlClauseCreator::new(&mut oracle);
		assert!(state.propagate(&mut solver, &mut cc, &con, true, &mut inactive));
		assert!(inactive);
	}
}
