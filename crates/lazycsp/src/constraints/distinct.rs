//! The distinct constraint over linear expressions.
//!
//! Propagation applies the pigeonhole principle to the expressions that are
//! fully assigned under the current bounds: two expressions assigned the same
//! value refute the constraint, and an assigned value at the bound of another
//! expression forces that expression away from it.
//!
//! Binary distinct constraints are rewritten into a sum disequality at
//! registration and never reach this state.

use std::collections::HashMap;

use tracing::trace;

use crate::{
	config::Config,
	constraints::{sum::SumConstraint, Constraint},
	num::{CheckedArith, IntVal, SumVal},
	oracle::{ClauseCreator, ClauseType, InitClauseCreator, Lit},
	parsing::{simplify, CoVarVec},
	solver::{var_state::VarRef, Solver},
};

/// A single distinct element: a linear expression plus a constant offset.
pub type DistinctElement = (Vec<(IntVal, VarRef)>, IntVal);

#[derive(Clone, Debug, PartialEq, Eq)]
/// A constraint requiring a list of linear expressions to take pairwise
/// distinct values.
pub struct DistinctConstraint {
	/// The reification literal of the constraint.
	lit: Lit,
	/// The expressions, each a term list plus a constant offset.
	elements: Vec<DistinctElement>,
}

impl DistinctConstraint {
	/// Create a new distinct constraint.
	///
	/// Constraints over two expressions must be rewritten into a sum
	/// disequality instead; the reason clauses of the two encodings differ
	/// and must not be mixed.
	pub fn new(lit: Lit, elements: Vec<DistinctElement>) -> Self {
		debug_assert!(elements.len() > 2);
		DistinctConstraint { lit, elements }
	}

	/// The reification literal of the constraint.
	pub fn literal(&self) -> Lit {
		self.lit
	}

	/// The expressions of the constraint.
	pub fn elements(&self) -> &[DistinctElement] {
		&self.elements
	}

	/// The value of the element under the given bound accessor.
	fn element_value(
		element: &DistinctElement,
		mut bound: impl FnMut(IntVal, VarRef) -> IntVal,
	) -> SumVal {
		let (terms, fixed) = element;
		terms
			.iter()
			.map(|&(co, var)| co as SumVal * bound(co, var) as SumVal)
			.sum::<SumVal>()
			+ *fixed as SumVal
	}

	/// Check the constraint against the values of a total assignment.
	pub(crate) fn check_full(&self, solver: &Solver) -> bool {
		let mut seen = std::collections::HashSet::new();
		self.elements.iter().all(|element| {
			seen.insert(Self::element_value(element, |_, var| solver.get_value(var)))
		})
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// Thread-local state of a [`DistinctConstraint`].
///
/// The expression bounds are recomputed from the variable bounds on each
/// propagation; the elements of a distinct constraint are typically small.
pub(crate) struct DistinctState {}

impl DistinctState {
	/// Create the state for a distinct constraint.
	pub(crate) fn new(_con: &DistinctConstraint) -> Self {
		DistinctState {}
	}

	/// Bound changes always warrant a propagation attempt.
	pub(crate) fn update(&mut self, _i: IntVal, _diff: IntVal) -> bool {
		true
	}

	/// Nothing to restore; bounds are recomputed on propagation.
	pub(crate) fn undo(&mut self, _i: IntVal, _diff: IntVal) {}

	/// Propagate the constraint; returns `false` on conflict.
	pub(crate) fn propagate(
		&mut self,
		solver: &mut Solver,
		cc: &mut dyn ClauseCreator,
		con: &DistinctConstraint,
		inactive: &mut bool,
	) -> bool {
		// bounds of all expressions under the currently seen variable bounds
		let bounds: Vec<(SumVal, SumVal)> = con
			.elements()
			.iter()
			.map(|element| {
				let min = DistinctConstraint::element_value(element, |co, var| {
					if co > 0 {
						solver.seen_lower_bound(var)
					} else {
						solver.seen_upper_bound(var)
					}
				});
				let max = DistinctConstraint::element_value(element, |co, var| {
					if co > 0 {
						solver.seen_upper_bound(var)
					} else {
						solver.seen_lower_bound(var)
					}
				});
				(min, max)
			})
			.collect();

		// pigeonhole on fully assigned expressions
		let mut seen: HashMap<SumVal, usize> = HashMap::new();
		let mut assigned: Vec<(SumVal, usize)> = Vec::new();
		for (j, &(min, max)) in bounds.iter().enumerate() {
			if min != max {
				continue;
			}
			if let Some(&k) = seen.get(&min) {
				let mut clause = vec![-con.literal()];
				self.collect_witnesses(solver, cc, con, k, &mut clause);
				self.collect_witnesses(solver, cc, con, j, &mut clause);
				trace!(?clause, "distinct conflict");
				return cc.add_clause(&clause, ClauseType::Learnt);
			}
			let _ = seen.insert(min, j);
			assigned.push((min, j));
		}

		if assigned.is_empty() {
			return true;
		}
		if !cc.assignment().is_true(con.literal()) {
			return true;
		}

		// force expressions away from values assigned to other expressions
		for (j, &(min, max)) in bounds.iter().enumerate() {
			if min == max {
				continue;
			}
			let (terms, _) = &con.elements()[j];
			// only single-variable expressions can be forced through order
			// literals; others are handled by the pigeonhole check above
			let &[(co, var)] = &terms[..] else {
				continue;
			};
			for &(value, k) in &assigned {
				if value == min {
					let mut clause = vec![-con.literal()];
					self.collect_witnesses(solver, cc, con, k, &mut clause);
					let (lb, ub) = (solver.seen_lower_bound(var), solver.seen_upper_bound(var));
					let blit = if co > 0 {
						// the minimum is attained at the lower bound
						if lb > solver.var_state(var).min_bound() {
							clause.push(solver.get_literal(cc, var, lb - 1));
						}
						-solver.get_literal(cc, var, lb)
					} else {
						if ub < solver.var_state(var).max_bound() {
							clause.push(-solver.get_literal(cc, var, ub));
						}
						solver.get_literal(cc, var, ub - 1)
					};
					clause.push(blit);
					trace!(?clause, value, "distinct forces minimum");
					if !cc.add_clause(&clause, ClauseType::Learnt) {
						return false;
					}
				} else if value == max {
					let mut clause = vec![-con.literal()];
					self.collect_witnesses(solver, cc, con, k, &mut clause);
					let (lb, ub) = (solver.seen_lower_bound(var), solver.seen_upper_bound(var));
					let blit = if co > 0 {
						// the maximum is attained at the upper bound
						if ub < solver.var_state(var).max_bound() {
							clause.push(-solver.get_literal(cc, var, ub));
						}
						solver.get_literal(cc, var, ub - 1)
					} else {
						if lb > solver.var_state(var).min_bound() {
							clause.push(solver.get_literal(cc, var, lb - 1));
						}
						-solver.get_literal(cc, var, lb)
					};
					clause.push(blit);
					trace!(?clause, value, "distinct forces maximum");
					if !cc.add_clause(&clause, ClauseType::Learnt) {
						return false;
					}
				}
			}
		}

		// once every expression is assigned the constraint cannot act again
		// on this level
		if bounds.iter().all(|&(min, max)| min == max) {
			*inactive = true;
		}
		true
	}

	/// Rewrite the constraint into pairwise sum disequalities when the
	/// candidate value span is small enough.
	///
	/// The auxiliary sum constraints are returned through `added` and are
	/// themselves subjected to translation; the exclusive-or clauses over the
	/// fresh literals are posted directly. Returns `(ok, remove)`.
	pub(crate) fn translate(
		&mut self,
		solver: &mut Solver,
		cc: &mut InitClauseCreator<'_>,
		config: &Config,
		con: &DistinctConstraint,
		budget: u64,
		added: &mut Vec<Constraint>,
	) -> (bool, bool) {
		if cc.assignment().is_false(con.literal()) {
			return (true, true);
		}

		// number of candidate values under the current bounds
		let mut span: u64 = 0;
		for element in con.elements() {
			let min = DistinctConstraint::element_value(element, |co, var| {
				if co > 0 {
					solver.seen_lower_bound(var)
				} else {
					solver.seen_upper_bound(var)
				}
			});
			let max = DistinctConstraint::element_value(element, |co, var| {
				if co > 0 {
					solver.seen_upper_bound(var)
				} else {
					solver.seen_lower_bound(var)
				}
			});
			span += (max - min) as u64 + 1;
		}
		let n = con.elements().len() as u64;
		if span > config.distinct_limit as u64 || n * (n - 1) > budget {
			return (true, false);
		}

		// build all pairwise disequalities before posting anything, so that a
		// failing simplification leaves no partial encoding behind
		let mut pairs = Vec::new();
		for (i, (terms_i, fix_i)) in con.elements().iter().enumerate() {
			for (terms_j, fix_j) in &con.elements()[i + 1..] {
				let mut celems: CoVarVec =
					terms_i.iter().map(|&(co, var)| (co, Some(var))).collect();
				for &(co, var) in terms_j {
					let Ok(co) = co.safe_inv() else {
						return (true, false);
					};
					celems.push((co, Some(var)));
				}
				let Ok(fixed) = fix_i.safe_sub(*fix_j) else {
					return (true, false);
				};
				celems.push((fixed, None));
				let Ok(rhs) = simplify(&mut celems, true) else {
					return (true, false);
				};
				let celems: Vec<(IntVal, VarRef)> = celems
					.into_iter()
					.filter_map(|(co, var)| var.map(|v| (co, v)))
					.collect();
				let (Ok(le_rhs), Ok(ge_rhs)) = (
					rhs.safe_sub(1),
					rhs.safe_inv().and_then(|r| r.safe_sub(1)),
				) else {
					return (true, false);
				};
				let neg: Vec<(IntVal, VarRef)> = match celems
					.iter()
					.map(|&(co, var)| Ok((co.safe_inv()?, var)))
					.collect::<Result<_, crate::num::ArithError>>()
				{
					Ok(neg) => neg,
					Err(_) => return (true, false),
				};
				pairs.push((celems, neg, rhs, le_rhs, ge_rhs));
			}
		}

		for (celems, neg, rhs, le_rhs, ge_rhs) in pairs {
			if celems.is_empty() {
				if rhs == 0 && !cc.add_clause(&[-con.literal()], ClauseType::Learnt) {
					return (false, false);
				}
				continue;
			}
			let a = cc.add_literal();
			let b = cc.add_literal();
			if !cc.add_clause(&[a, b, -con.literal()], ClauseType::Learnt)
				|| !cc.add_clause(&[-a, -b], ClauseType::Learnt)
			{
				return (false, false);
			}
			added.push(Constraint::Sum(SumConstraint::new(
				a,
				le_rhs,
				celems,
				config.sort_constraints,
			)));
			added.push(Constraint::Sum(SumConstraint::new(
				b,
				ge_rhs,
				neg,
				config.sort_constraints,
			)));
		}

		(true, true)
	}

	/// Push the order literals witnessing the assignment of the given
	/// element into `clause`.
	fn collect_witnesses(
		&self,
		solver: &mut Solver,
		cc: &mut dyn ClauseCreator,
		con: &DistinctConstraint,
		element: usize,
		clause: &mut Vec<Lit>,
	) {
		let (terms, _) = &con.elements()[element];
		for &(_, var) in terms {
			let lb = solver.seen_lower_bound(var);
			let ub = solver.seen_upper_bound(var);
			if lb > solver.var_state(var).min_bound() {
				clause.push(solver.get_literal(cc, var, lb - 1));
			}
			if ub < solver.var_state(var).max_bound() {
				clause.push(-solver.get_literal(cc, var, ub));
			}
		}
	}
}
