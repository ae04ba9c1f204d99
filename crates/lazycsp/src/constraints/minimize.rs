//! The linear objective constraint `Σ co·var <= minimize bound`.
//!
//! The minimize constraint behaves like a sum constraint whose right-hand
//! side is not a posted constant but the bound shared between all solver
//! threads, which monotonically decreases after each model.

use crate::{
	constraints::sum::{linear_bounds, propagate_linear, undo_linear, update_linear},
	num::{IntVal, SumVal},
	oracle::ClauseCreator,
	solver::{var_state::VarRef, Solver},
};

#[derive(Clone, Debug, PartialEq, Eq)]
/// The linear objective `Σ co·var <= minimize bound`.
pub struct MinimizeConstraint {
	/// Offset absorbing the constant terms folded away during
	/// simplification.
	adjust: IntVal,
	/// The coefficient/variable pairs of the objective.
	elements: Vec<(IntVal, VarRef)>,
}

impl MinimizeConstraint {
	/// Create a new minimize constraint from simplified elements.
	pub fn new(adjust: IntVal, mut elements: Vec<(IntVal, VarRef)>, sort: bool) -> Self {
		debug_assert!(elements.iter().all(|&(co, _)| co != 0));
		if sort {
			elements.sort_by_key(|&(co, _)| std::cmp::Reverse(co.abs()));
		}
		MinimizeConstraint { adjust, elements }
	}

	/// The constant offset of the objective.
	pub fn adjust(&self) -> IntVal {
		self.adjust
	}

	/// The coefficient/variable pairs of the objective.
	pub fn elements(&self) -> &[(IntVal, VarRef)] {
		&self.elements
	}

	/// Evaluate the objective under the (total) assignment of the given
	/// solver.
	pub fn evaluate(&self, solver: &Solver) -> SumVal {
		let sum: SumVal = self
			.elements
			.iter()
			.map(|&(co, var)| co as SumVal * solver.get_value(var) as SumVal)
			.sum();
		sum - self.adjust as SumVal
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Thread-local state of a [`MinimizeConstraint`].
pub(crate) struct MinimizeState {
	/// Cached minimum of the objective over the bounds last seen.
	min_sum: SumVal,
	/// Cached maximum of the objective over the bounds last seen.
	max_sum: SumVal,
}

impl MinimizeState {
	/// Create the state for the given constraint.
	pub(crate) fn new(con: &MinimizeConstraint, solver: &Solver) -> Self {
		let (min_sum, max_sum) = linear_bounds(con.elements(), solver);
		MinimizeState { min_sum, max_sum }
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

	/// Propagate the objective against the current minimize bound; returns
	/// `false` on conflict.
	///
	/// Without a bound there is nothing to propagate yet. The state is never
	/// marked inactive since the bound keeps tightening during the search.
	pub(crate) fn propagate(
		&mut self,
		solver: &mut Solver,
		cc: &mut dyn ClauseCreator,
		con: &MinimizeConstraint,
		check_state: bool,
	) -> bool {
		if check_state {
			let (min_sum, max_sum) = linear_bounds(con.elements(), solver);
			assert_eq!(
				(self.min_sum, self.max_sum),
				(min_sum, max_sum),
				"cached sums out of sync"
			);
		}
		let Some(bound) = solver.minimize_bound() else {
			return true;
		};
		let mut inactive = false;
		propagate_linear(
			solver,
			cc,
			self.min_sum,
			self.max_sum,
			con.elements(),
			bound,
			None,
			&mut inactive,
		)
	}
}
