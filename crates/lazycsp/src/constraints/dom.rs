//! The domain constraint `lit -> var ∈ set`.
//!
//! Domain constraints are normally translated into a chain of order-literal
//! implications during initialization; the runtime state only propagates when
//! the translation was skipped because of the clause budget. Propagation
//! clamps the variable's bounds into the closest values of the set.

use rangelist::RangeList;
use tracing::trace;

use crate::{
	intervals::IntervalSet,
	num::IntVal,
	oracle::{ClauseCreator, ClauseType, InitClauseCreator, Lit},
	solver::{var_state::VarRef, Solver},
};

#[derive(Clone, Debug, PartialEq, Eq)]
/// A constraint restricting a variable to a set of disjoint ranges.
pub struct DomConstraint {
	/// The reification literal of the constraint.
	lit: Lit,
	/// The restricted variable.
	var: VarRef,
	/// The allowed values.
	ranges: RangeList<IntVal>,
}

impl DomConstraint {
	/// Create a new domain constraint.
	pub fn new(lit: Lit, var: VarRef, domain: &IntervalSet) -> Self {
		DomConstraint {
			lit,
			var,
			ranges: domain.into(),
		}
	}

	/// The reification literal of the constraint.
	pub fn literal(&self) -> Lit {
		self.lit
	}

	/// The restricted variable.
	pub fn var(&self) -> VarRef {
		self.var
	}

	/// The allowed values.
	pub fn ranges(&self) -> &RangeList<IntVal> {
		&self.ranges
	}

	/// Check the constraint against the value of a total assignment.
	pub(crate) fn check_full(&self, solver: &Solver) -> bool {
		self.ranges.contains(&solver.get_value(self.var))
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// Thread-local state of a [`DomConstraint`].
pub(crate) struct DomState {}

impl DomState {
	/// Create the state for a domain constraint.
	pub(crate) fn new() -> Self {
		DomState {}
	}

	/// Propagate the constraint; returns `false` on conflict.
	pub(crate) fn propagate(
		&mut self,
		solver: &mut Solver,
		cc: &mut dyn ClauseCreator,
		con: &DomConstraint,
		inactive: &mut bool,
	) -> bool {
		if !cc.assignment().is_true(con.literal()) {
			return true;
		}
		let var = con.var();
		let lb = solver.seen_lower_bound(var);
		let ub = solver.seen_upper_bound(var);

		// the smallest allowed value at or above the lower bound, and the
		// largest allowed value at or below the upper bound
		let new_lb = con
			.ranges()
			.iter()
			.find(|r| *r.end() >= lb)
			.map(|r| lb.max(*r.start()));
		let new_ub = con
			.ranges()
			.iter()
			.rev()
			.find(|r| *r.start() <= ub)
			.map(|r| ub.min(*r.end()));

		let (Some(new_lb), Some(new_ub)) = (new_lb, new_ub) else {
			// no allowed value within the current bounds
			let mut clause = vec![-con.literal()];
			self.push_bound_witnesses(solver, cc, var, lb, ub, &mut clause);
			trace!(?clause, "domain conflict");
			return cc.add_clause(&clause, ClauseType::Learnt);
		};
		if new_lb > ub || new_ub < lb {
			let mut clause = vec![-con.literal()];
			self.push_bound_witnesses(solver, cc, var, lb, ub, &mut clause);
			trace!(?clause, "domain conflict");
			return cc.add_clause(&clause, ClauseType::Learnt);
		}

		if new_lb > lb {
			let mut clause = vec![-con.literal()];
			if lb > solver.var_state(var).min_bound() {
				clause.push(solver.get_literal(cc, var, lb - 1));
			}
			clause.push(-solver.get_literal(cc, var, new_lb - 1));
			trace!(?clause, new_lb, "domain raises lower bound");
			if !cc.add_clause(&clause, ClauseType::Learnt) {
				return false;
			}
		}
		if new_ub < ub {
			let mut clause = vec![-con.literal()];
			if ub < solver.var_state(var).max_bound() {
				clause.push(-solver.get_literal(cc, var, ub));
			}
			clause.push(solver.get_literal(cc, var, new_ub));
			trace!(?clause, new_ub, "domain lowers upper bound");
			if !cc.add_clause(&clause, ClauseType::Learnt) {
				return false;
			}
		}

		// once both bounds lie in the same range the constraint is entailed
		if con
			.ranges()
			.iter()
			.any(|r| *r.start() <= new_lb && new_ub <= *r.end())
		{
			*inactive = true;
		}
		true
	}

	/// Push the order literals witnessing the current bounds of `var`.
	fn push_bound_witnesses(
		&self,
		solver: &mut Solver,
		cc: &mut dyn ClauseCreator,
		var: VarRef,
		lb: IntVal,
		ub: IntVal,
		clause: &mut Vec<Lit>,
	) {
		if lb > solver.var_state(var).min_bound() {
			clause.push(solver.get_literal(cc, var, lb - 1));
		}
		if ub < solver.var_state(var).max_bound() {
			clause.push(-solver.get_literal(cc, var, ub));
		}
	}

	/// Translate the constraint into its chain-clause encoding, removing it
	/// from the propagation state when the clause budget allows.
	pub(crate) fn translate(
		&mut self,
		solver: &mut Solver,
		cc: &mut InitClauseCreator<'_>,
		con: &DomConstraint,
		budget: u64,
	) -> (bool, bool) {
		let domain = IntervalSet::from(con.ranges());
		// the encoding posts two implications per interval
		if 2 * domain.len() as u64 > budget {
			return (true, false);
		}
		let ok = solver.add_dom(cc, con.literal(), con.var(), &domain);
		(ok, true)
	}
}
