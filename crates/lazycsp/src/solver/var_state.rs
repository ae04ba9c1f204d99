//! Per-variable state: current bounds, trailed bound history, and the map
//! from values to order literals.

use std::collections::BTreeMap;

use index_vec::define_index_type;

use crate::{
	num::IntVal,
	oracle::Lit,
};

define_index_type! {
	/// Identifies an integer variable in a [`crate::solver::Solver`].
	pub struct VarRef = u32;
}

/// Stack of `(level, bound)` entries; at each decision level a bound is
/// pushed at most once.
type BoundStack = Vec<(u32, IntVal)>;

#[derive(Clone, Debug, PartialEq, Eq)]
/// State to facilitate handling the order literals associated with an
/// integer variable.
///
/// The state maintains a stack of lower and upper bounds, which initially
/// contain the smallest and largest allowed integer value of the variable.
/// The literal stored for a value `v` is true iff `var <= v` holds.
pub struct VarState {
	/// The variable associated with this state.
	var: VarRef,
	/// Current lower bound of the variable.
	lower_bound: IntVal,
	/// Current upper bound of the variable.
	upper_bound: IntVal,
	/// Lower bounds of lower decision levels.
	lower_bound_stack: BoundStack,
	/// Upper bounds of lower decision levels.
	upper_bound_stack: BoundStack,
	/// Map from values to order literals.
	literals: BTreeMap<IntVal, Lit>,
}

impl VarState {
	/// Create an initial state for the given variable with bounds
	/// `[lower_bound, upper_bound]`.
	pub(crate) fn new(var: VarRef, lower_bound: IntVal, upper_bound: IntVal) -> Self {
		Self {
			var,
			lower_bound,
			upper_bound,
			lower_bound_stack: Vec::new(),
			upper_bound_stack: Vec::new(),
			literals: BTreeMap::new(),
		}
	}

	/// Remove all literals and bound history from the state and reset the
	/// bounds to the given values.
	pub(crate) fn reset(&mut self, min_int: IntVal, max_int: IntVal) {
		self.lower_bound = min_int;
		self.upper_bound = max_int;
		self.lower_bound_stack.clear();
		self.upper_bound_stack.clear();
		self.literals.clear();
	}

	/// The variable index of the state.
	pub fn var(&self) -> VarRef {
		self.var
	}

	/// Get the current lower bound.
	pub fn lower_bound(&self) -> IntVal {
		self.lower_bound
	}

	/// Set a new (tighter) lower bound.
	pub(crate) fn set_lower_bound(&mut self, lower_bound: IntVal) {
		debug_assert!(lower_bound >= self.lower_bound);
		self.lower_bound = lower_bound;
	}

	/// Push the current lower bound for the given level.
	pub(crate) fn push_lower(&mut self, level: u32) {
		self.lower_bound_stack.push((level, self.lower_bound));
	}

	/// Whether the lower bound has already been pushed for the given level.
	pub(crate) fn pushed_lower(&self, level: u32) -> bool {
		self.lower_bound_stack
			.last()
			.is_some_and(|&(l, _)| l == level)
	}

	/// Pop and restore the last lower bound from the stack.
	pub(crate) fn pop_lower(&mut self) {
		let (_, bound) = self
			.lower_bound_stack
			.pop()
			.expect("pop_lower called on empty bound stack");
		self.lower_bound = bound;
	}

	/// The smallest value the variable can take in any assignment, i.e. the
	/// lower bound before any decision.
	pub fn min_bound(&self) -> IntVal {
		self.lower_bound_stack
			.first()
			.map_or(self.lower_bound, |&(_, b)| b)
	}

	/// Get the current upper bound.
	pub fn upper_bound(&self) -> IntVal {
		self.upper_bound
	}

	/// Set a new (tighter) upper bound.
	pub(crate) fn set_upper_bound(&mut self, upper_bound: IntVal) {
		debug_assert!(upper_bound <= self.upper_bound);
		self.upper_bound = upper_bound;
	}

	/// Push the current upper bound for the given level.
	pub(crate) fn push_upper(&mut self, level: u32) {
		self.upper_bound_stack.push((level, self.upper_bound));
	}

	/// Whether the upper bound has already been pushed for the given level.
	pub(crate) fn pushed_upper(&self, level: u32) -> bool {
		self.upper_bound_stack
			.last()
			.is_some_and(|&(l, _)| l == level)
	}

	/// Pop and restore the last upper bound from the stack.
	pub(crate) fn pop_upper(&mut self) {
		let (_, bound) = self
			.upper_bound_stack
			.pop()
			.expect("pop_upper called on empty bound stack");
		self.upper_bound = bound;
	}

	/// The largest value the variable can take in any assignment, i.e. the
	/// upper bound before any decision.
	pub fn max_bound(&self) -> IntVal {
		self.upper_bound_stack
			.first()
			.map_or(self.upper_bound, |&(_, b)| b)
	}

	/// Whether the variable is assigned, i.e. the current lower bound equals
	/// the current upper bound.
	pub fn is_assigned(&self) -> bool {
		self.lower_bound == self.upper_bound
	}

	/// Whether the given value is associated with an order literal.
	pub fn has_literal(&self, value: IntVal) -> bool {
		self.literals.contains_key(&value)
	}

	/// Get the literal associated with the given value.
	pub fn get_literal(&self, value: IntVal) -> Option<Lit> {
		self.literals.get(&value).copied()
	}

	/// Associate the given value with an order literal.
	pub(crate) fn set_literal(&mut self, value: IntVal, lit: Lit) {
		let _ = self.literals.insert(value, lit);
	}

	/// Remove the order literal associated with the given value.
	pub(crate) fn unset_literal(&mut self, value: IntVal) {
		let _ = self.literals.remove(&value);
	}

	/// Iterate over all `(value, literal)` pairs in ascending order.
	pub fn lits(&self) -> impl DoubleEndedIterator<Item = (IntVal, Lit)> + '_ {
		self.literals.iter().map(|(&v, &l)| (v, l))
	}

	/// Iterate over the `(value, literal)` pairs with a value greater than
	/// the given value, in ascending order.
	pub fn lits_gt(&self, value: IntVal) -> impl Iterator<Item = (IntVal, Lit)> + '_ {
		self.literals
			.range(value + 1..)
			.map(|(&v, &l)| (v, l))
	}

	/// Iterate over the `(value, literal)` pairs with a value greater than or
	/// equal to the given value, in ascending order.
	pub fn lits_ge(&self, value: IntVal) -> impl Iterator<Item = (IntVal, Lit)> + '_ {
		self.literals.range(value..).map(|(&v, &l)| (v, l))
	}

	/// Iterate over the `(value, literal)` pairs with a value less than the
	/// given value, in descending order.
	pub fn lits_lt(&self, value: IntVal) -> impl Iterator<Item = (IntVal, Lit)> + '_ {
		self.literals.range(..value).rev().map(|(&v, &l)| (v, l))
	}

	/// Iterate over the `(value, literal)` pairs with a value less than or
	/// equal to the given value, in descending order.
	pub fn lits_le(&self, value: IntVal) -> impl Iterator<Item = (IntVal, Lit)> + '_ {
		self.literals.range(..=value).rev().map(|(&v, &l)| (v, l))
	}
}

#[cfg(test)]
mod tests {
	use crate::solver::var_state::{VarRef, VarState};

	#[test]
	fn test_bound_stacks() {
		let mut vs = VarState::new(VarRef::new(0), -10, 10);
		assert_eq!(vs.min_bound(), -10);
		assert_eq!(vs.max_bound(), 10);

		vs.push_lower(1);
		vs.set_lower_bound(-3);
		assert!(vs.pushed_lower(1));
		assert!(!vs.pushed_lower(2));
		vs.push_upper(2);
		vs.set_upper_bound(5);
		assert_eq!(vs.lower_bound(), -3);
		assert_eq!(vs.upper_bound(), 5);
		assert_eq!(vs.min_bound(), -10);
		assert_eq!(vs.max_bound(), 10);

		vs.pop_upper();
		assert_eq!(vs.upper_bound(), 10);
		vs.pop_lower();
		assert_eq!(vs.lower_bound(), -10);
	}

	#[test]
	fn test_literal_ranges() {
		let mut vs = VarState::new(VarRef::new(0), 0, 10);
		vs.set_literal(2, 4);
		vs.set_literal(5, 5);
		vs.set_literal(7, 6);

		assert_eq!(vs.get_literal(5), Some(5));
		assert_eq!(vs.get_literal(3), None);
		assert_eq!(vs.lits_gt(2).collect::<Vec<_>>(), vec![(5, 5), (7, 6)]);
		assert_eq!(
			vs.lits_ge(2).collect::<Vec<_>>(),
			vec![(2, 4), (5, 5), (7, 6)]
		);
		assert_eq!(vs.lits_lt(5).collect::<Vec<_>>(), vec![(2, 4)]);
		assert_eq!(vs.lits_le(5).collect::<Vec<_>>(), vec![(5, 5), (2, 4)]);

		vs.unset_literal(5);
		assert!(!vs.has_literal(5));
	}
}
