//! Interfaces through which the propagator talks to the Boolean CDCL oracle.
//!
//! The oracle itself is an external collaborator. During initialization it is
//! reached through [`PropagateInit`], during search through
//! [`PropagateControl`]. Both are wrapped into an implementation of
//! [`ClauseCreator`], the only interface the solver core uses: the init-time
//! creator buffers clauses, weight constraints and minimize literals until
//! they are committed, while the search-time creator forwards directly.

use tracing::trace;

use crate::{config::Config, num::IntVal, stats::Statistics, Clause};

/// Type used for solver and program literals.
///
/// A literal is a non-zero integer; negation is integer negation.
pub type Lit = i32;

/// The literal that is true in every assignment.
pub const TRUE_LIT: Lit = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// The kind of clause passed to the oracle.
pub enum ClauseType {
	#[default]
	/// The clause may be removed by the oracle when it deems it useless.
	Learnt,
	/// The clause is kept for the lifetime of the solve step.
	Static,
	/// The clause is removed when the solver backtracks over it.
	Volatile,
	/// Like [`Self::Volatile`], but never subject to clause deletion.
	VolatileStatic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The direction of implication between the literal of a weight constraint
/// and the constraint itself.
pub enum WeightConstraintType {
	/// The constraint implies the literal.
	LeftImplication,
	/// The literal is equivalent to the constraint.
	Equivalence,
	/// The literal implies the constraint.
	RightImplication,
}

impl WeightConstraintType {
	/// Invert the direction of the implication.
	pub fn invert(self) -> Self {
		match self {
			WeightConstraintType::LeftImplication => WeightConstraintType::RightImplication,
			WeightConstraintType::Equivalence => WeightConstraintType::Equivalence,
			WeightConstraintType::RightImplication => WeightConstraintType::LeftImplication,
		}
	}
}

/// Read-only view of the oracle's current assignment.
pub trait Assignment {
	/// The current decision level.
	fn decision_level(&self) -> u32;
	/// Whether the given literal is known to the oracle.
	fn has_literal(&self, lit: Lit) -> bool;
	/// The truth value currently assigned to the literal, if any.
	fn value(&self, lit: Lit) -> Option<bool>;
	/// Whether the literal was assigned on the root level.
	fn is_fixed(&self, lit: Lit) -> bool;
	/// Whether all literals are assigned.
	fn is_total(&self) -> bool;
	/// The sequence of literals assigned so far, in assignment order.
	fn trail(&self) -> &[Lit];

	/// Whether the literal is assigned true.
	fn is_true(&self, lit: Lit) -> bool {
		self.value(lit) == Some(true)
	}

	/// Whether the literal is assigned false.
	fn is_false(&self, lit: Lit) -> bool {
		self.value(lit) == Some(false)
	}
}

/// Interface provided by the oracle while the program is being initialized.
pub trait PropagateInit {
	/// Map a program literal to a solver literal.
	fn solver_literal(&mut self, lit: Lit) -> Lit;
	/// Allocate a fresh Boolean variable and return its positive literal.
	fn add_literal(&mut self) -> Lit;
	/// Request notification when the given literal becomes true.
	fn add_watch(&mut self, lit: Lit);
	/// Add a clause; returns `false` on an unresolvable conflict.
	fn add_clause(&mut self, clause: &[Lit]) -> bool;
	/// Add the weight constraint `lit == (Σ wlits ≤ bound)`.
	fn add_weight_constraint(
		&mut self,
		lit: Lit,
		wlits: &[(Lit, IntVal)],
		bound: IntVal,
		ty: WeightConstraintType,
	) -> bool;
	/// Add a literal to the oracle's objective function.
	fn add_minimize(&mut self, lit: Lit, weight: IntVal, priority: IntVal);
	/// Run unit propagation; returns `false` on conflict.
	fn propagate(&mut self) -> bool;
	/// The current (root level) assignment.
	fn assignment(&self) -> &dyn Assignment;
	/// The number of solver threads that will be used.
	fn number_of_threads(&self) -> usize;
}

/// Interface provided by the oracle during search.
pub trait PropagateControl {
	/// The id of the thread this control object belongs to.
	fn thread_id(&self) -> u32;
	/// Allocate a fresh Boolean variable and return its positive literal.
	fn add_literal(&mut self) -> Lit;
	/// Request notification when the given literal becomes true.
	fn add_watch(&mut self, lit: Lit);
	/// Add a clause; returns `false` if the solver has to backtrack.
	fn add_clause(&mut self, clause: &[Lit], ty: ClauseType) -> bool;
	/// Run unit propagation; returns `false` on conflict.
	fn propagate(&mut self) -> bool;
	/// The current assignment.
	fn assignment(&self) -> &dyn Assignment;
}

/// Interface to add solver literals, create clauses, and access the current
/// assignment.
///
/// This is the only interface through which the solver core communicates
/// with the oracle. Conflicts are signalled by `add_clause` or `propagate`
/// returning `false`; they are not errors.
pub trait ClauseCreator {
	/// Allocate a fresh Boolean variable and return its positive literal.
	fn add_literal(&mut self) -> Lit;
	/// Watch the given solver literal.
	fn add_watch(&mut self, lit: Lit);
	/// Call unit propagation on the oracle.
	fn propagate(&mut self) -> bool;
	/// Add the given clause to the oracle.
	fn add_clause(&mut self, clause: &[Lit], ty: ClauseType) -> bool;
	/// Get the current assignment.
	fn assignment(&self) -> &dyn Assignment;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// Phase of initialization, used to attribute statistics.
pub(crate) enum InitState {
	#[default]
	/// Constraints are being collected from the program.
	Init,
	/// Constraints are being translated.
	Translate,
}

/// Weight constraint buffered by the [`InitClauseCreator`].
type WeightConstraint = (Lit, Vec<(Lit, IntVal)>, IntVal, WeightConstraintType);

/// Minimize literal buffered by the [`InitClauseCreator`].
type MinimizeLiteral = (Lit, IntVal, IntVal);

/// A [`ClauseCreator`] used while the program is being initialized.
///
/// Clauses, weight constraints, and minimize literals are buffered and only
/// handed to the oracle when [`Self::commit`] is called (which happens at the
/// latest when propagation is requested).
pub struct InitClauseCreator<'a> {
	/// Phase used to attribute statistics.
	state: InitState,
	/// The oracle's initialization interface.
	init: &'a mut dyn PropagateInit,
	/// Statistics of the propagator.
	stats: &'a mut Statistics,
	/// Buffered clauses.
	clauses: Vec<Clause>,
	/// Buffered weight constraints.
	weight_constraints: Vec<WeightConstraint>,
	/// Buffered minimize literals.
	minimize: Vec<MinimizeLiteral>,
}

impl std::fmt::Debug for InitClauseCreator<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("InitClauseCreator")
			.field("state", &self.state)
			.field("clauses", &self.clauses)
			.field("weight_constraints", &self.weight_constraints)
			.field("minimize", &self.minimize)
			.finish_non_exhaustive()
	}
}

impl<'a> InitClauseCreator<'a> {
	/// Create a new init-time clause creator.
	pub fn new(init: &'a mut dyn PropagateInit, stats: &'a mut Statistics) -> Self {
		Self {
			state: InitState::Init,
			init,
			stats,
			clauses: Vec::new(),
			weight_constraints: Vec::new(),
			minimize: Vec::new(),
		}
	}

	/// Set the phase to attribute allocated literals and clauses to.
	pub(crate) fn set_state(&mut self, state: InitState) {
		self.state = state;
	}

	/// Mutable access to the propagator statistics.
	pub(crate) fn stats_mut(&mut self) -> &mut Statistics {
		self.stats
	}

	/// The number of clauses translation may still create before running
	/// into the total clause budget.
	pub(crate) fn translate_clause_budget(&self, config: &Config) -> u64 {
		config
			.clause_limit_total
			.saturating_sub(self.stats.translate_clauses)
	}

	/// Map a program literal to a solver literal.
	pub fn solver_literal(&mut self, lit: Lit) -> Lit {
		self.init.solver_literal(lit)
	}

	/// The number of solver threads the oracle will use.
	pub(crate) fn num_threads(&self) -> usize {
		self.init.number_of_threads()
	}

	/// Add the weight constraint `lit == (Σ wlits ≤ bound)`.
	pub fn add_weight_constraint(
		&mut self,
		lit: Lit,
		wlits: Vec<(Lit, IntVal)>,
		bound: IntVal,
		ty: WeightConstraintType,
	) -> bool {
		let ass = self.init.assignment();
		if ass.is_true(lit) {
			if ty == WeightConstraintType::LeftImplication {
				return true;
			}
		} else if ass.is_false(lit) && ty == WeightConstraintType::RightImplication {
			return true;
		}

		if self.state == InitState::Translate {
			self.stats.translate_wcs += 1;
		}
		self.weight_constraints.push((lit, wlits, bound, ty));
		true
	}

	/// Add a literal to the objective function.
	pub fn add_minimize(&mut self, lit: Lit, weight: IntVal, priority: IntVal) {
		self.minimize.push((lit, weight, priority));
	}

	/// Commit accumulated constraints to the oracle.
	pub fn commit(&mut self) -> bool {
		for clause in self.clauses.drain(..) {
			if !self.init.add_clause(&clause) {
				return false;
			}
		}

		for (lit, wlits, bound, ty) in self.weight_constraints.drain(..) {
			// The oracle expects the constraint in `≥` form.
			if !self
				.init
				.add_weight_constraint(-lit, &wlits, bound + 1, ty.invert())
			{
				return false;
			}
		}

		for (lit, weight, priority) in self.minimize.drain(..) {
			self.init.add_minimize(lit, weight, priority);
		}

		true
	}
}

impl ClauseCreator for InitClauseCreator<'_> {
	fn add_literal(&mut self) -> Lit {
		let lit = self.init.add_literal();
		self.stats.num_literals += 1;
		if self.state == InitState::Translate {
			self.stats.translate_literals += 1;
		}
		lit
	}

	fn add_watch(&mut self, lit: Lit) {
		self.init.add_watch(lit);
	}

	fn propagate(&mut self) -> bool {
		self.commit() && self.init.propagate()
	}

	fn add_clause(&mut self, clause: &[Lit], ty: ClauseType) -> bool {
		debug_assert!(!matches!(
			ty,
			ClauseType::Volatile | ClauseType::VolatileStatic
		));
		trace!(?clause, "buffer clause");

		self.stats.num_clauses += 1;
		if self.state == InitState::Translate {
			self.stats.translate_clauses += 1;
		}

		self.clauses.push(clause.to_vec());
		true
	}

	fn assignment(&self) -> &dyn Assignment {
		self.init.assignment()
	}
}

/// A [`ClauseCreator`] used during search, forwarding directly to the oracle.
pub struct ControlClauseCreator<'a> {
	/// The oracle's search-time interface.
	control: &'a mut dyn PropagateControl,
	/// Number of literals allocated through this creator.
	literals: u64,
}

impl std::fmt::Debug for ControlClauseCreator<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ControlClauseCreator")
			.field("literals", &self.literals)
			.finish_non_exhaustive()
	}
}

impl<'a> ControlClauseCreator<'a> {
	/// Create a new search-time clause creator.
	pub fn new(control: &'a mut dyn PropagateControl) -> Self {
		Self {
			control,
			literals: 0,
		}
	}

	/// The number of literals allocated through this creator.
	pub fn literals(&self) -> u64 {
		self.literals
	}
}

impl ClauseCreator for ControlClauseCreator<'_> {
	fn add_literal(&mut self) -> Lit {
		self.literals += 1;
		self.control.add_literal()
	}

	fn add_watch(&mut self, lit: Lit) {
		self.control.add_watch(lit);
	}

	fn propagate(&mut self) -> bool {
		self.control.propagate()
	}

	fn add_clause(&mut self, clause: &[Lit], ty: ClauseType) -> bool {
		trace!(?clause, "add clause");
		self.control.add_clause(clause, ty) && self.propagate()
	}

	fn assignment(&self) -> &dyn Assignment {
		self.control.assignment()
	}
}
