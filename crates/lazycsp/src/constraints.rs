//! Constraint descriptions and their per-thread propagation states.
//!
//! Constraints themselves are immutable after construction and shared
//! between all solver threads; each thread keeps its own
//! [`ConstraintState`] carrying the incremental propagation state. States
//! reference their constraint by index, never by pointer, so that worker
//! threads can be brought up by cloning the master state.

pub mod distinct;
pub mod dom;
pub mod minimize;
pub mod sum;

use index_vec::define_index_type;

use crate::{
	config::Config,
	constraints::{
		distinct::{DistinctConstraint, DistinctState},
		dom::{DomConstraint, DomState},
		minimize::{MinimizeConstraint, MinimizeState},
		sum::{SumConstraint, SumState},
	},
	num::IntVal,
	oracle::{ClauseCreator, InitClauseCreator, Lit, TRUE_LIT},
	solver::{var_state::VarRef, Solver},
};

define_index_type! {
	/// Identifies a constraint in the propagator's constraint store.
	pub struct ConRef = u32;
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A constraint shared between all solver threads.
pub enum Constraint {
	/// A linear sum constraint `lit -> Σ co·var <= rhs`.
	Sum(SumConstraint),
	/// The linear objective `Σ co·var <= minimize bound`.
	Minimize(MinimizeConstraint),
	/// A distinct constraint over linear expressions.
	Distinct(DistinctConstraint),
	/// A domain constraint `lit -> var ∈ set`.
	Dom(DomConstraint),
}

impl Constraint {
	/// The reification literal attached to the constraint.
	///
	/// The minimize constraint is unconditional and reified by the true
	/// literal.
	pub fn literal(&self) -> Lit {
		match self {
			Constraint::Sum(c) => c.literal(),
			Constraint::Minimize(_) => TRUE_LIT,
			Constraint::Distinct(c) => c.literal(),
			Constraint::Dom(c) => c.literal(),
		}
	}

	/// Whether the constraint may be removed from the propagation state once
	/// it is satisfied.
	///
	/// The minimize constraint must stay active since its bound tightens
	/// during the search.
	pub(crate) fn tagged_removable(&self) -> bool {
		!matches!(self, Constraint::Minimize(_))
	}

	/// The `(variable, hint)` pairs to enter into the variable watch table.
	///
	/// The hint is passed back to [`ConstraintState::update`] on bound
	/// changes; linear constraints use the coefficient, distinct constraints
	/// the element index.
	pub(crate) fn watches(&self) -> Vec<(VarRef, IntVal)> {
		match self {
			Constraint::Sum(c) => c.elements().iter().map(|&(co, var)| (var, co)).collect(),
			Constraint::Minimize(c) => {
				c.elements().iter().map(|&(co, var)| (var, co)).collect()
			}
			Constraint::Distinct(c) => c
				.elements()
				.iter()
				.enumerate()
				.flat_map(|(i, (terms, _))| {
					terms.iter().map(move |&(_, var)| (var, i as IntVal))
				})
				.collect(),
			Constraint::Dom(c) => vec![(c.var(), 0)],
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// The kind specific part of a [`ConstraintState`].
pub(crate) enum StateKind {
	/// State of a [`SumConstraint`].
	Sum(SumState),
	/// State of a [`MinimizeConstraint`].
	Minimize(MinimizeState),
	/// State of a [`DistinctConstraint`].
	Distinct(DistinctState),
	/// State of a [`DomConstraint`].
	Dom(DomState),
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Thread-local propagation state of a constraint.
pub(crate) struct ConstraintState {
	/// The constraint this state belongs to.
	pub(crate) con: ConRef,
	/// `0` if the state is active, otherwise the level the state was marked
	/// inactive on plus one.
	inactive_level: u32,
	/// Whether the state is currently enqueued for propagation.
	pub(crate) in_todo: bool,
	/// Kind specific propagation state.
	kind: StateKind,
}

impl ConstraintState {
	/// Create the state for the given constraint, initializing incremental
	/// quantities from the bounds as currently seen by the watch machinery.
	pub(crate) fn new(con: ConRef, constraint: &Constraint, solver: &Solver) -> Self {
		let kind = match constraint {
			Constraint::Sum(c) => StateKind::Sum(SumState::new(c, solver)),
			Constraint::Minimize(c) => StateKind::Minimize(MinimizeState::new(c, solver)),
			Constraint::Distinct(c) => StateKind::Distinct(DistinctState::new(c)),
			Constraint::Dom(_) => StateKind::Dom(DomState::new()),
		};
		ConstraintState {
			con,
			inactive_level: 0,
			in_todo: false,
			kind,
		}
	}

	/// Whether the state is marked inactive.
	pub(crate) fn marked_inactive(&self) -> bool {
		self.inactive_level > 0
	}

	/// Mark the state inactive on the given level.
	pub(crate) fn mark_inactive(&mut self, level: u32) {
		debug_assert!(!self.marked_inactive());
		self.inactive_level = level + 1;
	}

	/// Mark the state active.
	pub(crate) fn mark_active(&mut self) {
		self.inactive_level = 0;
	}

	/// A state is removable if it has been marked inactive on a lower level.
	pub(crate) fn removable(&self, level: u32) -> bool {
		self.marked_inactive() && self.inactive_level <= level
	}

	/// Inform the state that the bound of a watched variable changed by
	/// `diff`; returns whether the state wants to be enqueued.
	///
	/// The meaning of `i` depends on the constraint kind and matches the
	/// hint the watch was registered with.
	pub(crate) fn update(&mut self, i: IntVal, diff: IntVal) -> bool {
		match &mut self.kind {
			StateKind::Sum(s) => s.update(i, diff),
			StateKind::Minimize(s) => s.update(i, diff),
			StateKind::Distinct(s) => s.update(i, diff),
			StateKind::Dom(_) => true,
		}
	}

	/// Like [`Self::update`], but called when the bound change of a watched
	/// variable is backtracked.
	pub(crate) fn undo(&mut self, i: IntVal, diff: IntVal) {
		match &mut self.kind {
			StateKind::Sum(s) => s.undo(i, diff),
			StateKind::Minimize(s) => s.undo(i, diff),
			StateKind::Distinct(s) => s.undo(i, diff),
			StateKind::Dom(_) => {}
		}
	}

	/// Propagate the constraint; returns `false` on conflict.
	pub(crate) fn propagate(
		&mut self,
		solver: &mut Solver,
		cc: &mut dyn ClauseCreator,
		constraint: &Constraint,
		check_state: bool,
	) -> bool {
		let con = self.con;
		let mut inactive = false;
		let ret = match (&mut self.kind, constraint) {
			(StateKind::Sum(s), Constraint::Sum(c)) => {
				s.propagate(solver, cc, c, check_state, &mut inactive)
			}
			(StateKind::Minimize(s), Constraint::Minimize(c)) => {
				s.propagate(solver, cc, c, check_state)
			}
			(StateKind::Distinct(s), Constraint::Distinct(c)) => {
				s.propagate(solver, cc, c, &mut inactive)
			}
			(StateKind::Dom(s), Constraint::Dom(c)) => s.propagate(solver, cc, c, &mut inactive),
			_ => unreachable!("constraint state does not match constraint"),
		};
		if inactive && !self.marked_inactive() {
			self.mark_inactive(solver.level());
			solver.push_inactive(con);
		}
		ret
	}

	/// Translate the constraint to simpler oracle constructs.
	///
	/// Returns `(ok, remove)`: `ok` is `false` on conflict, and `remove`
	/// requests the removal of the constraint from the propagation state.
	/// Auxiliary constraints introduced by the translation are pushed onto
	/// `added` and subjected to translation as well.
	pub(crate) fn translate(
		&mut self,
		solver: &mut Solver,
		cc: &mut InitClauseCreator<'_>,
		config: &Config,
		constraint: &Constraint,
		budget: u64,
		added: &mut Vec<Constraint>,
	) -> (bool, bool) {
		match (&mut self.kind, constraint) {
			(StateKind::Sum(s), Constraint::Sum(c)) => s.translate(solver, cc, config, c, budget),
			(StateKind::Minimize(_), Constraint::Minimize(_)) => (true, false),
			(StateKind::Distinct(s), Constraint::Distinct(c)) => {
				s.translate(solver, cc, config, c, budget, added)
			}
			(StateKind::Dom(s), Constraint::Dom(c)) => s.translate(solver, cc, c, budget),
			_ => unreachable!("constraint state does not match constraint"),
		}
	}

	/// Check that the constraint is satisfied by the current (total)
	/// assignment of the solver.
	pub(crate) fn check_full(&self, solver: &Solver, constraint: &Constraint) -> bool {
		match constraint {
			Constraint::Sum(c) => c.check_full(solver),
			Constraint::Minimize(_) => true,
			Constraint::Distinct(c) => c.check_full(solver),
			Constraint::Dom(c) => c.check_full(solver),
		}
	}
}
