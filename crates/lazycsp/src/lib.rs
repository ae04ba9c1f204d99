//! # lazycsp - Order-Literal CSP Propagation for CDCL Solvers
//!
//! lazycsp extends a Conflict-Driven Clause Learning (CDCL) Boolean solver
//! with integer linear constraints, distinct/disjoint constraints, and
//! linear objectives, propagating them in lockstep with the Boolean search.
//! The algebraic bridge between the two worlds is a lazy bidirectional
//! mapping between Boolean literals and bound facts of the form `v <= k`:
//! order literals are only created when a constraint needs to witness a
//! specific bound, letting the Boolean solver learn from failures without
//! the full problem ever being encoded into clauses.
//!
//! The Boolean solver itself is an external collaborator reached through
//! the interfaces in [`oracle`]; this crate contributes the per-thread
//! propagation engine ([`solver`]), the constraint state machines
//! ([`constraints`]), the theory-atom parser ([`parsing`]), and the
//! [`propagator::Propagator`] tying them together.

pub mod config;
pub mod constraints;
pub mod intervals;
pub mod num;
pub mod oracle;
pub mod parsing;
pub mod propagator;
pub mod solver;
pub mod stats;
#[cfg(test)]
pub(crate) mod tests;

/// Type alias for a disjunction of literals (clause).
pub type Clause = Vec<oracle::Lit>;

pub use crate::{
	config::{Config, Heuristic, SolverConfig},
	constraints::{ConRef, Constraint},
	intervals::IntervalSet,
	num::{ArithError, IntVal, SumVal, WideVal, MAX_VAL, MIN_VAL},
	oracle::{
		Assignment, ClauseCreator, ClauseType, ControlClauseCreator, InitClauseCreator, Lit,
		PropagateControl, PropagateInit, WeightConstraintType, TRUE_LIT,
	},
	parsing::{
		parse, simplify, AbstractConstraintBuilder, ParseError, Relation, Symbol, TheoryAtom,
		TheoryElement, TheoryTerm, THEORY,
	},
	propagator::{InitError, ModelExtension, Propagator},
	solver::{
		var_state::{VarRef, VarState},
		Solver,
	},
	stats::{SolverStatistics, Statistics},
};
