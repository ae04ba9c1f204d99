//! Global and per-solver configuration.

use crate::num::{IntVal, MAX_VAL, MIN_VAL};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// Extra decision heuristics applied on top of the oracle's own heuristic.
pub enum Heuristic {
	#[default]
	/// Leave all decisions to the oracle.
	None,
	/// Prefer an unassigned order literal close to the bound midpoint of the
	/// unassigned variable with the widest remaining range.
	MaxChain,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Per-solver (per-thread) configuration.
pub struct SolverConfig {
	/// Decision heuristic to apply in `decide`.
	pub heuristic: Heuristic,
	/// Sign value used to bias freshly created order literals.
	pub sign_value: IntVal,
	/// Split all domains of variables in `check_full`, not just the first
	/// unassigned one.
	pub split_all: bool,
	/// Propagate intermediate order literals during bound updates so that
	/// learned reasons stay short.
	pub propagate_chain: bool,
	/// Refine reason clauses with weaker order literals where the slack
	/// allows it.
	pub refine_reasons: bool,
	/// Allow introducing new order literals while refining reasons.
	pub refine_introduce: bool,
}

impl Default for SolverConfig {
	fn default() -> Self {
		Self {
			heuristic: Heuristic::None,
			sign_value: 0,
			split_all: false,
			propagate_chain: true,
			refine_reasons: true,
			refine_introduce: true,
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
/// Global configuration of the propagator.
pub struct Config {
	/// Per-solver configurations, indexed by thread id.
	///
	/// Threads without an entry use [`Self::default_solver_config`].
	pub solver_configs: Vec<SolverConfig>,
	/// Configuration used for threads without a specific entry.
	pub default_solver_config: SolverConfig,
	/// Ratio of the estimated clause count over the weight-constraint size
	/// above which translation prefers a weight constraint.
	pub weight_constraint_ratio: f64,
	/// Overall budget of clauses the translation may create.
	pub clause_limit_total: u64,
	/// Number of order literals up to which a single constraint is translated.
	pub clause_limit: u32,
	/// Number of candidate values up to which distinct constraints are
	/// rewritten during translation.
	pub distinct_limit: u32,
	/// Translate the minimize constraint into oracle minimize literals.
	pub translate_minimize: bool,
	/// Smallest value newly created variables may take.
	pub min_int: IntVal,
	/// Largest value newly created variables may take.
	pub max_int: IntVal,
	/// Sort the coefficient/variable pairs of constraints at creation.
	pub sort_constraints: bool,
	/// Restrict translation to the creation of order literals only.
	pub literals_only: bool,
	/// Verify the assignment of total models against all constraints.
	pub check_solution: bool,
	/// Re-check internal invariants of constraint states during propagation.
	pub check_state: bool,
}

impl Config {
	/// Get the configuration for the given thread.
	pub fn solver_config(&self, thread_id: usize) -> &SolverConfig {
		self.solver_configs
			.get(thread_id)
			.unwrap_or(&self.default_solver_config)
	}
}

impl Default for Config {
	fn default() -> Self {
		Self {
			solver_configs: Vec::new(),
			default_solver_config: SolverConfig::default(),
			weight_constraint_ratio: 1.0,
			clause_limit_total: 1_000_000,
			clause_limit: 1000,
			distinct_limit: 1000,
			translate_minimize: false,
			min_int: MIN_VAL,
			max_int: MAX_VAL,
			sort_constraints: true,
			literals_only: false,
			check_solution: true,
			check_state: false,
		}
	}
}
