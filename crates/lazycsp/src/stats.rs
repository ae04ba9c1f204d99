//! Statistics exposed to the host.

use std::time::Instant;

use crate::num::SumVal;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
/// Solver (per-thread) specific statistics.
pub struct SolverStatistics {
	/// Wall time spent in `propagate`, in seconds.
	pub time_propagate: f64,
	/// Wall time spent in `check`, in seconds.
	pub time_check: f64,
	/// Wall time spent in `undo`, in seconds.
	pub time_undo: f64,
	/// Number of reasons refined to weaker order literals.
	pub refined_reason: u64,
	/// Number of order literals introduced while building reasons.
	pub introduced_reason: u64,
	/// Number of order literals allocated during search.
	pub literals: u64,
}

impl SolverStatistics {
	/// Reset all statistics to their starting values.
	pub fn reset(&mut self) {
		*self = SolverStatistics::default();
	}

	/// Accumulate the given statistics into `self`.
	pub fn accu(&mut self, stats: &SolverStatistics) {
		self.time_propagate += stats.time_propagate;
		self.time_check += stats.time_check;
		self.time_undo += stats.time_undo;
		self.refined_reason += stats.refined_reason;
		self.introduced_reason += stats.introduced_reason;
		self.literals += stats.literals;
	}
}

#[derive(Clone, Debug, Default, PartialEq)]
/// Propagator specific statistics.
pub struct Statistics {
	/// Wall time spent in `init`, in seconds.
	pub time_init: f64,
	/// Wall time spent translating constraints, in seconds.
	pub time_translate: f64,
	/// Wall time spent in init-time simplification, in seconds.
	pub time_simplify: f64,
	/// Number of integer variables.
	pub num_variables: u64,
	/// Number of constraints.
	pub num_constraints: u64,
	/// Number of clauses added.
	pub num_clauses: u64,
	/// Number of solver literals allocated.
	pub num_literals: u64,
	/// Number of constraints removed by translation.
	pub translate_removed: u64,
	/// Number of constraints added by translation.
	pub translate_added: u64,
	/// Number of clauses added by translation.
	pub translate_clauses: u64,
	/// Number of weight constraints added by translation.
	pub translate_wcs: u64,
	/// Number of literals allocated by translation.
	pub translate_literals: u64,
	/// Objective value of the last model, if any.
	pub cost: Option<SumVal>,
	/// Per-thread statistics.
	pub solver_statistics: Vec<SolverStatistics>,
}

impl Statistics {
	/// Reset all statistics to their starting values.
	pub fn reset(&mut self) {
		let mut solver_statistics = std::mem::take(&mut self.solver_statistics);
		for s in &mut solver_statistics {
			s.reset();
		}
		*self = Statistics {
			solver_statistics,
			..Statistics::default()
		};
	}

	/// Accumulate the given statistics into `self`.
	pub fn accu(&mut self, stats: &Statistics) {
		self.time_init += stats.time_init;
		self.time_translate += stats.time_translate;
		self.time_simplify += stats.time_simplify;
		self.num_variables += stats.num_variables;
		self.num_constraints += stats.num_constraints;
		self.num_clauses += stats.num_clauses;
		self.num_literals += stats.num_literals;
		self.translate_removed += stats.translate_removed;
		self.translate_added += stats.translate_added;
		self.translate_clauses += stats.translate_clauses;
		self.translate_wcs += stats.translate_wcs;
		self.translate_literals += stats.translate_literals;
		self.cost = stats.cost;

		if self.solver_statistics.len() < stats.solver_statistics.len() {
			self.solver_statistics
				.resize_with(stats.solver_statistics.len(), SolverStatistics::default);
		}
		for (acc, s) in self
			.solver_statistics
			.iter_mut()
			.zip(stats.solver_statistics.iter())
		{
			acc.accu(s);
		}
	}

	/// Get the statistics of the given thread, creating them if necessary.
	pub fn solver_stats(&mut self, thread_id: usize) -> &mut SolverStatistics {
		if self.solver_statistics.len() <= thread_id {
			self.solver_statistics
				.resize_with(thread_id + 1, SolverStatistics::default);
		}
		&mut self.solver_statistics[thread_id]
	}
}

#[derive(Debug)]
/// Guard measuring the wall time between its creation and drop.
pub(crate) struct Timer {
	/// Point in time at which the guard was created.
	start: Instant,
}

impl Timer {
	/// Start a new timer.
	pub(crate) fn start() -> Self {
		Timer {
			start: Instant::now(),
		}
	}

	/// Stop the timer and add the elapsed seconds to `target`.
	pub(crate) fn stop(self, target: &mut f64) {
		*target += self.start.elapsed().as_secs_f64();
	}
}
