//! Test harness for driving the propagator end to end.
//!
//! [`TestOracle`] is a tiny stand-in for the Boolean CDCL oracle: it stores
//! clauses, performs unit propagation, and tracks decision levels. [`solve`]
//! implements a chronological-backtracking enumeration loop that calls the
//! propagator callbacks the way a real oracle would.

use std::collections::HashSet;

use crate::{
	num::IntVal,
	oracle::{
		Assignment, ClauseType, Lit, PropagateControl, PropagateInit, WeightConstraintType,
		TRUE_LIT,
	},
	propagator::{ModelExtension, Propagator},
	Clause,
};

#[derive(Debug, Default)]
/// An in-memory Boolean oracle for tests.
pub(crate) struct TestOracle {
	/// The number of allocated variables; literals use indices `1..=num_vars`.
	num_vars: Lit,
	/// The current assignment, indexed by variable.
	values: Vec<Option<bool>>,
	/// Whether a variable was assigned on the root level.
	fixed: Vec<bool>,
	/// The assigned literals in assignment order.
	trail: Vec<Lit>,
	/// The trail length at the start of each decision level above 0.
	level_offsets: Vec<usize>,
	/// All clauses added so far.
	clauses: Vec<Clause>,
	/// The literals the propagator wants to be notified about.
	watched: HashSet<Lit>,
	/// Weight constraints handed to the oracle (in `>=` form).
	pub(crate) weight_constraints: Vec<(Lit, Vec<(Lit, IntVal)>, IntVal, WeightConstraintType)>,
	/// Objective literals handed to the oracle.
	pub(crate) minimize_literals: Vec<(Lit, IntVal, IntVal)>,
	/// Whether the current state is conflicting.
	conflict: bool,
}

impl TestOracle {
	/// Create a new oracle with the true literal pre-assigned.
	pub(crate) fn new() -> Self {
		let mut oracle = TestOracle {
			num_vars: 0,
			// literal indices are 1-based
			values: vec![None],
			fixed: vec![false],
			..TestOracle::default()
		};
		let t = PropagateInit::add_literal(&mut oracle);
		debug_assert_eq!(t, TRUE_LIT);
		let assigned = oracle.assign(TRUE_LIT);
		debug_assert!(assigned);
		oracle
	}

	/// Create an oracle with `fresh` additional free variables (for program
	/// atoms).
	pub(crate) fn with_vars(fresh: usize) -> Self {
		let mut oracle = TestOracle::new();
		for _ in 0..fresh {
			let _ = PropagateInit::add_literal(&mut oracle);
		}
		oracle
	}

	/// The index into the value tables for the given literal.
	fn index(lit: Lit) -> usize {
		lit.unsigned_abs() as usize
	}

	/// Assign the given literal; returns `false` if it is already assigned
	/// with the opposite value.
	fn assign(&mut self, lit: Lit) -> bool {
		let value = lit > 0;
		match self.values[Self::index(lit)] {
			Some(v) => v == value,
			None => {
				self.values[Self::index(lit)] = Some(value);
				self.fixed[Self::index(lit)] = self.level_offsets.is_empty();
				self.trail.push(lit);
				true
			}
		}
	}

	/// Open a new decision level and assign the given decision literal.
	pub(crate) fn decide(&mut self, lit: Lit) {
		self.level_offsets.push(self.trail.len());
		let ok = self.assign(lit);
		debug_assert!(ok, "decision on assigned literal");
	}

	/// Backtrack one decision level.
	pub(crate) fn undo_level(&mut self) {
		let offset = self
			.level_offsets
			.pop()
			.expect("no decision level to backtrack");
		for lit in self.trail.drain(offset..) {
			self.values[Self::index(lit)] = None;
		}
		self.conflict = false;
	}

	/// Run unit propagation to fixpoint; returns `false` on conflict.
	fn unit_propagate(&mut self) -> bool {
		if self.conflict {
			return false;
		}
		loop {
			let mut changed = false;
			for i in 0..self.clauses.len() {
				let mut unit = None;
				let mut unassigned = 0;
				let mut satisfied = false;
				for &lit in &self.clauses[i] {
					match self.values[Self::index(lit)] {
						Some(v) if v == (lit > 0) => {
							satisfied = true;
							break;
						}
						Some(_) => {}
						None => {
							unassigned += 1;
							unit = Some(lit);
						}
					}
				}
				if satisfied {
					continue;
				}
				match (unassigned, unit) {
					(0, _) => {
						self.conflict = true;
						return false;
					}
					(1, Some(lit)) => {
						let ok = self.assign(lit);
						debug_assert!(ok);
						changed = true;
					}
					_ => {}
				}
			}
			if !changed {
				return true;
			}
		}
	}

	/// Allocate a fresh Boolean variable.
	fn new_var(&mut self) -> Lit {
		self.num_vars += 1;
		self.values.push(None);
		self.fixed.push(false);
		self.num_vars
	}

	/// Add a clause; returns `false` if it is conflicting under the current
	/// assignment.
	fn add_clause_(&mut self, clause: &[Lit]) -> bool {
		self.clauses.push(clause.to_vec());
		if clause
			.iter()
			.all(|&lit| self.values[Self::index(lit)] == Some(lit < 0))
		{
			self.conflict = true;
			return false;
		}
		true
	}

	/// Whether the model satisfies all stored weight constraints.
	fn check_weight_constraints(&self) -> bool {
		self.weight_constraints.iter().all(|(lit, wlits, bound, ty)| {
			let sum: i64 = wlits
				.iter()
				.filter(|&&(l, _)| self.values[Self::index(l)] == Some(l > 0))
				.map(|&(_, w)| w as i64)
				.sum();
			let holds = sum >= *bound as i64;
			let lit_true = self.values[Self::index(*lit)] == Some(*lit > 0);
			match ty {
				WeightConstraintType::RightImplication => !lit_true || holds,
				WeightConstraintType::LeftImplication => !holds || lit_true,
				WeightConstraintType::Equivalence => lit_true == holds,
			}
		})
	}
}

impl Assignment for TestOracle {
	fn decision_level(&self) -> u32 {
		self.level_offsets.len() as u32
	}

	fn has_literal(&self, lit: Lit) -> bool {
		lit != 0 && lit.abs() <= self.num_vars
	}

	fn value(&self, lit: Lit) -> Option<bool> {
		self.values[Self::index(lit)].map(|v| if lit < 0 { !v } else { v })
	}

	fn is_fixed(&self, lit: Lit) -> bool {
		self.values[Self::index(lit)].is_some() && self.fixed[Self::index(lit)]
	}

	fn is_total(&self) -> bool {
		self.values[1..].iter().all(Option::is_some)
	}

	fn trail(&self) -> &[Lit] {
		&self.trail
	}
}

impl PropagateInit for TestOracle {
	fn solver_literal(&mut self, lit: Lit) -> Lit {
		lit
	}

	fn add_literal(&mut self) -> Lit {
		self.new_var()
	}

	fn add_watch(&mut self, lit: Lit) {
		let _ = self.watched.insert(lit);
	}

	fn add_clause(&mut self, clause: &[Lit]) -> bool {
		self.add_clause_(clause) && self.unit_propagate()
	}

	fn add_weight_constraint(
		&mut self,
		lit: Lit,
		wlits: &[(Lit, IntVal)],
		bound: IntVal,
		ty: WeightConstraintType,
	) -> bool {
		self.weight_constraints
			.push((lit, wlits.to_vec(), bound, ty));
		true
	}

	fn add_minimize(&mut self, lit: Lit, weight: IntVal, priority: IntVal) {
		self.minimize_literals.push((lit, weight, priority));
	}

	fn propagate(&mut self) -> bool {
		self.unit_propagate()
	}

	fn assignment(&self) -> &dyn Assignment {
		self
	}

	fn number_of_threads(&self) -> usize {
		1
	}
}

impl PropagateControl for TestOracle {
	fn thread_id(&self) -> u32 {
		0
	}

	fn add_literal(&mut self) -> Lit {
		self.new_var()
	}

	fn add_watch(&mut self, lit: Lit) {
		let _ = self.watched.insert(lit);
	}

	fn add_clause(&mut self, clause: &[Lit], _ty: ClauseType) -> bool {
		self.add_clause_(clause)
	}

	fn propagate(&mut self) -> bool {
		self.unit_propagate()
	}

	fn assignment(&self) -> &dyn Assignment {
		self
	}
}

#[derive(Clone, Debug)]
/// A model found by [`solve`].
pub(crate) struct TestModel {
	/// The Boolean assignment at the time of the model.
	pub(crate) values: Vec<Option<bool>>,
	/// The model extension reported by the propagator.
	pub(crate) extension: ModelExtension,
}

/// Run propagation to fixpoint, delivering watched trail literals to the
/// propagator; returns `false` on conflict.
fn fixpoint(
	propagator: &mut Propagator,
	oracle: &mut TestOracle,
	delivered: &mut usize,
	notified: &mut [bool],
) -> bool {
	loop {
		if !oracle.unit_propagate() {
			return false;
		}
		if *delivered < oracle.trail.len() {
			let changes: Vec<Lit> = oracle.trail[*delivered..]
				.iter()
				.copied()
				.filter(|lit| oracle.watched.contains(lit))
				.collect();
			*delivered = oracle.trail.len();
			if !changes.is_empty() {
				if let Some(flag) = notified.last_mut() {
					*flag = true;
				}
				propagator.propagate(oracle, &changes);
				if oracle.conflict {
					return false;
				}
			}
			continue;
		}
		let before = oracle.trail.len();
		propagator.check(oracle);
		if oracle.conflict {
			return false;
		}
		if oracle.trail.len() == before && *delivered == oracle.trail.len() {
			return true;
		}
	}
}

/// Enumerate up to `limit` models of the program loaded into the propagator,
/// calling `on_model` the way a host would.
pub(crate) fn solve(
	propagator: &mut Propagator,
	oracle: &mut TestOracle,
	limit: usize,
) -> Vec<TestModel> {
	let mut models = Vec::new();
	let mut delivered = 0;
	// decision literal and whether both phases have been tried, per level
	let mut decisions: Vec<(Lit, bool)> = Vec::new();
	let mut notified: Vec<bool> = Vec::new();

	/// Undo the top decision level of the oracle and the propagator.
	fn backtrack(
		propagator: &mut Propagator,
		oracle: &mut TestOracle,
		delivered: &mut usize,
		decisions: &mut Vec<(Lit, bool)>,
		notified: &mut Vec<bool>,
	) -> bool {
		loop {
			let Some((lit, exhausted)) = decisions.pop() else {
				return false;
			};
			let was_notified = notified.pop().expect("notified stack out of sync");
			oracle.undo_level();
			if was_notified {
				propagator.undo(0);
			}
			*delivered = (*delivered).min(oracle.trail.len());
			if !exhausted {
				oracle.decide(-lit);
				decisions.push((-lit, true));
				notified.push(false);
				return true;
			}
		}
	}

	loop {
		if !fixpoint(propagator, oracle, &mut delivered, &mut notified) {
			if !backtrack(
				propagator,
				oracle,
				&mut delivered,
				&mut decisions,
				&mut notified,
			) {
				return models;
			}
			continue;
		}

		if oracle.is_total() {
			if oracle.check_weight_constraints() {
				models.push(TestModel {
					values: oracle.values.clone(),
					extension: propagator.on_model(0),
				});
				if models.len() >= limit {
					return models;
				}
			}
			if !backtrack(
				propagator,
				oracle,
				&mut delivered,
				&mut decisions,
				&mut notified,
			) {
				return models;
			}
			continue;
		}

		// branch on the first unassigned variable, negative phase first
		let var = (1..=oracle.num_vars)
			.find(|&v| oracle.values[v as usize].is_none())
			.expect("non-total assignment must have an unassigned variable");
		let lit = propagator.decide(0, oracle, -var);
		oracle.decide(lit);
		decisions.push((lit, false));
		notified.push(false);
	}
}

mod e2e {
	use expect_test::expect;
	use tracing_test::traced_test;

	use crate::{
		config::Config,
		constraints::Constraint,
		oracle::{ControlClauseCreator, TRUE_LIT},
		parsing::{Relation, Symbol, TheoryAtom, TheoryElement, TheoryTerm},
		propagator::Propagator,
		solver::Solver,
		tests::{solve, TestModel, TestOracle},
	};

	/// Build a constraint atom `&<term>{<elems>} <rel> <rhs>`.
	fn atom(term: &str, elems: &[&str], rel: Relation, rhs: i32, literal: i32) -> TheoryAtom {
		TheoryAtom {
			term: term.to_owned(),
			elements: elems
				.iter()
				.map(|name| TheoryElement::term(TheoryTerm::Symbol((*name).to_owned())))
				.collect(),
			guard: Some((rel, TheoryTerm::Number(rhs))),
			literal,
		}
	}

	/// Build the atom `&dom{<l>..<r>} = <var>`.
	fn dom_atom(l: i32, r: i32, var: &str, literal: i32) -> TheoryAtom {
		TheoryAtom {
			term: "dom".to_owned(),
			elements: vec![TheoryElement::term(TheoryTerm::op(
				"..",
				vec![TheoryTerm::Number(l), TheoryTerm::Number(r)],
			))],
			guard: Some((Relation::Equal, TheoryTerm::Symbol(var.to_owned()))),
			literal,
		}
	}

	/// A configuration with a small integer range that keeps the search in
	/// propagation mode (no translation to weight constraints or pairwise
	/// rewrites).
	fn small_config(min_int: i32, max_int: i32) -> Config {
		Config {
			min_int,
			max_int,
			clause_limit: 0,
			distinct_limit: 0,
			..Config::default()
		}
	}

	/// Render the shown symbols of the models, sorted.
	fn model_symbols(models: &[TestModel]) -> Vec<String> {
		let mut out: Vec<String> = models
			.iter()
			.map(|m| {
				m.extension
					.symbols
					.iter()
					.map(ToString::to_string)
					.collect::<Vec<_>>()
					.join(" ")
			})
			.collect();
		out.sort();
		out
	}

	#[test]
	fn test_unit_bound_propagation() {
		let mut oracle = TestOracle::new();
		let mut propagator = Propagator::new(small_config(0, 10));
		let atoms = vec![
			atom("__sum_h", &["x"], Relation::GreaterEqual, 3, TRUE_LIT),
			atom("__sum_h", &["x"], Relation::LessEqual, 5, TRUE_LIT),
		];
		propagator.init(&mut oracle, &atoms).unwrap();

		let x = propagator
			.get_index(&Symbol::constant("x"))
			.expect("variable must exist");
		let vs = propagator.solver(0).var_state(x);
		assert_eq!(vs.lower_bound(), 3);
		assert_eq!(vs.upper_bound(), 5);

		let models = solve(&mut propagator, &mut oracle, usize::MAX);
		let symbols = model_symbols(&models);
		assert_eq!(symbols, ["csp(x,3)", "csp(x,4)", "csp(x,5)"]);
	}

	#[test]
	#[traced_test]
	fn test_reified_implication() {
		let mut oracle = TestOracle::with_vars(1);
		let a = 2;
		let mut propagator = Propagator::new(small_config(0, 10));
		let atoms = vec![
			dom_atom(1, 6, "x", TRUE_LIT),
			atom("__sum_h", &["x"], Relation::GreaterEqual, 5, a),
		];
		propagator.init(&mut oracle, &atoms).unwrap();

		let models = solve(&mut propagator, &mut oracle, usize::MAX);
		// six models with `a` false, two (x in {5, 6}) with `a` true
		assert_eq!(models.len(), 8);
		for model in &models {
			let x = model.extension.symbols[0].to_string();
			if model.values[a as usize] == Some(true) {
				assert!(x == "csp(x,5)" || x == "csp(x,6)", "unexpected {x}");
			}
		}
	}

	#[test]
	fn test_distinct_pigeonhole() {
		let mut oracle = TestOracle::new();
		let mut propagator = Propagator::new(small_config(0, 10));
		let atoms = vec![
			dom_atom(1, 2, "x", TRUE_LIT),
			dom_atom(1, 2, "y", TRUE_LIT),
			dom_atom(1, 2, "z", TRUE_LIT),
			TheoryAtom {
				term: "distinct".to_owned(),
				elements: vec![
					TheoryElement::term(TheoryTerm::Symbol("x".to_owned())),
					TheoryElement::term(TheoryTerm::Symbol("y".to_owned())),
					TheoryElement::term(TheoryTerm::Symbol("z".to_owned())),
				],
				guard: None,
				literal: TRUE_LIT,
			},
		];
		propagator.init(&mut oracle, &atoms).unwrap();

		let models = solve(&mut propagator, &mut oracle, usize::MAX);
		assert!(models.is_empty(), "pigeonhole program must be unsatisfiable");
	}

	#[test]
	fn test_distinct_satisfiable() {
		let mut oracle = TestOracle::new();
		let mut propagator = Propagator::new(small_config(0, 10));
		let atoms = vec![
			dom_atom(1, 2, "x", TRUE_LIT),
			dom_atom(1, 2, "y", TRUE_LIT),
			TheoryAtom {
				term: "distinct".to_owned(),
				elements: vec![
					TheoryElement::term(TheoryTerm::Symbol("x".to_owned())),
					TheoryElement::term(TheoryTerm::Symbol("y".to_owned())),
					TheoryElement::term(TheoryTerm::Symbol("z".to_owned())),
				],
				guard: None,
				literal: TRUE_LIT,
			},
			dom_atom(1, 3, "z", TRUE_LIT),
		];
		propagator.init(&mut oracle, &atoms).unwrap();

		let models = solve(&mut propagator, &mut oracle, usize::MAX);
		let symbols = model_symbols(&models);
		expect![[r#"
		    [
		        "csp(x,1) csp(y,2) csp(z,3)",
		        "csp(x,2) csp(y,1) csp(z,3)",
		    ]
"#]]
		.assert_debug_eq(&symbols);
	}

	#[test]
	fn test_distinct_translated_pairwise() {
		let mut oracle = TestOracle::new();
		// the default distinct limit admits the pairwise rewrite
		let mut propagator = Propagator::new(Config {
			min_int: 0,
			max_int: 10,
			clause_limit: 0,
			..Config::default()
		});
		let atoms = vec![
			dom_atom(1, 2, "x", TRUE_LIT),
			dom_atom(1, 2, "y", TRUE_LIT),
			dom_atom(1, 2, "z", TRUE_LIT),
			TheoryAtom {
				term: "distinct".to_owned(),
				elements: vec![
					TheoryElement::term(TheoryTerm::Symbol("x".to_owned())),
					TheoryElement::term(TheoryTerm::Symbol("y".to_owned())),
					TheoryElement::term(TheoryTerm::Symbol("z".to_owned())),
				],
				guard: None,
				literal: TRUE_LIT,
			},
		];
		propagator.init(&mut oracle, &atoms).unwrap();

		// the distinct constraint was rewritten into sum disequalities
		assert!(propagator
			.constraint_store()
			.iter()
			.flatten()
			.all(|c| !matches!(c, Constraint::Distinct(_))));
		assert!(propagator
			.constraint_store()
			.iter()
			.flatten()
			.any(|c| matches!(c, Constraint::Sum(_))));

		let models = solve(&mut propagator, &mut oracle, usize::MAX);
		assert!(models.is_empty(), "pigeonhole program must be unsatisfiable");
	}

	#[test]
	fn test_binary_distinct_rewrite() {
		let mut oracle = TestOracle::new();
		let mut propagator = Propagator::new(small_config(0, 3));
		let atoms = vec![
			dom_atom(1, 2, "x", TRUE_LIT),
			dom_atom(1, 2, "y", TRUE_LIT),
			TheoryAtom {
				term: "distinct".to_owned(),
				elements: vec![
					TheoryElement::term(TheoryTerm::Symbol("x".to_owned())),
					TheoryElement::term(TheoryTerm::Symbol("y".to_owned())),
				],
				guard: None,
				literal: TRUE_LIT,
			},
		];
		propagator.init(&mut oracle, &atoms).unwrap();

		// the binary constraint is encoded as a sum disequality
		assert!(propagator
			.constraint_store()
			.iter()
			.flatten()
			.all(|c| !matches!(c, Constraint::Distinct(_))));

		let models = solve(&mut propagator, &mut oracle, usize::MAX);
		let symbols = model_symbols(&models);
		assert_eq!(symbols, ["csp(x,1) csp(y,2)", "csp(x,2) csp(y,1)"]);
	}

	#[test]
	#[traced_test]
	fn test_minimize_monotonicity() {
		let mut oracle = TestOracle::new();
		let mut propagator = Propagator::new(small_config(0, 5));
		let atoms = vec![
			dom_atom(0, 5, "x", TRUE_LIT),
			atom("__sum_h", &["x"], Relation::GreaterEqual, 3, TRUE_LIT),
			TheoryAtom {
				term: "minimize".to_owned(),
				elements: vec![TheoryElement::term(TheoryTerm::Symbol("x".to_owned()))],
				guard: None,
				literal: TRUE_LIT,
			},
		];
		propagator.init(&mut oracle, &atoms).unwrap();
		assert!(propagator.has_minimize());

		let models = solve(&mut propagator, &mut oracle, usize::MAX);
		assert!(!models.is_empty());
		// the bound decreases strictly with every model and reaches the
		// optimum
		let costs: Vec<i64> = models
			.iter()
			.map(|m| m.extension.cost.expect("objective must be reported"))
			.collect();
		assert!(costs.windows(2).all(|w| w[1] < w[0]), "costs {costs:?}");
		assert_eq!(*costs.last().expect("at least one model"), 3);
	}

	#[test]
	fn test_midpoint_branching() {
		let mut oracle = TestOracle::new();
		let mut propagator = Propagator::new(small_config(-3, 3));
		let atoms = vec![TheoryAtom {
			term: "show".to_owned(),
			elements: vec![TheoryElement::term(TheoryTerm::Symbol("x".to_owned()))],
			guard: None,
			literal: TRUE_LIT,
		}];
		propagator.init(&mut oracle, &atoms).unwrap();

		let x = propagator
			.get_index(&Symbol::constant("x"))
			.expect("variable must exist");

		// the assignment is trivially total, so the first check introduces
		// the order literal at the midpoint with positive bias
		propagator.check(&mut oracle);
		let fresh = oracle.num_vars;
		assert_eq!(
			propagator.solver(0).var_state(x).get_literal(0),
			Some(-fresh)
		);

		let models = solve(&mut propagator, &mut oracle, usize::MAX);
		assert_eq!(models.len(), 7);
	}

	#[test]
	fn test_strict_body_constraint() {
		// `a :- &sum{x} <= 2.` makes the atom literal equivalent to the
		// bound fact
		let mut oracle = TestOracle::with_vars(1);
		let a = 2;
		let mut propagator = Propagator::new(small_config(0, 4));
		let atoms = vec![
			dom_atom(0, 4, "x", TRUE_LIT),
			atom("__sum_b", &["x"], Relation::LessEqual, 2, a),
		];
		propagator.init(&mut oracle, &atoms).unwrap();

		let models = solve(&mut propagator, &mut oracle, usize::MAX);
		assert_eq!(models.len(), 5);
		for model in &models {
			let value: i32 = match &model.extension.symbols[0] {
				Symbol::Fun { args, .. } => match &args[1] {
					Symbol::Num(v) => *v,
					_ => unreachable!(),
				},
				_ => unreachable!(),
			};
			assert_eq!(model.values[a as usize], Some(value <= 2));
		}
	}

	#[test]
	fn test_propagate_undo_round_trip() {
		let mut oracle = TestOracle::new();
		let mut solver = Solver::new(crate::config::SolverConfig::default());
		let x = solver.add_variable(0, 10);
		let y = solver.add_variable(0, 10);
		let mut constraints = crate::solver::ConstraintVec::new();
		let con = constraints.push(Some(Constraint::Sum(
			crate::constraints::sum::SumConstraint::new(TRUE_LIT, 7, vec![(1, x), (1, y)], true),
		)));
		solver.add_constraint(con, constraints[con].as_ref().unwrap());

		let lit = {
			let mut cc = ControlClauseCreator::new(&mut oracle);
			solver.get_literal(&mut cc, x, 5)
		};

		// a closure driving one decision plus propagation and undoing it
		let mut round_trip = |solver: &mut Solver, oracle: &mut TestOracle| {
			oracle.decide(-lit);
			{
				let mut cc = ControlClauseCreator::new(oracle);
				assert!(solver.propagate(&mut cc, &[-lit]));
				assert!(solver.check(&mut cc, &constraints, true));
			}
			assert_eq!(solver.var_state(x).lower_bound(), 6);
			solver.undo();
			oracle.undo_level();
		};

		// The first round may lazily allocate order literals while deriving
		// bounds; the snapshot is taken afterwards so that the second round
		// must restore the state bit-identically.
		round_trip(&mut solver, &mut oracle);
		let before_x = solver.var_state(x).clone();
		let before_y = solver.var_state(y).clone();
		round_trip(&mut solver, &mut oracle);

		assert_eq!(solver.var_state(x), &before_x);
		assert_eq!(solver.var_state(y), &before_y);
		assert_eq!(solver.var_state(x).lower_bound(), 0);
		assert_eq!(solver.var_state(x).upper_bound(), 10);
	}

	#[test]
	fn test_order_literal_boundaries() {
		let mut oracle = TestOracle::new();
		let mut solver = Solver::new(crate::config::SolverConfig::default());
		let x = solver.add_variable(0, 10);

		let mut cc = ControlClauseCreator::new(&mut oracle);
		// values outside the initial bounds map to the true/false literal
		// without allocation
		assert_eq!(solver.get_literal(&mut cc, x, -1), -TRUE_LIT);
		assert_eq!(solver.get_literal(&mut cc, x, 10), TRUE_LIT);
		drop(cc);
		assert_eq!(oracle.num_vars, 1);
		let mut cc = ControlClauseCreator::new(&mut oracle);

		// fresh literals for non-negative values are negated
		let lit = solver.get_literal(&mut cc, x, 5);
		assert_eq!(lit, -2);
		// and cached afterwards
		assert_eq!(solver.get_literal(&mut cc, x, 5), lit);
	}

	#[test]
	fn test_dom_gap_propagation() {
		let mut oracle = TestOracle::new();
		let mut propagator = Propagator::new(small_config(0, 20));
		let atoms = vec![TheoryAtom {
			term: "dom".to_owned(),
			elements: vec![
				TheoryElement::term(TheoryTerm::op(
					"..",
					vec![TheoryTerm::Number(1), TheoryTerm::Number(3)],
				)),
				TheoryElement::term(TheoryTerm::op(
					"..",
					vec![TheoryTerm::Number(7), TheoryTerm::Number(9)],
				)),
			],
			guard: Some((Relation::Equal, TheoryTerm::Symbol("x".to_owned()))),
			literal: TRUE_LIT,
		}];
		propagator.init(&mut oracle, &atoms).unwrap();

		// the endpoints clamp the variable
		let x = propagator
			.get_index(&Symbol::constant("x"))
			.expect("variable must exist");
		assert_eq!(propagator.solver(0).var_state(x).lower_bound(), 1);
		assert_eq!(propagator.solver(0).var_state(x).upper_bound(), 9);

		let models = solve(&mut propagator, &mut oracle, usize::MAX);
		let symbols = model_symbols(&models);
		assert_eq!(
			symbols,
			[
				"csp(x,1)", "csp(x,2)", "csp(x,3)", "csp(x,7)", "csp(x,8)", "csp(x,9)"
			]
		);
	}

	#[test]
	fn test_sum_translated_to_weight_constraint() {
		let mut oracle = TestOracle::new();
		// the default clause limit is large enough to translate everything
		let mut propagator = Propagator::new(Config {
			min_int: 0,
			max_int: 10,
			..Config::default()
		});
		let atoms = vec![
			dom_atom(1, 3, "x", TRUE_LIT),
			dom_atom(1, 3, "y", TRUE_LIT),
			atom("__sum_h", &["x", "y"], Relation::LessEqual, 4, TRUE_LIT),
		];
		propagator.init(&mut oracle, &atoms).unwrap();

		// all constraints were removed from the propagation state
		assert_eq!(propagator.constraint_store().iter().flatten().count(), 0);
		assert_eq!(oracle.weight_constraints.len(), 1);

		let models = solve(&mut propagator, &mut oracle, usize::MAX);
		let symbols = model_symbols(&models);
		assert_eq!(
			symbols,
			[
				"csp(x,1) csp(y,1)",
				"csp(x,1) csp(y,2)",
				"csp(x,1) csp(y,3)",
				"csp(x,2) csp(y,1)",
				"csp(x,2) csp(y,2)",
				"csp(x,3) csp(y,1)",
			]
		);
	}

	#[test]
	fn test_nonlinear_product() {
		let mut oracle = TestOracle::new();
		// a clause limit that admits the product case split but keeps the
		// linear constraints in propagation mode
		let mut propagator = Propagator::new(Config {
			min_int: 0,
			max_int: 10,
			clause_limit: 4,
			..Config::default()
		});
		let atoms = vec![
			dom_atom(1, 3, "x", TRUE_LIT),
			dom_atom(1, 3, "y", TRUE_LIT),
			TheoryAtom {
				term: "__nsum_h".to_owned(),
				elements: vec![TheoryElement::term(TheoryTerm::op(
					"*",
					vec![
						TheoryTerm::Symbol("x".to_owned()),
						TheoryTerm::Symbol("y".to_owned()),
					],
				))],
				guard: Some((Relation::LessEqual, TheoryTerm::Number(6))),
				literal: TRUE_LIT,
			},
		];
		propagator.init(&mut oracle, &atoms).unwrap();

		let models = solve(&mut propagator, &mut oracle, usize::MAX);
		assert_eq!(models.len(), 8);
		for model in &models {
			let value = |i: usize| match &model.extension.symbols[i] {
				Symbol::Fun { args, .. } => match &args[1] {
					Symbol::Num(v) => *v,
					_ => unreachable!(),
				},
				_ => unreachable!(),
			};
			assert!(value(0) * value(1) <= 6);
		}
	}

	#[test]
	fn test_update_literal_fact_replacement() {
		let mut oracle = TestOracle::new();
		let mut solver = Solver::new(crate::config::SolverConfig::default());
		let x = solver.add_variable(0, 10);

		let mut cc = ControlClauseCreator::new(&mut oracle);
		let lit = solver.get_literal(&mut cc, x, 5);
		// attaching a truth value on level 0 replaces the literal by the
		// fact and posts the old literal as a unit clause
		let (ok, fact) = solver.update_literal(&mut cc, x, 5, Some(true));
		assert!(ok);
		assert_eq!(fact, TRUE_LIT);
		assert_eq!(solver.var_state(x).get_literal(5), Some(TRUE_LIT));
		drop(cc);
		assert_eq!(crate::oracle::Assignment::value(&oracle, lit), Some(true));
	}

	#[test]
	fn test_multi_shot_update_maps_fixed_literals() {
		let mut oracle = TestOracle::new();
		let mut solver = Solver::new(crate::config::SolverConfig::default());
		let x = solver.add_variable(0, 10);

		let lit = {
			let mut cc = ControlClauseCreator::new(&mut oracle);
			solver.get_literal(&mut cc, x, 5)
		};
		// fix the literal on the root level, as if solving had derived it
		let assigned = crate::oracle::PropagateInit::add_clause(&mut oracle, &[lit]);
		assert!(assigned);

		let mut cc = ControlClauseCreator::new(&mut oracle);
		solver.update(&mut cc);
		assert_eq!(solver.var_state(x).get_literal(5), Some(TRUE_LIT));
	}

	#[test]
	fn test_max_chain_decide() {
		let mut oracle = TestOracle::new();
		let mut solver = Solver::new(crate::config::SolverConfig {
			heuristic: crate::config::Heuristic::MaxChain,
			..crate::config::SolverConfig::default()
		});
		let narrow = solver.add_variable(0, 2);
		let wide = solver.add_variable(0, 10);

		let mut cc = ControlClauseCreator::new(&mut oracle);
		let _ = solver.get_literal(&mut cc, narrow, 1);
		let near = solver.get_literal(&mut cc, wide, 4);
		let far = solver.get_literal(&mut cc, wide, 9);
		drop(cc);

		// the widest unassigned variable wins, and within it the literal
		// closest to the bound midpoint
		assert_ne!(near, far);
		assert_eq!(solver.decide(&oracle, -1), near);
	}

	#[test]
	fn test_disjoint_pairwise() {
		let mut oracle = TestOracle::new();
		let mut propagator = Propagator::new(small_config(0, 4));
		let elements = ["x", "y"]
			.iter()
			.map(|name| {
				TheoryElement::term(TheoryTerm::op(
					"@",
					vec![
						TheoryTerm::Symbol((*name).to_owned()),
						TheoryTerm::Number(2),
					],
				))
			})
			.collect();
		let atoms = vec![
			dom_atom(0, 2, "x", TRUE_LIT),
			dom_atom(0, 2, "y", TRUE_LIT),
			TheoryAtom {
				term: "disjoint".to_owned(),
				elements,
				guard: None,
				literal: TRUE_LIT,
			},
		];
		propagator.init(&mut oracle, &atoms).unwrap();

		let models = solve(&mut propagator, &mut oracle, usize::MAX);
		let symbols = model_symbols(&models);
		// tasks of length two starting in [0, 2] must not overlap
		assert_eq!(symbols, ["csp(x,0) csp(y,2)", "csp(x,2) csp(y,0)"]);
	}
}
