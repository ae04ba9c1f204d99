//! Parsing and normalization of theory atoms.
//!
//! The grounder hands over theory atoms in the shape declared by [`THEORY`];
//! this module evaluates their terms with checked arithmetic, canonicalizes
//! the coefficient vectors, rewrites all relations into `<=` form, and feeds
//! the result into an [`AbstractConstraintBuilder`].

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

use itertools::Itertools;
use thiserror::Error;

use crate::{
	intervals::IntervalSet,
	num::{
		check_valid_value, safe_pow, ArithError, CheckedArith, IntVal, SumVal, MAX_VAL, MIN_VAL,
	},
	oracle::{Lit, TRUE_LIT},
	solver::var_state::VarRef,
};

/// The theory definition that has to be loaded to use CSP constraints.
pub const THEORY: &str = r"
#theory cp {
    var_term  { };
    sum_term {
    -  : 3, unary;
    ** : 2, binary, right;
    *  : 1, binary, left;
    /  : 1, binary, left;
    \  : 1, binary, left;
    +  : 0, binary, left;
    -  : 0, binary, left
    };
    dom_term {
    -  : 4, unary;
    ** : 3, binary, right;
    *  : 2, binary, left;
    /  : 2, binary, left;
    \  : 2, binary, left;
    +  : 1, binary, left;
    -  : 1, binary, left;
    .. : 0, binary, left
    };
    disjoint_term {
    -  : 4, unary;
    ** : 3, binary, right;
    *  : 2, binary, left;
    /  : 2, binary, left;
    \  : 2, binary, left;
    +  : 1, binary, left;
    -  : 1, binary, left;
    @  : 0, binary, left
    };
    &__diff_h/0 : sum_term, {<=}, sum_term, any;
    &__diff_b/0 : sum_term, {<=}, sum_term, any;
    &__sum_h/0 : sum_term, {<=,=,!=,<,>,>=}, sum_term, any;
    &__sum_b/0 : sum_term, {<=,=,!=,<,>,>=}, sum_term, any;
    &__nsum_h/0 : sum_term, {<=,=,!=,<,>,>=}, sum_term, any;
    &__nsum_b/0 : sum_term, {<=,=,!=,<,>,>=}, sum_term, any;
    &minimize/0 : sum_term, directive;
    &maximize/0 : sum_term, directive;
    &show/0 : sum_term, directive;
    &distinct/0 : sum_term, head;
    &disjoint/0 : disjoint_term, head;
    &dom/0 : dom_term, {=}, var_term, head
}.
";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
/// Error raised while parsing theory atoms.
pub enum ParseError {
	/// A theory term does not match the declared grammar.
	#[error("invalid syntax: {0}")]
	Syntax(String),
	/// An arithmetic operation on constants left the supported range.
	#[error(transparent)]
	Arith(#[from] ArithError),
}

/// Raise a [`ParseError::Syntax`] with the given message.
fn syntax_error<T>(message: &str) -> Result<T, ParseError> {
	Err(ParseError::Syntax(message.to_owned()))
}

/// Check a syntactic side condition.
fn check_syntax(condition: bool, message: &str) -> Result<(), ParseError> {
	if condition {
		Ok(())
	} else {
		syntax_error(message)
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// A ground symbol naming an integer variable (or a plain number).
pub enum Symbol {
	/// A numeric constant.
	Num(IntVal),
	/// A (possibly classically negated) function symbol; constants are
	/// functions without arguments.
	Fun {
		/// The name of the function; empty for tuples.
		name: String,
		/// The evaluated arguments.
		args: Vec<Symbol>,
		/// Whether the symbol is positive.
		positive: bool,
	},
}

impl Symbol {
	/// Create a constant symbol with the given name.
	pub fn constant(name: &str) -> Self {
		Symbol::Fun {
			name: name.to_owned(),
			args: Vec::new(),
			positive: true,
		}
	}

	/// Create a function symbol with the given name and arguments.
	pub fn fun(name: &str, args: Vec<Symbol>) -> Self {
		Symbol::Fun {
			name: name.to_owned(),
			args,
			positive: true,
		}
	}

	/// The name of the symbol, if it is a function.
	pub fn name(&self) -> Option<&str> {
		match self {
			Symbol::Num(_) => None,
			Symbol::Fun { name, .. } => Some(name),
		}
	}

	/// The number of arguments of the symbol.
	pub fn arity(&self) -> usize {
		match self {
			Symbol::Num(_) => 0,
			Symbol::Fun { args, .. } => args.len(),
		}
	}
}

impl Display for Symbol {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Symbol::Num(n) => write!(f, "{n}"),
			Symbol::Fun {
				name,
				args,
				positive,
			} => {
				if !positive {
					write!(f, "-")?;
				}
				write!(f, "{name}")?;
				if !args.is_empty() {
					write!(f, "({})", args.iter().format(","))?;
				}
				Ok(())
			}
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A term of a theory atom.
pub enum TheoryTerm {
	/// A numeric constant.
	Number(IntVal),
	/// A plain symbolic constant.
	Symbol(String),
	/// A function or operator application.
	Function(String, Vec<TheoryTerm>),
	/// A term tuple.
	Tuple(Vec<TheoryTerm>),
}

impl TheoryTerm {
	/// Shorthand to build an operator application.
	pub fn op(name: &str, args: Vec<TheoryTerm>) -> Self {
		TheoryTerm::Function(name.to_owned(), args)
	}

	/// Whether the term matches a function with the given name and arity.
	fn match_(&self, name: &str, arity: usize) -> bool {
		match self {
			TheoryTerm::Symbol(s) => s == name && arity == 0,
			TheoryTerm::Function(s, args) => s == name && args.len() == arity,
			_ => false,
		}
	}
}

impl Display for TheoryTerm {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			TheoryTerm::Number(n) => write!(f, "{n}"),
			TheoryTerm::Symbol(s) => write!(f, "{s}"),
			TheoryTerm::Function(name, args) => match (name.as_str(), args.len()) {
				("-", 1) => write!(f, "-{}", args[0]),
				("+" | "-" | "*" | "/" | "\\" | "**" | ".." | "@", 2) => {
					write!(f, "({}{}{})", args[0], name, args[1])
				}
				_ => write!(f, "{name}({})", args.iter().format(",")),
			},
			TheoryTerm::Tuple(args) => write!(f, "({})", args.iter().format(",")),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// An element of a theory atom.
pub struct TheoryElement {
	/// The terms of the element; only the first term is evaluated, further
	/// terms act as discriminators for multiset semantics.
	pub tuple: Vec<TheoryTerm>,
	/// The condition literals of the element.
	pub condition: Vec<Lit>,
}

impl TheoryElement {
	/// Create an element with a single term and no condition.
	pub fn term(term: TheoryTerm) -> Self {
		TheoryElement {
			tuple: vec![term],
			condition: Vec::new(),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Relation between the element sum and the guard of a theory atom.
pub enum Relation {
	/// `<=`
	LessEqual,
	/// `=`
	Equal,
	/// `!=`
	NotEqual,
	/// `<`
	Less,
	/// `>`
	Greater,
	/// `>=`
	GreaterEqual,
}

impl Display for Relation {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Relation::LessEqual => "<=",
			Relation::Equal => "=",
			Relation::NotEqual => "!=",
			Relation::Less => "<",
			Relation::Greater => ">",
			Relation::GreaterEqual => ">=",
		})
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A ground theory atom as produced by the grounder.
pub struct TheoryAtom {
	/// The (tagged) name of the theory atom, e.g. `__sum_h`.
	pub term: String,
	/// The elements of the atom.
	pub elements: Vec<TheoryElement>,
	/// The guard of the atom, if any.
	pub guard: Option<(Relation, TheoryTerm)>,
	/// The program literal associated with the atom.
	pub literal: Lit,
}

impl Display for TheoryAtom {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "&{}{{", self.term)?;
		let mut sep = "";
		for element in &self.elements {
			write!(f, "{sep}{}", element.tuple.iter().format(","))?;
			sep = "; ";
		}
		write!(f, "}}")?;
		if let Some((rel, term)) = &self.guard {
			write!(f, " {rel} {term}")?;
		}
		Ok(())
	}
}

/// A linear term: a coefficient and an optional variable, where `None`
/// contributes a constant.
pub type CoVar = (IntVal, Option<VarRef>);

/// An ordered sequence of [`CoVar`] pairs representing a linear expression.
pub type CoVarVec = Vec<CoVar>;

/// A product of two variables with a coefficient.
type Product = (IntVal, VarRef, VarRef);

/// CSP builder consumed by [`parse`].
pub trait AbstractConstraintBuilder {
	/// Map a program literal to a solver literal.
	fn solver_literal(&mut self, literal: Lit) -> Lit;
	/// Add a new solver literal.
	fn add_literal(&mut self) -> Lit;
	/// Check whether the given solver literal is true.
	fn is_true(&mut self, literal: Lit) -> bool;
	/// Add a clause over solver literals.
	fn add_clause(&mut self, clause: &[Lit]) -> bool;
	/// Inform the builder that there is a show statement.
	fn add_show(&mut self);
	/// Show variables with the given signature.
	fn show_signature(&mut self, name: &str, arity: usize);
	/// Show the given variable.
	fn show_variable(&mut self, var: VarRef);
	/// Get the variable associated with the given symbol.
	fn add_variable(&mut self, sym: Symbol) -> VarRef;
	/// Add the constraint `lit -> Σ elems <= rhs` (both directions if
	/// `strict`).
	fn add_constraint(
		&mut self,
		lit: Lit,
		elems: Vec<(IntVal, VarRef)>,
		rhs: IntVal,
		strict: bool,
	) -> Result<bool, ParseError>;
	/// Add the non-linear constraint
	/// `lit -> co_ab·va·vb + co_c·vc <= rhs`.
	#[allow(
		clippy::too_many_arguments,
		reason = "mirrors the flat builder interface of the host"
	)]
	fn add_nonlinear(
		&mut self,
		lit: Lit,
		co_ab: IntVal,
		va: VarRef,
		vb: VarRef,
		co_c: IntVal,
		vc: Option<VarRef>,
		rhs: IntVal,
		strict: bool,
	) -> Result<bool, ParseError>;
	/// Extend the objective function.
	fn add_minimize(&mut self, co: IntVal, var: Option<VarRef>);
	/// Add a distinct constraint over the given expressions.
	fn add_distinct(
		&mut self,
		lit: Lit,
		elems: Vec<(Vec<(IntVal, VarRef)>, IntVal)>,
	) -> Result<bool, ParseError>;
	/// Add a disjoint constraint over `(duration, start)` pairs.
	fn add_disjoint(
		&mut self,
		lit: Lit,
		elems: Vec<(IntVal, VarRef)>,
	) -> Result<bool, ParseError>;
	/// Add a domain restriction for the given variable.
	fn add_dom(
		&mut self,
		lit: Lit,
		var: VarRef,
		domain: &IntervalSet,
	) -> Result<bool, ParseError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The flavor of constraint atom being parsed.
enum AtomKind {
	/// A difference constraint (`&__diff_h/b`).
	Diff,
	/// A linear sum constraint (`&__sum_h/b`).
	Sum,
	/// A sum constraint that may contain products (`&__nsum_h/b`).
	NSum,
}

/// Evaluate a theory term to a symbol, folding constant arithmetic.
pub fn evaluate(term: &TheoryTerm) -> Result<Symbol, ParseError> {
	/// Evaluate the arguments of a binary arithmetic operator.
	fn binary(
		a: &TheoryTerm,
		b: &TheoryTerm,
		f: impl FnOnce(IntVal, IntVal) -> Result<IntVal, ArithError>,
	) -> Result<Symbol, ParseError> {
		let Symbol::Num(ea) = evaluate(a)? else {
			return syntax_error("operation on non-numeric term");
		};
		let Symbol::Num(eb) = evaluate(b)? else {
			return syntax_error("operation on non-numeric term");
		};
		Ok(Symbol::Num(f(ea, eb)?))
	}

	match term {
		TheoryTerm::Number(n) => Ok(Symbol::Num(*n)),
		TheoryTerm::Symbol(name) => Ok(Symbol::constant(name)),
		TheoryTerm::Function(name, args) => match (name.as_str(), args.len()) {
			("+", 2) => binary(&args[0], &args[1], CheckedArith::safe_add),
			("-", 2) => binary(&args[0], &args[1], CheckedArith::safe_sub),
			("*", 2) => binary(&args[0], &args[1], CheckedArith::safe_mul),
			("/", 2) => binary(&args[0], &args[1], CheckedArith::safe_div),
			("\\", 2) => binary(&args[0], &args[1], CheckedArith::safe_mod),
			("**", 2) => binary(&args[0], &args[1], safe_pow),
			("-", 1) => match evaluate(&args[0])? {
				Symbol::Num(n) => Ok(Symbol::Num(n.safe_inv()?)),
				Symbol::Fun {
					name,
					args,
					positive,
				} if !name.is_empty() => Ok(Symbol::Fun {
					name,
					args,
					positive: !positive,
				}),
				_ => syntax_error("cannot negate term"),
			},
			("..", 2) => syntax_error("unexpected interval term"),
			_ => {
				let args = args.iter().map(evaluate).collect::<Result<Vec<_>, _>>()?;
				Ok(Symbol::fun(name, args))
			}
		},
		TheoryTerm::Tuple(args) => {
			let args = args.iter().map(evaluate).collect::<Result<Vec<_>, _>>()?;
			Ok(Symbol::Fun {
				name: String::new(),
				args,
				positive: true,
			})
		}
	}
}

/// Parse a single term of a constraint element into coefficient/variable
/// pairs (and products for non-linear atoms).
fn parse_constraint_elem(
	builder: &mut dyn AbstractConstraintBuilder,
	term: &TheoryTerm,
	kind: AtomKind,
	res: &mut CoVarVec,
	products: &mut Vec<Product>,
) -> Result<(), ParseError> {
	if kind == AtomKind::Diff {
		// difference constraints have the fixed shape `a - b`
		if let TheoryTerm::Function(name, args) = term {
			if name == "-" && args.len() == 2 {
				for (arg, sign) in [(&args[0], 1), (&args[1], -1)] {
					match evaluate(arg)? {
						Symbol::Num(n) => res.push((n.safe_mul(sign)?, None)),
						sym => res.push((sign, Some(builder.add_variable(sym)))),
					}
				}
				return Ok(());
			}
		}
		return syntax_error("invalid difference constraint");
	}

	match term {
		TheoryTerm::Number(n) => res.push((*n, None)),
		TheoryTerm::Function(name, args) if name == "+" && args.len() == 2 => {
			parse_constraint_elem(builder, &args[0], kind, res, products)?;
			parse_constraint_elem(builder, &args[1], kind, res, products)?;
		}
		TheoryTerm::Function(name, args) if name == "-" && args.len() == 2 => {
			parse_constraint_elem(builder, &args[0], kind, res, products)?;
			let pos = (res.len(), products.len());
			parse_constraint_elem(builder, &args[1], kind, res, products)?;
			invert_terms(res, products, pos)?;
		}
		TheoryTerm::Function(name, args) if name == "-" && args.len() == 1 => {
			let pos = (res.len(), products.len());
			parse_constraint_elem(builder, &args[0], kind, res, products)?;
			invert_terms(res, products, pos)?;
		}
		TheoryTerm::Function(name, args) if name == "+" && args.len() == 1 => {
			parse_constraint_elem(builder, &args[0], kind, res, products)?;
		}
		TheoryTerm::Function(name, args) if name == "*" && args.len() == 2 => {
			let mut lhs = CoVarVec::new();
			let mut rhs = CoVarVec::new();
			let mut lhs_products = Vec::new();
			let mut rhs_products = Vec::new();
			parse_constraint_elem(builder, &args[0], kind, &mut lhs, &mut lhs_products)?;
			parse_constraint_elem(builder, &args[1], kind, &mut rhs, &mut rhs_products)?;
			check_syntax(
				lhs_products.is_empty() && rhs_products.is_empty(),
				"only products of two variables are supported",
			)?;
			for &(co_l, var_l) in &lhs {
				for &(co_r, var_r) in &rhs {
					let co = co_l.safe_mul(co_r)?;
					match (var_l, var_r) {
						(None, var) | (var, None) => res.push((co, var)),
						(Some(va), Some(vb)) => {
							check_syntax(
								kind == AtomKind::NSum,
								"only linear sum constraints are supported",
							)?;
							products.push((co, va, vb));
						}
					}
				}
			}
		}
		TheoryTerm::Symbol(_) | TheoryTerm::Function(_, _) | TheoryTerm::Tuple(_) => {
			match evaluate(term)? {
				Symbol::Num(n) => res.push((n, None)),
				sym => res.push((1, Some(builder.add_variable(sym)))),
			}
		}
	}
	Ok(())
}

/// Negate the coefficients of all terms parsed after the given position.
fn invert_terms(
	res: &mut CoVarVec,
	products: &mut Vec<Product>,
	pos: (usize, usize),
) -> Result<(), ParseError> {
	for (co, _) in &mut res[pos.0..] {
		*co = co.safe_inv()?;
	}
	for (co, _, _) in &mut products[pos.1..] {
		*co = co.safe_inv()?;
	}
	Ok(())
}

/// Parse the elements (and the optional guard) of a constraint atom.
fn parse_constraint_elems(
	builder: &mut dyn AbstractConstraintBuilder,
	elements: &[TheoryElement],
	rhs: Option<&TheoryTerm>,
	kind: AtomKind,
	res: &mut CoVarVec,
	products: &mut Vec<Product>,
) -> Result<(), ParseError> {
	check_syntax(
		kind != AtomKind::Diff || elements.len() == 1,
		"invalid difference constraint",
	)?;

	for element in elements {
		check_syntax(
			!element.tuple.is_empty() && element.condition.is_empty(),
			"invalid sum constraint",
		)?;
		parse_constraint_elem(builder, &element.tuple[0], kind, res, products)?;
	}

	if let Some(rhs) = rhs {
		if kind == AtomKind::Diff {
			let Symbol::Num(n) = evaluate(rhs)? else {
				return syntax_error("invalid difference constraint");
			};
			res.push((n.safe_inv()?, None));
		} else {
			let pos = (res.len(), products.len());
			parse_constraint_elem(builder, rhs, kind, res, products)?;
			invert_terms(res, products, pos)?;
		}
	}
	Ok(())
}

/// Combine coefficients of terms with the same variable, fold constants into
/// the returned right-hand side, and optionally drop zero coefficients.
///
/// This function fails if the expression can (potentially) overflow a 64-bit
/// accumulator for any assignment within the value range.
pub fn simplify(vec: &mut CoVarVec, drop_zero: bool) -> Result<IntVal, ArithError> {
	let mut seen: HashMap<VarRef, usize> = HashMap::new();
	let mut rhs: IntVal = 0;

	let mut j = 0;
	for i in 0..vec.len() {
		let (co, var) = vec[i];
		if drop_zero && co == 0 {
			continue;
		}
		match var {
			None => rhs = rhs.safe_sub(co)?,
			Some(v) => {
				if let Some(&k) = seen.get(&v) {
					vec[k].0 = vec[k].0.safe_add(co)?;
				} else {
					let _ = seen.insert(v, j);
					vec[j] = (co, Some(v));
					j += 1;
				}
			}
		}
	}
	vec.truncate(j);
	if drop_zero {
		vec.retain(|&(co, _)| co != 0);
	}

	// overflow check: any assignment within the value range must keep the
	// partial sums within 64 bits
	let _ = check_valid_value(rhs as SumVal)?;
	let mut min = rhs as SumVal;
	let mut max = rhs as SumVal;
	for &(co, _) in vec.iter() {
		let _ = check_valid_value(co as SumVal)?;
		let co = co as SumVal;
		min = min.safe_add(co.safe_mul(if co > 0 {
			MIN_VAL as SumVal
		} else {
			MAX_VAL as SumVal
		})?)?;
		max = max.safe_add(co.safe_mul(if co > 0 {
			MAX_VAL as SumVal
		} else {
			MIN_VAL as SumVal
		})?)?;
	}

	Ok(rhs)
}

/// Greatest common divisor of two non-negative integers.
fn gcd(mut a: IntVal, mut b: IntVal) -> IntVal {
	while b != 0 {
		(a, b) = (b, a % b);
	}
	a
}

/// Strip the (already folded) constant slots from a simplified vector.
fn strip_constants(vec: CoVarVec) -> Vec<(IntVal, VarRef)> {
	vec.into_iter()
		.filter_map(|(co, var)| var.map(|v| (co, v)))
		.collect()
}

/// Rewrite the constraint `literal -> Σ elems (rel) rhs` into `<=` form and
/// hand the pieces to the builder.
///
/// `>`, `<`, and `>=` are rewritten by inversion, `=` becomes two `<=`
/// constraints, and `!=` two auxiliary strict inequalities joined by
/// exclusive-or clauses. With `strict` the reverse implication is posted as
/// well.
fn normalize_constraint(
	builder: &mut dyn AbstractConstraintBuilder,
	literal: Lit,
	elements: &[(IntVal, VarRef)],
	rel: Relation,
	rhs: IntVal,
	strict: bool,
) -> Result<bool, ParseError> {
	let mut rel = rel;
	let mut rhs = rhs;
	let mut copy;
	let mut elems = elements;

	// rewrite '>', '<', and '>=' into '<='
	if rel == Relation::Greater {
		rel = Relation::GreaterEqual;
		rhs = rhs.safe_add(1)?;
	} else if rel == Relation::Less {
		rel = Relation::LessEqual;
		rhs = rhs.safe_sub(1)?;
	}
	if rel == Relation::GreaterEqual {
		rel = Relation::LessEqual;
		rhs = rhs.safe_inv()?;
		copy = Vec::with_capacity(elems.len());
		for &(co, var) in elems {
			copy.push((co.safe_inv()?, var));
		}
		elems = &copy;
	}

	// handle the remaining '<=', '=', and '!='
	match rel {
		Relation::LessEqual => {
			if strict && elems.len() == 1 {
				return builder.add_constraint(literal, elems.to_vec(), rhs, true);
			}
			if !builder.is_true(-literal)
				&& !builder.add_constraint(literal, elems.to_vec(), rhs, false)?
			{
				return Ok(false);
			}
		}
		Relation::Equal => {
			let (a, b);
			if strict {
				if builder.is_true(literal) {
					a = TRUE_LIT;
					b = TRUE_LIT;
				} else {
					a = builder.add_literal();
					b = builder.add_literal();
				}

				// this cannot fail because constraint normalization does not
				// propagate
				if !builder.add_clause(&[-literal, a])
					|| !builder.add_clause(&[-literal, b])
					|| !builder.add_clause(&[-a, -b, literal])
				{
					return Ok(false);
				}
			} else {
				a = literal;
				b = literal;
			}

			if !normalize_constraint(builder, a, elems, Relation::LessEqual, rhs, strict)?
				|| !normalize_constraint(builder, b, elems, Relation::GreaterEqual, rhs, strict)?
			{
				return Ok(false);
			}

			if strict {
				return Ok(true);
			}
		}
		Relation::NotEqual => {
			if strict {
				return normalize_constraint(builder, -literal, elems, Relation::Equal, rhs, true);
			}

			let a = builder.add_literal();
			let b = builder.add_literal();

			if !builder.add_clause(&[a, b, -literal]) || !builder.add_clause(&[-a, -b]) {
				return Ok(false);
			}

			if !normalize_constraint(builder, a, elems, Relation::Less, rhs, false)?
				|| !normalize_constraint(builder, b, elems, Relation::Greater, rhs, false)?
			{
				return Ok(false);
			}
		}
		_ => unreachable!("relation was rewritten above"),
	}

	if strict {
		debug_assert!(rel != Relation::Equal);
		let rel = match rel {
			Relation::LessEqual => Relation::Greater,
			Relation::NotEqual => Relation::Equal,
			_ => unreachable!("relation was rewritten above"),
		};
		return normalize_constraint(builder, -literal, elems, rel, rhs, false);
	}

	Ok(true)
}

/// Like [`normalize_constraint`] for a constraint with a product term.
#[allow(
	clippy::too_many_arguments,
	reason = "mirrors the flat builder interface of the host"
)]
fn normalize_nonlinear(
	builder: &mut dyn AbstractConstraintBuilder,
	literal: Lit,
	product: Product,
	linear: Option<(IntVal, VarRef)>,
	rel: Relation,
	rhs: IntVal,
	strict: bool,
) -> Result<bool, ParseError> {
	let mut rel = rel;
	let mut rhs = rhs;
	let mut product = product;
	let mut linear = linear;

	if rel == Relation::Greater {
		rel = Relation::GreaterEqual;
		rhs = rhs.safe_add(1)?;
	} else if rel == Relation::Less {
		rel = Relation::LessEqual;
		rhs = rhs.safe_sub(1)?;
	}
	if rel == Relation::GreaterEqual {
		rel = Relation::LessEqual;
		rhs = rhs.safe_inv()?;
		product.0 = product.0.safe_inv()?;
		if let Some((co, _)) = &mut linear {
			*co = co.safe_inv()?;
		}
	}

	match rel {
		Relation::LessEqual => {
			let (co_ab, va, vb) = product;
			let (co_c, vc) = linear.map_or((0, None), |(co, var)| (co, Some(var)));
			builder.add_nonlinear(literal, co_ab, va, vb, co_c, vc, rhs, strict)
		}
		Relation::Equal => {
			let (a, b);
			if strict {
				if builder.is_true(literal) {
					a = TRUE_LIT;
					b = TRUE_LIT;
				} else {
					a = builder.add_literal();
					b = builder.add_literal();
				}
				if !builder.add_clause(&[-literal, a])
					|| !builder.add_clause(&[-literal, b])
					|| !builder.add_clause(&[-a, -b, literal])
				{
					return Ok(false);
				}
			} else {
				a = literal;
				b = literal;
			}
			Ok(
				normalize_nonlinear(builder, a, product, linear, Relation::LessEqual, rhs, strict)?
					&& normalize_nonlinear(
						builder,
						b,
						product,
						linear,
						Relation::GreaterEqual,
						rhs,
						strict,
					)?,
			)
		}
		Relation::NotEqual => {
			if strict {
				return normalize_nonlinear(
					builder,
					-literal,
					product,
					linear,
					Relation::Equal,
					rhs,
					true,
				);
			}
			let a = builder.add_literal();
			let b = builder.add_literal();
			if !builder.add_clause(&[a, b, -literal]) || !builder.add_clause(&[-a, -b]) {
				return Ok(false);
			}
			Ok(
				normalize_nonlinear(builder, a, product, linear, Relation::Less, rhs, false)?
					&& normalize_nonlinear(
						builder,
						b,
						product,
						linear,
						Relation::Greater,
						rhs,
						false,
					)?,
			)
		}
		_ => unreachable!("relation was rewritten above"),
	}
}

/// Parse a sum, difference, or non-linear constraint atom.
fn parse_constraint(
	builder: &mut dyn AbstractConstraintBuilder,
	atom: &TheoryAtom,
	kind: AtomKind,
	strict: bool,
) -> Result<bool, ParseError> {
	check_syntax(atom.guard.is_some(), "constraint atom without guard")?;
	let (rel, guard) = atom.guard.as_ref().expect("guard checked above");
	check_syntax(
		kind != AtomKind::Diff || *rel == Relation::LessEqual,
		"difference constraints only support <=",
	)?;

	let literal = builder.solver_literal(atom.literal);

	let mut elements = CoVarVec::new();
	let mut products = Vec::new();
	parse_constraint_elems(
		builder,
		&atom.elements,
		Some(guard),
		kind,
		&mut elements,
		&mut products,
	)?;
	let mut rhs = simplify(&mut elements, true)?;
	let mut elems = strip_constants(elements);

	// merge products over the same (unordered) variable pair
	let mut merged: Vec<Product> = Vec::new();
	for (co, va, vb) in products {
		let (va, vb) = if va <= vb { (va, vb) } else { (vb, va) };
		if let Some((c, _, _)) = merged.iter_mut().find(|&&mut (_, a, b)| a == va && b == vb) {
			*c = c.safe_add(co)?;
		} else {
			merged.push((co, va, vb));
		}
	}
	merged.retain(|&(co, _, _)| co != 0);

	if merged.is_empty() {
		// divide by the gcd of all coefficients
		let mut d = rhs.abs();
		for &(co, _) in &elems {
			d = gcd(d, co.abs());
		}
		if d > 1 {
			for (co, _) in &mut elems {
				*co /= d;
			}
			rhs /= d;
		}
		normalize_constraint(builder, literal, &elems, *rel, rhs, strict)
	} else {
		check_syntax(
			merged.len() == 1 && elems.len() <= 1,
			"non-linear constraints support a single product and linear term",
		)?;
		normalize_nonlinear(
			builder,
			literal,
			merged[0],
			elems.first().copied(),
			*rel,
			rhs,
			strict,
		)
	}
}

/// Parse a minimize or maximize directive.
fn parse_objective(
	builder: &mut dyn AbstractConstraintBuilder,
	atom: &TheoryAtom,
	factor: IntVal,
) -> Result<(), ParseError> {
	let mut elements = CoVarVec::new();
	let mut products = Vec::new();
	parse_constraint_elems(
		builder,
		&atom.elements,
		None,
		AtomKind::Sum,
		&mut elements,
		&mut products,
	)?;
	for (co, var) in elements {
		builder.add_minimize(factor.safe_mul(co)?, var);
	}
	Ok(())
}

/// Parse a single element of a show directive.
fn parse_show_elem(
	builder: &mut dyn AbstractConstraintBuilder,
	term: &TheoryTerm,
) -> Result<(), ParseError> {
	if let TheoryTerm::Function(name, args) = term {
		if name == "/" && args.len() == 2 {
			let name = evaluate(&args[0])?;
			check_syntax(
				name.arity() == 0 && name.name().is_some(),
				"invalid show statement",
			)?;
			let Symbol::Num(arity) = evaluate(&args[1])? else {
				return syntax_error("invalid show statement");
			};
			check_syntax(arity >= 0, "invalid show statement")?;
			builder.show_signature(name.name().expect("checked above"), arity as usize);
			return Ok(());
		}
	}
	let sym = evaluate(term)?;
	check_syntax(!matches!(sym, Symbol::Num(_)), "invalid show statement")?;
	let var = builder.add_variable(sym);
	builder.show_variable(var);
	Ok(())
}

/// Parse a show directive.
fn parse_show(
	builder: &mut dyn AbstractConstraintBuilder,
	atom: &TheoryAtom,
) -> Result<(), ParseError> {
	builder.add_show();
	for element in &atom.elements {
		check_syntax(
			element.tuple.len() == 1 && element.condition.is_empty(),
			"invalid show statement",
		)?;
		parse_show_elem(builder, &element.tuple[0])?;
	}
	Ok(())
}

/// Parse a single element of a dom statement into an interval.
fn parse_dom_elem(term: &TheoryTerm) -> Result<(IntVal, IntVal), ParseError> {
	if let TheoryTerm::Function(name, args) = term {
		if name == ".." && args.len() == 2 {
			let Symbol::Num(a) = evaluate(&args[0])? else {
				return syntax_error("invalid dom statement");
			};
			let Symbol::Num(b) = evaluate(&args[1])? else {
				return syntax_error("invalid dom statement");
			};
			return Ok((a, b.safe_add(1)?));
		}
	}
	let Symbol::Num(a) = evaluate(term)? else {
		return syntax_error("invalid dom statement");
	};
	Ok((a, a.safe_add(1)?))
}

/// Parse a dom statement.
fn parse_dom(
	builder: &mut dyn AbstractConstraintBuilder,
	atom: &TheoryAtom,
) -> Result<bool, ParseError> {
	let mut domain = IntervalSet::default();
	for element in &atom.elements {
		check_syntax(
			element.tuple.len() == 1 && element.condition.is_empty(),
			"invalid dom statement",
		)?;
		let (l, r) = parse_dom_elem(&element.tuple[0])?;
		if l < r {
			let _ = check_valid_value(l as SumVal)?;
			let _ = check_valid_value(r.safe_sub(1)? as SumVal)?;
			domain.add(l, r);
		}
	}

	let Some((Relation::Equal, guard)) = &atom.guard else {
		return syntax_error("invalid dom statement");
	};
	let sym = evaluate(guard)?;
	check_syntax(!matches!(sym, Symbol::Num(_)), "invalid dom statement")?;

	let literal = builder.solver_literal(atom.literal);
	let var = builder.add_variable(sym);
	builder.add_dom(literal, var, &domain)
}

/// Parse a distinct statement.
fn parse_distinct(
	builder: &mut dyn AbstractConstraintBuilder,
	atom: &TheoryAtom,
) -> Result<bool, ParseError> {
	let mut elements = Vec::with_capacity(atom.elements.len());
	for element in &atom.elements {
		check_syntax(
			!element.tuple.is_empty() && element.condition.is_empty(),
			"invalid distinct statement",
		)?;
		let mut terms = CoVarVec::new();
		let mut products = Vec::new();
		parse_constraint_elem(
			builder,
			&element.tuple[0],
			AtomKind::Sum,
			&mut terms,
			&mut products,
		)?;
		let fixed = simplify(&mut terms, true)?.safe_inv()?;
		elements.push((strip_constants(terms), fixed));
	}

	let literal = builder.solver_literal(atom.literal);
	builder.add_distinct(literal, elements)
}

/// Parse a disjoint statement.
fn parse_disjoint(
	builder: &mut dyn AbstractConstraintBuilder,
	atom: &TheoryAtom,
) -> Result<bool, ParseError> {
	let mut elements = Vec::with_capacity(atom.elements.len());
	for element in &atom.elements {
		check_syntax(
			!element.tuple.is_empty() && element.condition.is_empty(),
			"invalid disjoint statement",
		)?;
		let TheoryTerm::Function(name, args) = &element.tuple[0] else {
			return syntax_error("invalid disjoint statement");
		};
		check_syntax(name == "@" && args.len() == 2, "invalid disjoint statement")?;
		let start = evaluate(&args[0])?;
		check_syntax(
			!matches!(start, Symbol::Num(_)),
			"invalid disjoint statement",
		)?;
		let Symbol::Num(duration) = evaluate(&args[1])? else {
			return syntax_error("invalid disjoint statement");
		};
		check_syntax(duration > 0, "disjoint durations must be positive")?;
		let var = builder.add_variable(start);
		elements.push((duration, var));
	}

	let literal = builder.solver_literal(atom.literal);
	builder.add_disjoint(literal, elements)
}

/// Parse the given theory atoms, passing the result to the given builder.
///
/// Returns `Ok(false)` when integrating a constraint produced a conflict.
pub fn parse(
	builder: &mut dyn AbstractConstraintBuilder,
	theory_atoms: &[TheoryAtom],
) -> Result<bool, ParseError> {
	for atom in theory_atoms {
		let ok = match atom.term.as_str() {
			"__sum_h" => parse_constraint(builder, atom, AtomKind::Sum, false)?,
			"__sum_b" => parse_constraint(builder, atom, AtomKind::Sum, true)?,
			"__diff_h" => parse_constraint(builder, atom, AtomKind::Diff, false)?,
			"__diff_b" => parse_constraint(builder, atom, AtomKind::Diff, true)?,
			"__nsum_h" => parse_constraint(builder, atom, AtomKind::NSum, false)?,
			"__nsum_b" => parse_constraint(builder, atom, AtomKind::NSum, true)?,
			"distinct" => parse_distinct(builder, atom)?,
			"disjoint" => parse_disjoint(builder, atom)?,
			"show" => {
				parse_show(builder, atom)?;
				true
			}
			"dom" => parse_dom(builder, atom)?,
			"minimize" => {
				parse_objective(builder, atom, 1)?;
				true
			}
			"maximize" => {
				parse_objective(builder, atom, -1)?;
				true
			}
			_ => true,
		};
		if !ok {
			return Ok(false);
		}
	}
	Ok(true)
}

#[cfg(test)]
mod tests {
	use crate::{
		num::{ArithError, MAX_VAL},
		parsing::{
			simplify, CoVarVec, Relation, TheoryAtom, TheoryElement, TheoryTerm,
		},
		solver::var_state::VarRef,
	};

	#[test]
	fn test_simplify() {
		let a = VarRef::new(0);
		let mut vec: CoVarVec = vec![(0, Some(a)), (1, None), (2, None), (3, Some(a)), (4, Some(a))];
		assert_eq!(simplify(&mut vec, true), Ok(-3));
		assert_eq!(vec, vec![(7, Some(a))]);

		// simplification is idempotent
		let mut again = vec.clone();
		assert_eq!(simplify(&mut again, true), Ok(0));
		assert_eq!(again, vec);
	}

	#[test]
	fn test_simplify_overflow() {
		let a = VarRef::new(0);
		let mut vec: CoVarVec = vec![(MAX_VAL, Some(a)), (MAX_VAL, Some(a))];
		assert_eq!(simplify(&mut vec, true), Err(ArithError::Overflow));
	}

	#[test]
	fn test_atom_display() {
		let atom = TheoryAtom {
			term: "__sum_h".to_owned(),
			elements: vec![
				TheoryElement::term(TheoryTerm::Symbol("x".to_owned())),
				TheoryElement::term(TheoryTerm::op(
					"*",
					vec![TheoryTerm::Number(2), TheoryTerm::Symbol("y".to_owned())],
				)),
			],
			guard: Some((Relation::LessEqual, TheoryTerm::Number(7))),
			literal: 1,
		};
		assert_eq!(atom.to_string(), "&__sum_h{x; (2*y)} <= 7");
	}
}
