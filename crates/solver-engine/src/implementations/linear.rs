//! Reference backend over a restricted linear model grammar.
//!
//! Supported statements, each terminated by `;` with `#` line comments:
//!
//! ```text
//! param NAME [default NUM | := NUM | := "TEXT"] ;
//! var NAME [integer] [>= NUM] [<= NUM] ;
//! maximize NAME : LINEAR-EXPR ;
//! minimize NAME : LINEAR-EXPR ;
//! subject to NAME : LINEAR-EXPR (<= | >= | =) LINEAR-EXPR ;
//! ```
//!
//! A linear expression is a sum of terms, each a number, an identifier, or
//! `number * identifier`. Identifiers resolve to variables first, then
//! parameters. The solver enumerates integer variables over their declared
//! bounds and continuous variables at their bound endpoints, keeping the
//! best feasible point for the active objective. Data files consist of
//! `param NAME := VALUE ;` statements.

use crate::{EngineError, MathProgram};
use solver_types::MetricScalar;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

/// Enumeration ceiling; models beyond this are for the production backend.
const MAX_SEARCH_POINTS: usize = 1_000_000;

const FEASIBILITY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
enum ParamValue {
	Unset,
	Number(f64),
	Text(String),
}

#[derive(Debug, Clone)]
struct Variable {
	name: String,
	integer: bool,
	lower: Option<f64>,
	upper: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
struct Term {
	coefficient: f64,
	symbol: Option<String>,
}

type LinearExpr = Vec<Term>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sense {
	Maximize,
	Minimize,
}

#[derive(Debug, Clone)]
struct Objective {
	name: String,
	sense: Sense,
	expression: LinearExpr,
	active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
	LessEqual,
	GreaterEqual,
	Equal,
}

#[derive(Debug, Clone)]
struct Constraint {
	name: String,
	lhs: LinearExpr,
	relation: Relation,
	rhs: LinearExpr,
}

/// An in-memory linear program with grid-search resolution.
#[derive(Debug, Default)]
pub struct LinearProgram {
	parameters: HashMap<String, ParamValue>,
	variables: Vec<Variable>,
	objectives: Vec<Objective>,
	constraints: Vec<Constraint>,
	solution: Option<BTreeMap<String, f64>>,
}

impl LinearProgram {
	pub fn new() -> Self {
		Self::default()
	}

	fn objective_mut(&mut self, name: &str) -> Result<&mut Objective, EngineError> {
		self.objectives
			.iter_mut()
			.find(|objective| objective.name == name)
			.ok_or_else(|| EngineError::UnknownObjective(name.to_string()))
	}

	fn evaluate(
		&self,
		expression: &LinearExpr,
		point: &BTreeMap<String, f64>,
	) -> Result<f64, EngineError> {
		let mut total = 0.0;
		for term in expression {
			let factor = match &term.symbol {
				None => 1.0,
				Some(symbol) => {
					if let Some(value) = point.get(symbol) {
						*value
					} else {
						match self.parameters.get(symbol) {
							Some(ParamValue::Number(value)) => *value,
							Some(ParamValue::Text(text)) => {
								return Err(EngineError::Evaluation(format!(
									"parameter '{}' holds text value '{}'",
									symbol, text
								)))
							}
							Some(ParamValue::Unset) => {
								return Err(EngineError::Evaluation(format!(
									"parameter '{}' has no value",
									symbol
								)))
							}
							None => {
								return Err(EngineError::Evaluation(format!(
									"unknown symbol '{}'",
									symbol
								)))
							}
						}
					}
				}
			};
			total += term.coefficient * factor;
		}
		Ok(total)
	}

	fn satisfied(
		&self,
		constraint: &Constraint,
		point: &BTreeMap<String, f64>,
	) -> Result<bool, EngineError> {
		let lhs = self.evaluate(&constraint.lhs, point)?;
		let rhs = self.evaluate(&constraint.rhs, point)?;
		Ok(match constraint.relation {
			Relation::LessEqual => lhs <= rhs + FEASIBILITY_TOLERANCE,
			Relation::GreaterEqual => lhs >= rhs - FEASIBILITY_TOLERANCE,
			Relation::Equal => (lhs - rhs).abs() <= FEASIBILITY_TOLERANCE,
		})
	}

	/// Candidate values for one variable.
	fn domain(&self, variable: &Variable) -> Result<Vec<f64>, EngineError> {
		let lower = variable
			.lower
			.ok_or_else(|| EngineError::UnboundedVariable(variable.name.clone()))?;
		let upper = variable
			.upper
			.ok_or_else(|| EngineError::UnboundedVariable(variable.name.clone()))?;

		if lower > upper {
			return Ok(Vec::new());
		}

		if variable.integer {
			let first = lower.ceil() as i64;
			let last = upper.floor() as i64;
			Ok((first..=last).map(|candidate| candidate as f64).collect())
		} else {
			// Linear objectives attain their optimum at a bound.
			if (upper - lower).abs() < f64::EPSILON {
				Ok(vec![lower])
			} else {
				Ok(vec![lower, upper])
			}
		}
	}

	fn parse_model(&mut self, text: &str) -> Result<(), EngineError> {
		// A new model replaces everything from the previous one.
		self.parameters.clear();
		self.variables.clear();
		self.objectives.clear();
		self.constraints.clear();
		self.solution = None;

		for statement in statements(text) {
			let keyword = statement.split_whitespace().next().unwrap_or_default();
			match keyword {
				"param" => self.parse_param(&statement)?,
				"var" => self.parse_var(&statement)?,
				"maximize" => self.parse_objective(&statement, Sense::Maximize)?,
				"minimize" => self.parse_objective(&statement, Sense::Minimize)?,
				"subject" => self.parse_constraint(&statement)?,
				other => {
					return Err(EngineError::Parse(format!(
						"unsupported statement '{}'",
						other
					)))
				}
			}
		}

		Ok(())
	}

	fn parse_param(&mut self, statement: &str) -> Result<(), EngineError> {
		let words: Vec<&str> = statement.split_whitespace().collect();
		let name = words
			.get(1)
			.ok_or_else(|| EngineError::Parse("param statement without a name".into()))?;

		let value = match words.get(2) {
			None => ParamValue::Unset,
			Some(&"default") | Some(&":=") => {
				let literal = words
					.get(3)
					.ok_or_else(|| EngineError::Parse(format!("param '{}' missing value", name)))?;
				parse_param_literal(literal)?
			}
			Some(other) => {
				return Err(EngineError::Parse(format!(
					"unexpected token '{}' in param '{}'",
					other, name
				)))
			}
		};

		self.parameters.insert((*name).to_string(), value);
		Ok(())
	}

	fn parse_var(&mut self, statement: &str) -> Result<(), EngineError> {
		let cleaned = statement.replace(',', " ");
		let words: Vec<&str> = cleaned.split_whitespace().collect();
		let name = words
			.get(1)
			.ok_or_else(|| EngineError::Parse("var statement without a name".into()))?;

		let mut variable = Variable {
			name: (*name).to_string(),
			integer: false,
			lower: None,
			upper: None,
		};

		let mut index = 2;
		while index < words.len() {
			match words[index] {
				"integer" => {
					variable.integer = true;
					index += 1;
				}
				">=" => {
					let bound = words.get(index + 1).ok_or_else(|| {
						EngineError::Parse(format!("var '{}' missing lower bound", name))
					})?;
					variable.lower = Some(parse_number(bound)?);
					index += 2;
				}
				"<=" => {
					let bound = words.get(index + 1).ok_or_else(|| {
						EngineError::Parse(format!("var '{}' missing upper bound", name))
					})?;
					variable.upper = Some(parse_number(bound)?);
					index += 2;
				}
				other => {
					return Err(EngineError::Parse(format!(
						"unexpected token '{}' in var '{}'",
						other, name
					)))
				}
			}
		}

		self.variables.push(variable);
		Ok(())
	}

	fn parse_objective(&mut self, statement: &str, sense: Sense) -> Result<(), EngineError> {
		let (head, body) = statement
			.split_once(':')
			.ok_or_else(|| EngineError::Parse("objective without ':'".into()))?;
		let name = head
			.split_whitespace()
			.nth(1)
			.ok_or_else(|| EngineError::Parse("objective without a name".into()))?;

		self.objectives.push(Objective {
			name: name.to_string(),
			sense,
			expression: parse_linear(body)?,
			// Every objective starts active, matching engine defaults; the
			// worker narrows the set to one before each solve.
			active: true,
		});
		Ok(())
	}

	fn parse_constraint(&mut self, statement: &str) -> Result<(), EngineError> {
		let (head, body) = statement
			.split_once(':')
			.ok_or_else(|| EngineError::Parse("constraint without ':'".into()))?;

		let head_words: Vec<&str> = head.split_whitespace().collect();
		if head_words.len() != 3 || head_words[1] != "to" {
			return Err(EngineError::Parse(format!(
				"malformed constraint head '{}'",
				head.trim()
			)));
		}
		let name = head_words[2];

		let (lhs_text, relation, rhs_text) = if let Some((lhs, rhs)) = body.split_once("<=") {
			(lhs, Relation::LessEqual, rhs)
		} else if let Some((lhs, rhs)) = body.split_once(">=") {
			(lhs, Relation::GreaterEqual, rhs)
		} else if let Some((lhs, rhs)) = body.split_once('=') {
			(lhs, Relation::Equal, rhs)
		} else {
			return Err(EngineError::Parse(format!(
				"constraint '{}' without a relation",
				name
			)));
		};

		self.constraints.push(Constraint {
			name: name.to_string(),
			lhs: parse_linear(lhs_text)?,
			relation,
			rhs: parse_linear(rhs_text)?,
		});
		Ok(())
	}
}

impl MathProgram for LinearProgram {
	fn read_model(&mut self, path: &Path) -> Result<(), EngineError> {
		let text = std::fs::read_to_string(path)?;
		self.parse_model(&text)?;
		debug!(
			model = %path.display(),
			variables = self.variables.len(),
			objectives = self.objectives.len(),
			constraints = self.constraints.len(),
			"Model loaded"
		);
		Ok(())
	}

	fn read_data(&mut self, path: &Path) -> Result<(), EngineError> {
		let text = std::fs::read_to_string(path)?;
		for statement in statements(&text) {
			let words: Vec<&str> = statement.split_whitespace().collect();
			match words.as_slice() {
				["param", name, ":=", literal] => {
					if !self.parameters.contains_key(*name) {
						return Err(EngineError::UnknownParameter((*name).to_string()));
					}
					let value = parse_param_literal(literal)?;
					self.parameters.insert((*name).to_string(), value);
				}
				_ => {
					return Err(EngineError::Parse(format!(
						"unsupported data statement '{}'",
						statement
					)))
				}
			}
		}
		Ok(())
	}

	fn set_parameter(&mut self, name: &str, value: &MetricScalar) -> Result<(), EngineError> {
		let slot = self
			.parameters
			.get_mut(name)
			.ok_or_else(|| EngineError::UnknownParameter(name.to_string()))?;

		*slot = match value {
			MetricScalar::Text(text) => ParamValue::Text(text.clone()),
			numeric => ParamValue::Number(
				numeric
					.as_number()
					.expect("non-text scalars are numeric"),
			),
		};
		Ok(())
	}

	fn parameter(&self, name: &str) -> Option<MetricScalar> {
		match self.parameters.get(name)? {
			ParamValue::Unset => None,
			ParamValue::Number(value) => Some(MetricScalar::Float(*value)),
			ParamValue::Text(text) => Some(MetricScalar::Text(text.clone())),
		}
	}

	fn objectives(&self) -> Vec<String> {
		self.objectives
			.iter()
			.map(|objective| objective.name.clone())
			.collect()
	}

	fn restore_objective(&mut self, name: &str) -> Result<(), EngineError> {
		self.objective_mut(name)?.active = true;
		Ok(())
	}

	fn drop_objective(&mut self, name: &str) -> Result<(), EngineError> {
		self.objective_mut(name)?.active = false;
		Ok(())
	}

	fn solve(&mut self) -> Result<(), EngineError> {
		let active: Vec<&Objective> = self
			.objectives
			.iter()
			.filter(|objective| objective.active)
			.collect();
		let objective = match active.as_slice() {
			[] => return Err(EngineError::NoActiveObjective),
			[single] => (*single).clone(),
			_ => return Err(EngineError::MultipleActiveObjectives),
		};

		let mut domains = Vec::with_capacity(self.variables.len());
		let mut points: usize = 1;
		for variable in &self.variables {
			let domain = self.domain(variable)?;
			points = points.saturating_mul(domain.len().max(1));
			if points > MAX_SEARCH_POINTS {
				return Err(EngineError::TooLarge(points));
			}
			domains.push(domain);
		}

		let mut best: Option<(BTreeMap<String, f64>, f64)> = None;
		let mut indices = vec![0usize; domains.len()];

		'search: loop {
			if domains.iter().any(|domain| domain.is_empty()) {
				break;
			}

			let point: BTreeMap<String, f64> = self
				.variables
				.iter()
				.enumerate()
				.map(|(position, variable)| {
					(variable.name.clone(), domains[position][indices[position]])
				})
				.collect();

			let mut feasible = true;
			for constraint in &self.constraints {
				if !self.satisfied(constraint, &point)? {
					feasible = false;
					break;
				}
			}

			if feasible {
				let value = self.evaluate(&objective.expression, &point)?;
				let improves = match &best {
					None => true,
					Some((_, incumbent)) => match objective.sense {
						Sense::Maximize => value > *incumbent,
						Sense::Minimize => value < *incumbent,
					},
				};
				if improves {
					best = Some((point, value));
				}
			}

			// Advance the mixed-radix counter over the variable domains.
			let mut position = domains.len();
			loop {
				if position == 0 {
					break 'search;
				}
				position -= 1;
				indices[position] += 1;
				if indices[position] < domains[position].len() {
					break;
				}
				indices[position] = 0;
			}
		}

		match best {
			Some((point, value)) => {
				debug!(objective = %objective.name, optimum = value, "Solve finished");
				self.solution = Some(point);
				Ok(())
			}
			None => Err(EngineError::Infeasible),
		}
	}

	fn objective_value(&self, name: &str) -> Result<f64, EngineError> {
		let objective = self
			.objectives
			.iter()
			.find(|objective| objective.name == name)
			.ok_or_else(|| EngineError::UnknownObjective(name.to_string()))?;
		let point = self.solution.as_ref().ok_or(EngineError::NotSolved)?;
		self.evaluate(&objective.expression, point)
	}

	fn variable_values(&self) -> Result<BTreeMap<String, f64>, EngineError> {
		self.solution.clone().ok_or(EngineError::NotSolved)
	}
}

/// Splits source text into trimmed `;`-terminated statements, with `#`
/// comments removed.
fn statements(text: &str) -> Vec<String> {
	let without_comments: String = text
		.lines()
		.map(|line| line.split('#').next().unwrap_or_default())
		.collect::<Vec<_>>()
		.join("\n");

	without_comments
		.split(';')
		.map(str::trim)
		.filter(|statement| !statement.is_empty())
		.map(str::to_string)
		.collect()
}

fn parse_number(literal: &str) -> Result<f64, EngineError> {
	literal
		.parse::<f64>()
		.map_err(|_| EngineError::Parse(format!("'{}' is not a number", literal)))
}

fn parse_param_literal(literal: &str) -> Result<ParamValue, EngineError> {
	if let Some(text) = literal.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')) {
		Ok(ParamValue::Text(text.to_string()))
	} else {
		Ok(ParamValue::Number(parse_number(literal)?))
	}
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
	Number(f64),
	Ident(String),
	Plus,
	Minus,
	Star,
}

fn tokenize(text: &str) -> Result<Vec<Token>, EngineError> {
	let mut tokens = Vec::new();
	let mut chars = text.chars().peekable();

	while let Some(&next) = chars.peek() {
		if next.is_whitespace() {
			chars.next();
		} else if next.is_ascii_digit() || next == '.' {
			let mut literal = String::new();
			while let Some(&digit) = chars.peek() {
				if digit.is_ascii_digit() || digit == '.' || digit == 'e' || digit == 'E' {
					literal.push(digit);
					chars.next();
				} else {
					break;
				}
			}
			tokens.push(Token::Number(parse_number(&literal)?));
		} else if next.is_alphabetic() || next == '_' {
			let mut ident = String::new();
			while let Some(&part) = chars.peek() {
				if part.is_alphanumeric() || part == '_' {
					ident.push(part);
					chars.next();
				} else {
					break;
				}
			}
			tokens.push(Token::Ident(ident));
		} else {
			match next {
				'+' => tokens.push(Token::Plus),
				'-' => tokens.push(Token::Minus),
				'*' => tokens.push(Token::Star),
				other => {
					return Err(EngineError::Parse(format!(
						"unexpected character '{}' in expression",
						other
					)))
				}
			}
			chars.next();
		}
	}

	Ok(tokens)
}

/// Parses a sum of linear terms.
fn parse_linear(text: &str) -> Result<LinearExpr, EngineError> {
	let tokens = tokenize(text)?;
	if tokens.is_empty() {
		return Err(EngineError::Parse("empty expression".into()));
	}

	let mut terms = Vec::new();
	let mut index = 0;

	while index < tokens.len() {
		let mut sign = 1.0;
		while let Some(token) = tokens.get(index) {
			match token {
				Token::Plus => index += 1,
				Token::Minus => {
					sign = -sign;
					index += 1;
				}
				_ => break,
			}
		}

		let mut coefficient = 1.0;
		let mut symbol: Option<String> = None;
		let mut saw_factor = false;

		loop {
			match tokens.get(index) {
				Some(Token::Number(value)) => {
					coefficient *= value;
					saw_factor = true;
					index += 1;
				}
				Some(Token::Ident(name)) => {
					if symbol.is_some() {
						return Err(EngineError::NonLinear(text.trim().to_string()));
					}
					symbol = Some(name.clone());
					saw_factor = true;
					index += 1;
				}
				_ => break,
			}

			if matches!(tokens.get(index), Some(Token::Star)) {
				index += 1;
			} else {
				break;
			}
		}

		if !saw_factor {
			return Err(EngineError::Parse(format!(
				"dangling operator in '{}'",
				text.trim()
			)));
		}

		terms.push(Term {
			coefficient: sign * coefficient,
			symbol,
		});

		match tokens.get(index) {
			None | Some(Token::Plus) | Some(Token::Minus) => {}
			Some(_) => {
				return Err(EngineError::Parse(format!(
					"missing operator in '{}'",
					text.trim()
				)))
			}
		}
	}

	Ok(terms)
}
