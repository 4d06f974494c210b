//! Engine seam of the solver workers.
//!
//! Each worker owns exactly one engine instance behind the [`MathProgram`]
//! trait: model and data files are loaded from disk, context metrics become
//! parameter values, one objective is made active per solve, and the solve
//! call itself blocks the calling thread for its full duration. Engines are
//! never shared between workers.
//!
//! The production backend wraps an external mathematical-programming
//! distribution and is selected by its backend tag through an
//! [`EngineFactory`]. The in-tree [`linear`] backend solves a restricted
//! model grammar so the pipeline runs end to end without that
//! distribution.
//!
//! [`linear`]: implementations::linear

use solver_types::MetricScalar;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub mod implementations {
	pub mod linear;
}

pub use implementations::linear::LinearProgram;

#[derive(Debug, Error)]
pub enum EngineError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Model parse error: {0}")]
	Parse(String),
	#[error("Unknown parameter '{0}'")]
	UnknownParameter(String),
	#[error("Unknown objective '{0}'")]
	UnknownObjective(String),
	#[error("Variable '{0}' has no finite bounds")]
	UnboundedVariable(String),
	#[error("Expression is not linear: {0}")]
	NonLinear(String),
	#[error("Evaluation error: {0}")]
	Evaluation(String),
	#[error("No objective is active")]
	NoActiveObjective,
	#[error("More than one objective is active")]
	MultipleActiveObjectives,
	#[error("No feasible assignment exists")]
	Infeasible,
	#[error("Search space of {0} points exceeds the backend limit")]
	TooLarge(usize),
	#[error("No solution available; solve first")]
	NotSolved,
}

/// A loaded optimisation problem.
///
/// The trait is deliberately blocking: [`MathProgram::solve`] may run for a
/// long time and the worker dedicates an OS thread to it. Implementations
/// must be `Send` so a worker thread can own its engine, but need not be
/// `Sync`; an engine instance is never shared.
pub trait MathProgram: Send {
	/// Loads (or replaces) the model from a file on disk.
	fn read_model(&mut self, path: &Path) -> Result<(), EngineError>;

	/// Loads parameter values from a data file, replacing prior values of
	/// the parameters it names.
	fn read_data(&mut self, path: &Path) -> Result<(), EngineError>;

	/// Sets one named parameter.
	fn set_parameter(&mut self, name: &str, value: &MetricScalar) -> Result<(), EngineError>;

	/// Current value of a parameter, if declared and set.
	fn parameter(&self, name: &str) -> Option<MetricScalar>;

	/// Names of every objective defined in the model.
	fn objectives(&self) -> Vec<String>;

	/// Makes an objective active for the next solve.
	fn restore_objective(&mut self, name: &str) -> Result<(), EngineError>;

	/// Excludes an objective from the next solve.
	fn drop_objective(&mut self, name: &str) -> Result<(), EngineError>;

	/// Solves for the single active objective. Blocking.
	fn solve(&mut self) -> Result<(), EngineError>;

	/// Value of any defined objective at the last solution, including
	/// dropped ones.
	fn objective_value(&self, name: &str) -> Result<f64, EngineError>;

	/// The optimal assignment found by the last solve.
	fn variable_values(&self) -> Result<BTreeMap<String, f64>, EngineError>;
}

/// Creates one engine instance per worker; workers must not share engines.
pub type EngineFactory = Arc<dyn Fn() -> Box<dyn MathProgram> + Send + Sync>;

/// Factory for the in-tree linear backend.
pub fn linear_factory() -> EngineFactory {
	Arc::new(|| Box::new(LinearProgram::new()))
}
