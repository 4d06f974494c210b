//! Solver worker lifecycle.
//!
//! A worker holds one loaded optimisation model and turns execution
//! contexts into solutions. Model and data files are persisted to the
//! worker's own working directory before they are loaded, so the engine
//! always solves against the latest description received. Per-solve
//! failures never terminate a worker; a failed model load drops the
//! problem-defined flag and subsequent solves quietly produce nothing
//! until a valid model arrives.

use solver_engine::MathProgram;
use solver_types::{
	DataFile, ExecutionContext, MetricScalar, ProblemDefinition, Solution,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub mod pool;

pub use pool::{WorkerCommand, WorkerEvent, WorkerHandle, WorkerId, WorkerOutcome, WorkerPool};

#[derive(Debug, Error)]
pub enum WorkerError {
	#[error("Model invalid: {0}")]
	ModelInvalid(String),
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Unsupported value kind: {0}")]
	TypeUnsupported(String),
	#[error("Neither the context nor the model names an objective")]
	ObjectiveMissing,
	#[error("Objective '{0}' is not defined in the model")]
	ObjectiveUnknown(String),
	#[error("Engine failure: {0}")]
	SolveFailed(String),
}

/// The operations the dispatch manager drives a worker through.
///
/// Expressed as a trait so the manager holds plain handles; nothing about
/// the pool depends on the engine behind a worker.
pub trait SolverWorker: Send {
	/// Persists and loads a model definition, replacing any prior one.
	fn load_model(&mut self, problem: &ProblemDefinition) -> Result<(), WorkerError>;

	/// Replaces parameter values from a new data file.
	fn update_data(&mut self, data: &DataFile) -> Result<(), WorkerError>;

	/// Solves the loaded model for one context. Returns `Ok(None)` without
	/// touching the engine when no valid model is loaded.
	fn solve(&mut self, context: &ExecutionContext) -> Result<Option<Solution>, WorkerError>;
}

/// A worker around a [`MathProgram`] engine instance.
pub struct EngineWorker {
	engine: Box<dyn MathProgram>,
	working_directory: PathBuf,
	default_objective: Option<String>,
	/// Variable name to the constant mirroring its deployed value.
	constants_by_variable: BTreeMap<String, String>,
	problem_defined: bool,
}

impl EngineWorker {
	/// Creates a worker owning `engine`, persisting files under
	/// `working_directory` (created on first use).
	pub fn new(engine: Box<dyn MathProgram>, working_directory: PathBuf) -> Self {
		Self {
			engine,
			working_directory,
			default_objective: None,
			constants_by_variable: BTreeMap::new(),
			problem_defined: false,
		}
	}

	pub fn is_ready(&self) -> bool {
		self.problem_defined
	}

	/// Writes a received file body under the worker's directory, named by
	/// the message's file name. Only the final path component is used so
	/// a message cannot escape the directory.
	fn save_file(&self, name: &str, content: &str) -> Result<PathBuf, WorkerError> {
		let file_name = Path::new(name)
			.file_name()
			.ok_or_else(|| WorkerError::ModelInvalid(format!("'{}' is not a file name", name)))?;

		std::fs::create_dir_all(&self.working_directory)?;
		let path = self.working_directory.join(file_name);
		std::fs::write(&path, content)?;
		Ok(path)
	}

	fn load_model_inner(&mut self, problem: &ProblemDefinition) -> Result<(), WorkerError> {
		let default_objective = problem
			.default_objective
			.as_deref()
			.filter(|name| !name.is_empty())
			.ok_or_else(|| {
				WorkerError::ModelInvalid("model message without a default objective".into())
			})?;

		let model_path = self.save_file(&problem.file_name, &problem.file_content)?;
		self.engine
			.read_model(&model_path)
			.map_err(|error| WorkerError::ModelInvalid(error.to_string()))?;

		if let (Some(name), Some(content)) =
			(&problem.data_file_name, &problem.data_file_content)
		{
			let data_path = self.save_file(name, content)?;
			self.engine
				.read_data(&data_path)
				.map_err(|error| WorkerError::ModelInvalid(error.to_string()))?;
		}

		self.constants_by_variable.clear();
		for (constant, definition) in &problem.constants {
			let value = MetricScalar::from_json(constant, &definition.value)
				.map_err(|error| WorkerError::ModelInvalid(error.to_string()))?;
			self.engine
				.set_parameter(constant, &value)
				.map_err(|error| WorkerError::ModelInvalid(error.to_string()))?;
			self.constants_by_variable
				.insert(definition.variable.clone(), constant.clone());
		}

		self.default_objective = Some(default_objective.to_string());
		Ok(())
	}
}

impl SolverWorker for EngineWorker {
	fn load_model(&mut self, problem: &ProblemDefinition) -> Result<(), WorkerError> {
		// A half-loaded model must never be solved against.
		self.problem_defined = false;
		self.load_model_inner(problem)?;
		self.problem_defined = true;
		debug!(model = %problem.file_name, "Model loaded");
		Ok(())
	}

	fn update_data(&mut self, data: &DataFile) -> Result<(), WorkerError> {
		if !self.problem_defined {
			warn!(file = %data.file_name, "Data update before any model; dropped");
			return Ok(());
		}

		let path = self.save_file(&data.file_name, &data.file_content)?;
		self.engine.read_data(&path).map_err(|error| {
			self.problem_defined = false;
			WorkerError::ModelInvalid(error.to_string())
		})?;
		Ok(())
	}

	fn solve(&mut self, context: &ExecutionContext) -> Result<Option<Solution>, WorkerError> {
		if !self.problem_defined {
			debug!(
				timestamp = context.timestamp,
				"Solve requested without a defined problem; nothing to do"
			);
			return Ok(None);
		}

		for (name, value) in &context.metrics {
			let scalar = MetricScalar::from_json(name, value)
				.map_err(|error| WorkerError::TypeUnsupported(error.to_string()))?;
			self.engine
				.set_parameter(name, &scalar)
				.map_err(|error| WorkerError::SolveFailed(error.to_string()))?;
		}

		let goal = context
			.objective
			.clone()
			.or_else(|| self.default_objective.clone())
			.ok_or(WorkerError::ObjectiveMissing)?;

		let mut goal_defined = false;
		for objective in self.engine.objectives() {
			if objective == goal {
				self.engine
					.restore_objective(&objective)
					.map_err(|error| WorkerError::SolveFailed(error.to_string()))?;
				goal_defined = true;
			} else {
				self.engine
					.drop_objective(&objective)
					.map_err(|error| WorkerError::SolveFailed(error.to_string()))?;
			}
		}
		if !goal_defined {
			return Err(WorkerError::ObjectiveUnknown(goal));
		}

		self.engine
			.solve()
			.map_err(|error| WorkerError::SolveFailed(error.to_string()))?;

		let mut objective_values = BTreeMap::new();
		for objective in self.engine.objectives() {
			let value = self
				.engine
				.objective_value(&objective)
				.map_err(|error| WorkerError::SolveFailed(error.to_string()))?;
			objective_values.insert(objective, value);
		}

		let variable_values = self
			.engine
			.variable_values()
			.map_err(|error| WorkerError::SolveFailed(error.to_string()))?;

		// Feed the deployed values back into their constants so the next
		// optimisation compares against the configuration now going out.
		if context.deploy {
			for (variable, value) in &variable_values {
				if let Some(constant) = self.constants_by_variable.get(variable) {
					self.engine
						.set_parameter(constant, &MetricScalar::Float(*value))
						.map_err(|error| WorkerError::SolveFailed(error.to_string()))?;
				}
			}
		}

		Ok(Some(Solution {
			timestamp: context.timestamp,
			objective: goal,
			objective_values,
			variable_values,
			deploy: context.deploy,
		}))
	}
}
