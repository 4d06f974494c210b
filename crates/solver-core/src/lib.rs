//! Runtime wiring for the optimiser solver component.
//!
//! Builds the pipeline out of its parts (worker pool, dispatch manager,
//! metric cache, lifecycle control) and connects them to the broker:
//! every inbound topic is routed by its topic string into the owning
//! component's mailbox, and solver status is broadcast at startup and
//! shutdown.

use solver_config::EngineSettings;
use solver_engine::{linear_factory, EngineFactory};
use thiserror::Error;

pub mod lifecycle;
pub mod runtime;

pub use lifecycle::LifecycleManager;
pub use runtime::{SolverRuntime, SolverRuntimeBuilder};

#[derive(Debug, Error)]
pub enum CoreError {
	#[error("Configuration error: {0}")]
	Configuration(String),
	#[error("Transport error: {0}")]
	Transport(#[from] solver_broker::BrokerError),
}

/// Resolves an engine backend tag to a factory.
///
/// An unknown tag is a configuration error and fatal at startup; the
/// production backend registers here once its integration is linked in.
pub fn engine_factory(settings: &EngineSettings) -> Result<EngineFactory, CoreError> {
	match settings.backend.as_str() {
		"linear" => Ok(linear_factory()),
		other => Err(CoreError::Configuration(format!(
			"Unknown engine backend '{}'",
			other
		))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unknown_engine_backends_are_rejected() {
		let settings = EngineSettings {
			backend: "simplex-pro".into(),
			install_path: None,
			model_directory: std::env::temp_dir(),
		};

		assert!(matches!(
			engine_factory(&settings),
			Err(CoreError::Configuration(_))
		));
	}

	#[test]
	fn linear_backend_resolves() {
		let settings = EngineSettings {
			backend: "linear".into(),
			install_path: None,
			model_directory: std::env::temp_dir(),
		};

		assert!(engine_factory(&settings).is_ok());
	}
}
