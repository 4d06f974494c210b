//! Configuration for the optimiser solver component.
//!
//! Settings come from a TOML file, may be overridden by `SOLVER_*`
//! environment variables, and finally by command-line flags in the service
//! binary. Validation failures are fatal at startup; nothing else in the
//! pipeline aborts the process.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Parse error: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("Validation error: {0}")]
	Validation(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub solver: SolverSettings,
	pub broker: BrokerSettings,
	pub engine: EngineSettings,
	#[serde(default)]
	pub monitoring: MonitoringSettings,
}

/// Identity and sizing of this solver instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SolverSettings {
	/// Name under which status messages are published.
	#[serde(default = "default_solver_name")]
	pub name: String,

	/// Tenant id; every broker message is stamped and filtered with it.
	pub application: String,

	/// Number of parallel solver workers, each owning one engine instance.
	#[serde(default = "default_workers")]
	pub workers: usize,

	/// Violation events with a probability below this threshold are
	/// ignored. Zero means every event triggers a reconfiguration.
	#[serde(default)]
	pub violation_threshold: f64,
}

fn default_solver_name() -> String {
	"opt-solver".to_string()
}

fn default_workers() -> usize {
	1
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerSettings {
	#[serde(default = "default_broker_url")]
	pub url: String,

	#[serde(default = "default_broker_port")]
	pub port: u16,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub username: Option<String>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub password: Option<String>,
}

fn default_broker_url() -> String {
	"localhost".to_string()
}

fn default_broker_port() -> u16 {
	5672
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
	/// Engine backend tag, resolved through the engine factory registry.
	#[serde(default = "default_backend")]
	pub backend: String,

	/// Installation directory of the engine distribution. Empty means the
	/// backend resolves it from its own environment.
	#[serde(default)]
	pub install_path: Option<PathBuf>,

	/// Directory where model and data files are persisted, one
	/// subdirectory per worker.
	#[serde(default = "default_model_directory")]
	pub model_directory: PathBuf,
}

fn default_backend() -> String {
	"linear".to_string()
}

fn default_model_directory() -> PathBuf {
	std::env::temp_dir().join("opt-solver-models")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringSettings {
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

impl Default for MonitoringSettings {
	fn default() -> Self {
		Self { log_level: default_log_level() }
	}
}

fn default_log_level() -> String {
	"info".to_string()
}

impl Default for Config {
	fn default() -> Self {
		Self {
			solver: SolverSettings::default(),
			broker: BrokerSettings::default(),
			engine: EngineSettings::default(),
			monitoring: MonitoringSettings::default(),
		}
	}
}

impl Default for SolverSettings {
	fn default() -> Self {
		Self {
			name: default_solver_name(),
			// The tenant id has no sensible default; validation rejects
			// the empty string unless a flag or file supplies one.
			application: String::new(),
			workers: default_workers(),
			violation_threshold: 0.0,
		}
	}
}

impl Default for BrokerSettings {
	fn default() -> Self {
		Self {
			url: default_broker_url(),
			port: default_broker_port(),
			username: None,
			password: None,
		}
	}
}

impl Default for EngineSettings {
	fn default() -> Self {
		Self {
			backend: default_backend(),
			install_path: None,
			model_directory: default_model_directory(),
		}
	}
}

impl Config {
	/// Parses a config file without validating it; flags and environment
	/// overrides may still fill mandatory values, so callers validate once
	/// the configuration is complete.
	pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path)?;
		Ok(toml::from_str(&content)?)
	}

	/// Applies `SOLVER_*` environment overrides for values that are
	/// usually injected by the deployment rather than written to disk.
	pub fn apply_env_overrides(&mut self) {
		if let Ok(application) = std::env::var("SOLVER_APPLICATION") {
			debug!("Overriding tenant id from environment");
			self.solver.application = application;
		}
		if let Ok(url) = std::env::var("SOLVER_BROKER_URL") {
			self.broker.url = url;
		}
		if let Ok(port) = std::env::var("SOLVER_BROKER_PORT") {
			if let Ok(port) = port.parse() {
				self.broker.port = port;
			}
		}
		if let Ok(username) = std::env::var("SOLVER_BROKER_USERNAME") {
			self.broker.username = Some(username);
		}
		if let Ok(password) = std::env::var("SOLVER_BROKER_PASSWORD") {
			debug!("Overriding broker credentials from environment");
			self.broker.password = Some(password);
		}
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.solver.application.is_empty() {
			return Err(ConfigError::Validation(
				"Tenant id (solver.application) cannot be empty".into(),
			));
		}

		if self.solver.workers == 0 {
			return Err(ConfigError::Validation(
				"Worker pool size must be at least 1".into(),
			));
		}

		if self.broker.url.is_empty() {
			return Err(ConfigError::Validation("Broker URL cannot be empty".into()));
		}

		if self.engine.backend.is_empty() {
			return Err(ConfigError::Validation(
				"Engine backend tag cannot be empty".into(),
			));
		}

		if !(0.0..=1.0).contains(&self.solver.violation_threshold) {
			return Err(ConfigError::Validation(format!(
				"Violation threshold {} outside [0, 1]",
				self.solver.violation_threshold
			)));
		}

		Ok(())
	}
}

impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let config: Config = toml::from_str(s)?;
		config.validate()?;
		Ok(config)
	}
}
