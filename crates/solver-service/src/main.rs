//! Service entry point for the optimisation-request pipeline.
//!
//! Loads the configuration (file, environment, then flags, in increasing
//! precedence), wires the runtime to the broker, and runs until a stop
//! signal arrives. Exit code 0 on clean shutdown, non-zero when
//! initialisation fails.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use solver_broker::InMemoryBroker;
use solver_config::Config;
use solver_core::{engine_factory, SolverRuntimeBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

#[derive(Parser)]
#[command(name = "opt-solver")]
#[command(about = "Optimisation-request pipeline for the auto-reconfiguration platform", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	/// Configuration file; flags override its values.
	#[arg(short, long, value_name = "FILE")]
	config: Option<PathBuf>,

	/// Tenant id stamped on and filtered from every broker message.
	#[arg(long, env = "SOLVER_APPLICATION")]
	application: Option<String>,

	/// Solver identity used in status messages.
	#[arg(long)]
	name: Option<String>,

	/// Worker pool size; each worker owns one engine instance.
	#[arg(long)]
	workers: Option<usize>,

	#[arg(long)]
	broker_url: Option<String>,

	#[arg(long)]
	broker_port: Option<u16>,

	#[arg(long)]
	username: Option<String>,

	#[arg(long, env = "SOLVER_BROKER_PASSWORD", hide_env_values = true)]
	password: Option<String>,

	/// Engine backend tag resolved through the factory registry.
	#[arg(long)]
	engine_backend: Option<String>,

	/// Installation directory of the engine distribution.
	#[arg(long)]
	engine_path: Option<PathBuf>,

	/// Directory for persisted model and data files.
	#[arg(long)]
	model_directory: Option<PathBuf>,

	#[arg(long, env = "SOLVER_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the solver component.
	Start,
	/// Validate the configuration and exit.
	Validate,
}

impl Cli {
	/// Resolves the effective configuration: file, environment overrides,
	/// then command-line flags.
	fn resolve_config(&self) -> Result<Config> {
		let mut config = match &self.config {
			Some(path) => Config::from_file(path)
				.with_context(|| format!("Failed to load configuration from {:?}", path))?,
			None => Config::default(),
		};

		config.apply_env_overrides();

		if let Some(application) = &self.application {
			config.solver.application = application.clone();
		}
		if let Some(name) = &self.name {
			config.solver.name = name.clone();
		}
		if let Some(workers) = self.workers {
			config.solver.workers = workers;
		}
		if let Some(url) = &self.broker_url {
			config.broker.url = url.clone();
		}
		if let Some(port) = self.broker_port {
			config.broker.port = port;
		}
		if let Some(username) = &self.username {
			config.broker.username = Some(username.clone());
		}
		if let Some(password) = &self.password {
			config.broker.password = Some(password.clone());
		}
		if let Some(backend) = &self.engine_backend {
			config.engine.backend = backend.clone();
		}
		if let Some(path) = &self.engine_path {
			config.engine.install_path = Some(path.clone());
		}
		if let Some(directory) = &self.model_directory {
			config.engine.model_directory = directory.clone();
		}

		config.validate().context("Invalid configuration")?;
		Ok(config)
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	solver_monitoring::init_tracing(&cli.log_level);

	match cli.command {
		Some(Commands::Start) | None => start(cli).await,
		Some(Commands::Validate) => validate(cli),
	}
}

async fn start(cli: Cli) -> Result<()> {
	let config = cli.resolve_config()?;

	info!(
		application = %config.solver.application,
		broker = %format!("{}:{}", config.broker.url, config.broker.port),
		workers = config.solver.workers,
		backend = %config.engine.backend,
		"Starting solver component"
	);

	// The platform broker is an external collaborator behind the
	// MessageBus trait; without one configured the component runs against
	// the in-process bus, which is what local development uses.
	let bus = Arc::new(InMemoryBroker::new(config.solver.application.clone()));

	let mut runtime = SolverRuntimeBuilder::new()
		.with_config(config)
		.with_bus(bus)
		.build()
		.context("Failed to build the solver runtime")?;

	runtime
		.start()
		.await
		.context("Failed to start the solver runtime")?;

	let lifecycle = runtime.lifecycle();
	tokio::select! {
		_ = shutdown_signal() => info!("Stop signal received"),
		_ = lifecycle.wait_for_termination() => {}
	}

	runtime
		.shutdown()
		.await
		.context("Failed to shut down cleanly")?;
	Ok(())
}

fn validate(cli: Cli) -> Result<()> {
	let config = cli.resolve_config()?;
	engine_factory(&config.engine).context("Engine backend not available")?;

	info!("Configuration is valid");
	info!(application = %config.solver.application, "Tenant");
	info!(workers = config.solver.workers, "Worker pool");
	info!(backend = %config.engine.backend, "Engine backend");
	info!(directory = %config.engine.model_directory.display(), "Model directory");
	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install signal handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
