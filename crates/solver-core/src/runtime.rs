//! Construction and wiring of the pipeline.
//!
//! The runtime owns the background tasks: the dispatch manager (with its
//! worker pool), the metric cache, and an intake router translating model,
//! data and context messages into dispatch commands. Status messages
//! bracket the lifetime on the wire: starting, started, stopping, stopped.

use crate::{engine_factory, CoreError, LifecycleManager};
use solver_broker::{Envelope, MessageBus, TopicPattern};
use solver_config::Config;
use solver_context::MetricCache;
use solver_dispatch::{DispatchCommand, DispatchManager};
use solver_engine::EngineFactory;
use solver_monitoring::DropCounters;
use solver_types::{topics, DataFile, ExecutionContext, ProblemDefinition, SolverState, StatusUpdate};
use solver_worker::WorkerPool;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct SolverRuntime {
	config: Config,
	bus: Arc<dyn MessageBus>,
	engine: EngineFactory,
	lifecycle: Arc<LifecycleManager>,
	counters: Arc<DropCounters>,
	tasks: Vec<JoinHandle<()>>,
}

impl SolverRuntime {
	pub fn lifecycle(&self) -> Arc<LifecycleManager> {
		self.lifecycle.clone()
	}

	pub fn counters(&self) -> Arc<DropCounters> {
		self.counters.clone()
	}

	/// Wires the components to the broker and spawns their tasks.
	pub async fn start(&mut self) -> Result<(), CoreError> {
		self.publish_status(SolverState::Starting).await?;

		// Dispatch manager and its worker pool.
		let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
		let (worker_events_tx, worker_events_rx) = mpsc::unbounded_channel();
		let pool = WorkerPool::spawn(
			self.config.solver.workers,
			self.engine.clone(),
			&self.config.engine.model_directory,
			worker_events_tx,
		);
		let manager = DispatchManager::new(pool, self.bus.clone(), self.counters.clone());
		self.tasks.push(tokio::spawn(manager.run(
			dispatch_rx,
			worker_events_rx,
			self.lifecycle.subscribe_shutdown(),
		)));

		// Metric cache; its mailbox also serves the per-metric
		// subscriptions it creates on declarations.
		let (cache_tx, cache_rx) = mpsc::unbounded_channel();
		for topic in [
			topics::METRIC_LIST,
			topics::VIOLATION,
			topics::APP_STATE,
			topics::ADAPTATIONS,
		] {
			self.bus
				.attach(TopicPattern::Exact(topic.to_string()), cache_tx.clone())
				.await?;
		}
		let cache = MetricCache::new(
			self.bus.clone(),
			cache_tx,
			dispatch_tx.clone(),
			self.counters.clone(),
			self.config.solver.violation_threshold,
		);
		self.tasks.push(tokio::spawn(
			cache.run(cache_rx, self.lifecycle.subscribe_shutdown()),
		));

		// Intake router: model, data and what-if context messages.
		let (intake_tx, intake_rx) = mpsc::unbounded_channel();
		for topic in [topics::MODEL, topics::DATA, topics::CONTEXT] {
			self.bus
				.attach(TopicPattern::Exact(topic.to_string()), intake_tx.clone())
				.await?;
		}
		self.tasks.push(tokio::spawn(route_intake(
			intake_rx,
			dispatch_tx,
			self.counters.clone(),
			self.lifecycle.subscribe_shutdown(),
		)));

		self.publish_status(SolverState::Started).await?;
		info!(
			application = %self.config.solver.application,
			workers = self.config.solver.workers,
			"Solver component started"
		);
		Ok(())
	}

	/// Graceful shutdown: components stop after their current work and
	/// in-flight solves run to completion before this returns.
	pub async fn shutdown(&mut self) -> Result<(), CoreError> {
		self.publish_status(SolverState::Stopping).await?;
		self.lifecycle.stop().await;

		for task in self.tasks.drain(..) {
			if task.await.is_err() {
				warn!("A pipeline task panicked during shutdown");
			}
		}

		info!(
			schema_invalid = self.counters.schema_invalid_total(),
			unknown_metric = self.counters.unknown_metric_total(),
			violation_ignored = self.counters.violation_ignored_total(),
			duplicate_context = self.counters.duplicate_context_total(),
			"Silent-drop totals at shutdown"
		);

		self.publish_status(SolverState::Stopped).await?;
		self.bus.close().await?;
		info!("Solver component stopped");
		Ok(())
	}

	async fn publish_status(&self, state: SolverState) -> Result<(), CoreError> {
		let update = StatusUpdate::now(state);
		let payload = serde_json::to_value(&update)
			.expect("status updates always serialise");
		self.bus.publish(topics::SOLVER_STATE, payload).await?;
		Ok(())
	}
}

/// Routes solver-facing topics into dispatch commands.
async fn route_intake(
	mut intake: mpsc::UnboundedReceiver<Envelope>,
	dispatch: mpsc::UnboundedSender<DispatchCommand>,
	counters: Arc<DropCounters>,
	mut shutdown: broadcast::Receiver<()>,
) {
	loop {
		tokio::select! {
			Some(envelope) = intake.recv() => {
				let command = match envelope.topic.as_str() {
					topics::MODEL => {
						match serde_json::from_value::<ProblemDefinition>(envelope.payload) {
							Ok(problem) => Some(DispatchCommand::LoadModel(problem)),
							Err(error) => {
								counters.schema_invalid();
								warn!(%error, "Malformed model message dropped");
								None
							}
						}
					}
					topics::DATA => {
						match serde_json::from_value::<DataFile>(envelope.payload) {
							Ok(data) => Some(DispatchCommand::UpdateData(data)),
							Err(error) => {
								counters.schema_invalid();
								warn!(%error, "Malformed data message dropped");
								None
							}
						}
					}
					topics::CONTEXT => {
						match serde_json::from_value::<ExecutionContext>(envelope.payload) {
							Ok(context) => Some(DispatchCommand::Enqueue(context)),
							Err(error) => {
								counters.schema_invalid();
								warn!(%error, "Malformed context message dropped");
								None
							}
						}
					}
					other => {
						debug!(topic = other, "Message on an unrouted topic ignored");
						None
					}
				};

				if let Some(command) = command {
					if dispatch.send(command).is_err() {
						break;
					}
				}
			}
			_ = shutdown.recv() => break,
		}
	}
}

pub struct SolverRuntimeBuilder {
	config: Option<Config>,
	bus: Option<Arc<dyn MessageBus>>,
	engine: Option<EngineFactory>,
}

impl SolverRuntimeBuilder {
	pub fn new() -> Self {
		Self { config: None, bus: None, engine: None }
	}

	pub fn with_config(mut self, config: Config) -> Self {
		self.config = Some(config);
		self
	}

	pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
		self.bus = Some(bus);
		self
	}

	/// Overrides the engine factory; by default the factory is resolved
	/// from the configured backend tag.
	pub fn with_engine_factory(mut self, engine: EngineFactory) -> Self {
		self.engine = Some(engine);
		self
	}

	pub fn build(self) -> Result<SolverRuntime, CoreError> {
		let config = self
			.config
			.ok_or_else(|| CoreError::Configuration("No configuration provided".into()))?;
		let bus = self
			.bus
			.ok_or_else(|| CoreError::Configuration("No message bus provided".into()))?;
		let engine = match self.engine {
			Some(engine) => engine,
			None => engine_factory(&config.engine)?,
		};

		Ok(SolverRuntime {
			config,
			bus,
			engine,
			lifecycle: Arc::new(LifecycleManager::new()),
			counters: DropCounters::new(),
			tasks: Vec::new(),
		})
	}
}

impl Default for SolverRuntimeBuilder {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use solver_broker::InMemoryBroker;
	use solver_config::{BrokerSettings, EngineSettings, MonitoringSettings, SolverSettings};
	use std::time::Duration;
	use tokio::time::timeout;

	const MODEL: &str = r#"
param m default 0;
param cur_x default 0;
var x integer >= 0 <= 100;
maximize MaxUtility : 3 * x - m;
subject to cap : x <= m;
"#;

	struct Harness {
		runtime: SolverRuntime,
		bus: Arc<InMemoryBroker>,
		solutions: mpsc::UnboundedReceiver<Envelope>,
		statuses: mpsc::UnboundedReceiver<Envelope>,
		_dir: tempfile::TempDir,
	}

	async fn harness(workers: usize) -> Harness {
		let dir = tempfile::tempdir().unwrap();
		let config = Config {
			solver: SolverSettings {
				name: "opt-solver-test".into(),
				application: "tenant-a".into(),
				workers,
				violation_threshold: 0.0,
			},
			broker: BrokerSettings {
				url: "localhost".into(),
				port: 5672,
				username: None,
				password: None,
			},
			engine: EngineSettings {
				backend: "linear".into(),
				install_path: None,
				model_directory: dir.path().to_path_buf(),
			},
			monitoring: MonitoringSettings::default(),
		};

		let bus = Arc::new(InMemoryBroker::new("tenant-a"));

		let (solutions_tx, solutions) = mpsc::unbounded_channel();
		bus.attach(TopicPattern::Exact(topics::SOLUTION.into()), solutions_tx)
			.await
			.unwrap();
		let (statuses_tx, statuses) = mpsc::unbounded_channel();
		bus.attach(TopicPattern::Exact(topics::SOLVER_STATE.into()), statuses_tx)
			.await
			.unwrap();

		let mut runtime = SolverRuntimeBuilder::new()
			.with_config(config)
			.with_bus(bus.clone())
			.build()
			.unwrap();
		runtime.start().await.unwrap();

		Harness { runtime, bus, solutions, statuses, _dir: dir }
	}

	/// Lets the spawned tasks drain their mailboxes between wire steps.
	async fn settle() {
		tokio::time::sleep(Duration::from_millis(50)).await;
	}

	async fn publish(harness: &Harness, topic: &str, payload: serde_json::Value) {
		harness.bus.publish(topic, payload).await.unwrap();
		settle().await;
	}

	async fn publish_model(harness: &Harness) {
		publish(
			harness,
			topics::MODEL,
			json!({
				"FileName": "allocation.mod",
				"FileContent": MODEL,
				"ObjectiveFunction": "MaxUtility",
				"Constants": { "cur_x": { "Variable": "x", "Value": 0 } }
			}),
		)
		.await;
	}

	async fn next_solution(harness: &mut Harness) -> serde_json::Value {
		timeout(Duration::from_secs(5), harness.solutions.recv())
			.await
			.expect("a solution in time")
			.expect("bus alive")
			.payload
	}

	#[tokio::test]
	async fn cold_start_to_first_solution() {
		let mut harness = harness(1).await;

		publish_model(&harness).await;
		publish(
			&harness,
			topics::METRIC_LIST,
			json!({ "metrics": [ { "name": "m" } ], "version": 1 }),
		)
		.await;
		publish(
			&harness,
			"monitoring.predicted.m",
			json!({ "metricValue": 5, "predictionTime": 900 }),
		)
		.await;
		publish(
			&harness,
			topics::APP_STATE,
			json!({ "when": "2026-08-02T10:00:00Z", "state": "RUNNING" }),
		)
		.await;
		publish(&harness, topics::VIOLATION, json!({ "predictionTime": 1000 })).await;

		let solution = next_solution(&mut harness).await;
		assert_eq!(solution["Timestamp"], 1000);
		assert_eq!(solution["ObjectiveFunction"], "MaxUtility");
		assert_eq!(solution["DeploySolution"], true);
		assert_eq!(solution["VariableValues"]["x"], 5.0);

		// Exactly one solution for one violation.
		assert!(harness.solutions.try_recv().is_err());

		harness.runtime.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn violation_is_ignored_before_running() {
		let mut harness = harness(1).await;

		publish_model(&harness).await;
		publish(
			&harness,
			topics::METRIC_LIST,
			json!({ "metrics": [ { "name": "m" } ], "version": 1 }),
		)
		.await;
		publish(
			&harness,
			"monitoring.predicted.m",
			json!({ "metricValue": 5, "predictionTime": 900 }),
		)
		.await;
		// Lifecycle never reaches RUNNING.
		publish(&harness, topics::VIOLATION, json!({ "predictionTime": 1000 })).await;

		assert!(
			timeout(Duration::from_millis(300), harness.solutions.recv())
				.await
				.is_err()
		);
		assert!(harness.runtime.counters().violation_ignored_total() >= 1);

		harness.runtime.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn what_if_contexts_run_without_deploying() {
		let mut harness = harness(2).await;
		publish_model(&harness).await;

		for (timestamp, m) in [(2000, 4), (2100, 6)] {
			harness
				.bus
				.publish(
					topics::CONTEXT,
					json!({
						"Timestamp": timestamp,
						"ExecutionContext": { "m": m },
						"DeploySolution": false
					}),
				)
				.await
				.unwrap();
		}

		let mut seen = Vec::new();
		for _ in 0..2 {
			let solution = next_solution(&mut harness).await;
			assert_eq!(solution["DeploySolution"], false);
			seen.push((
				solution["Timestamp"].as_i64().unwrap(),
				solution["VariableValues"]["x"].as_f64().unwrap(),
			));
		}
		seen.sort_by_key(|(timestamp, _)| *timestamp);
		assert_eq!(seen, vec![(2000, 4.0), (2100, 6.0)]);

		harness.runtime.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn malformed_model_messages_are_dropped() {
		let mut harness = harness(1).await;

		publish(&harness, topics::MODEL, json!({ "FileContent": 42 })).await;
		assert!(harness.runtime.counters().schema_invalid_total() >= 1);

		// The pipeline still works afterwards.
		publish_model(&harness).await;
		publish(
			&harness,
			topics::CONTEXT,
			json!({
				"Timestamp": 3000,
				"ExecutionContext": { "m": 2 },
				"DeploySolution": false
			}),
		)
		.await;
		let solution = next_solution(&mut harness).await;
		assert_eq!(solution["Timestamp"], 3000);

		harness.runtime.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn status_messages_bracket_the_lifetime() {
		let mut harness = harness(1).await;
		harness.runtime.shutdown().await.unwrap();

		let mut states = Vec::new();
		while let Ok(envelope) = harness.statuses.try_recv() {
			states.push(envelope.payload["state"].as_str().unwrap().to_string());
			assert!(envelope.payload["when"].is_string());
		}
		assert_eq!(states, vec!["starting", "started", "stopping", "stopped"]);
	}
}
