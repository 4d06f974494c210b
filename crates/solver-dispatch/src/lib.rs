//! Dispatch manager: matches pending contexts to idle solver workers.
//!
//! The manager owns the worker pool and the time-sorted queue. Contexts
//! arrive from the metric cache or from external what-if requesters;
//! whenever workers are idle the oldest contexts are handed out, the
//! pairing among queue entries strictly ascending in prediction time.
//! Solutions come back out of order because workers run in parallel, and
//! are published as they arrive. A failed solve publishes nothing;
//! absence is the failure signal on the wire.

use solver_broker::MessageBus;
use solver_monitoring::DropCounters;
use solver_types::{topics, DataFile, ExecutionContext, ProblemDefinition};
use solver_worker::{WorkerCommand, WorkerEvent, WorkerId, WorkerOutcome, WorkerPool};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

pub mod queue;

pub use queue::ContextQueue;

#[derive(Debug, Error)]
pub enum DispatchError {
	#[error("Duplicate context identifier '{0}'")]
	DuplicateContext(String),
}

/// Commands accepted by the dispatch manager's mailbox.
#[derive(Debug)]
pub enum DispatchCommand {
	/// Queue a context for solving.
	Enqueue(ExecutionContext),
	/// Replace the model on every worker.
	LoadModel(ProblemDefinition),
	/// Replace parameter data on every worker.
	UpdateData(DataFile),
}

pub struct DispatchManager {
	queue: ContextQueue,
	pool: WorkerPool,
	idle: Vec<WorkerId>,
	/// Busy workers and the identifier of the context each one holds.
	/// Identifiers stay reserved while a context is in flight, so a
	/// duplicate sent back-to-back is rejected even if the first was
	/// dispatched immediately.
	busy: HashMap<WorkerId, String>,
	bus: Arc<dyn MessageBus>,
	counters: Arc<DropCounters>,
}

impl DispatchManager {
	pub fn new(pool: WorkerPool, bus: Arc<dyn MessageBus>, counters: Arc<DropCounters>) -> Self {
		let idle = pool.handles().iter().map(|handle| handle.id()).collect();
		Self {
			queue: ContextQueue::new(),
			pool,
			idle,
			busy: HashMap::new(),
			bus,
			counters,
		}
	}

	/// Runs the manager until shutdown, then stops the pool; workers
	/// finish their current solve before the call returns.
	pub async fn run(
		mut self,
		mut commands: mpsc::UnboundedReceiver<DispatchCommand>,
		mut events: mpsc::UnboundedReceiver<WorkerEvent>,
		mut shutdown: broadcast::Receiver<()>,
	) {
		info!(workers = self.pool.len(), "Dispatch manager running");

		loop {
			tokio::select! {
				Some(command) = commands.recv() => self.handle_command(command),
				Some(event) = events.recv() => self.handle_event(event).await,
				_ = shutdown.recv() => break,
			}
		}

		info!(
			pending = self.queue.len(),
			"Dispatch manager stopping; waiting for in-flight solves"
		);
		self.pool.shutdown();
	}

	fn handle_command(&mut self, command: DispatchCommand) {
		match command {
			DispatchCommand::Enqueue(context) => {
				let identifier = context.queue_identifier();
				if self.busy.values().any(|in_flight| *in_flight == identifier) {
					self.counters.duplicate_context();
					warn!(
						context = %identifier,
						"Context identifier already in flight; enqueue rejected"
					);
				} else {
					match self.queue.enqueue(context) {
						Ok(identifier) => {
							debug!(context = %identifier, pending = self.queue.len(), "Context queued")
						}
						Err(DispatchError::DuplicateContext(identifier)) => {
							self.counters.duplicate_context();
							warn!(
								context = %identifier,
								"Context identifier already pending; enqueue rejected"
							);
						}
					}
				}
				self.try_dispatch();
			}
			DispatchCommand::LoadModel(problem) => {
				debug!(model = %problem.file_name, "Broadcasting model to the pool");
				self.pool
					.broadcast(|| WorkerCommand::LoadModel(problem.clone()));
			}
			DispatchCommand::UpdateData(data) => {
				debug!(file = %data.file_name, "Broadcasting data file to the pool");
				self.pool.broadcast(|| WorkerCommand::UpdateData(data.clone()));
			}
		}
	}

	/// Pairs the oldest pending contexts with idle workers, one each,
	/// until either set runs out.
	fn try_dispatch(&mut self) {
		while !self.idle.is_empty() {
			let Some((identifier, context)) = self.queue.pop_oldest() else {
				break;
			};
			let worker = self.idle.pop().expect("idle set checked above");

			debug!(context = %identifier, worker, "Dispatching context");
			self.pool
				.handle(worker)
				.expect("pool handles are stable")
				.send(WorkerCommand::Solve(context));
			self.busy.insert(worker, identifier);
		}

		debug_assert_eq!(self.idle.len() + self.busy.len(), self.pool.len());
	}

	async fn handle_event(&mut self, event: WorkerEvent) {
		if self.busy.remove(&event.worker).is_none() {
			warn!(worker = event.worker, "Result from a worker not marked busy");
		}
		self.idle.push(event.worker);

		match event.outcome {
			WorkerOutcome::Solved(solution) => {
				let timestamp = solution.timestamp;
				match serde_json::to_value(&solution) {
					Ok(payload) => {
						if let Err(error) = self.bus.publish(topics::SOLUTION, payload).await {
							warn!(%error, timestamp, "Failed to publish solution");
						} else {
							info!(
								timestamp,
								objective = %solution.objective,
								deploy = solution.deploy,
								"Solution published"
							);
						}
					}
					Err(error) => warn!(%error, "Solution did not serialise"),
				}
			}
			WorkerOutcome::NoSolution => {
				debug!(worker = event.worker, "Worker had no model; context dropped")
			}
			WorkerOutcome::Failed(error) => {
				warn!(worker = event.worker, %error, "Solve failed; context dropped")
			}
		}

		self.try_dispatch();
	}
}
