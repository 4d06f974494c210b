//! OS-thread pool of solver workers.
//!
//! The engine's solve call is blocking and CPU-bound, so every worker runs
//! on a dedicated, named thread owning its engine instance and its working
//! directory. Commands arrive over a per-worker channel and are processed
//! strictly in order, which is what guarantees that a solve observes every
//! model and data update that preceded it. Solve outcomes flow back to the
//! dispatch manager over a shared channel that is safe to send on from
//! synchronous threads.

use crate::{EngineWorker, SolverWorker, WorkerError};
use solver_engine::EngineFactory;
use solver_types::{DataFile, ExecutionContext, ProblemDefinition, Solution};
use std::path::Path;
use std::sync::mpsc;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

pub type WorkerId = usize;

/// Commands a worker thread processes in arrival order.
#[derive(Debug)]
pub enum WorkerCommand {
	LoadModel(ProblemDefinition),
	UpdateData(DataFile),
	Solve(ExecutionContext),
	Shutdown,
}

/// Result of one dispatched solve.
#[derive(Debug)]
pub enum WorkerOutcome {
	Solved(Solution),
	/// The worker had no defined problem; nothing is published.
	NoSolution,
	Failed(WorkerError),
}

/// Sent to the dispatch manager when a worker finishes a solve.
#[derive(Debug)]
pub struct WorkerEvent {
	pub worker: WorkerId,
	pub outcome: WorkerOutcome,
}

/// Handle through which the dispatch manager drives one worker.
pub struct WorkerHandle {
	id: WorkerId,
	commands: mpsc::Sender<WorkerCommand>,
	thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
	pub fn id(&self) -> WorkerId {
		self.id
	}

	/// Queues a command; ordering per worker is the channel order.
	pub fn send(&self, command: WorkerCommand) {
		if self.commands.send(command).is_err() {
			error!(worker = self.id, "Worker thread is gone; command dropped");
		}
	}
}

/// The fixed-size pool of solver workers.
pub struct WorkerPool {
	workers: Vec<WorkerHandle>,
}

impl WorkerPool {
	/// Spawns `size` workers, each with its own engine instance from
	/// `factory` and its own working directory under `model_directory`.
	pub fn spawn(
		size: usize,
		factory: EngineFactory,
		model_directory: &Path,
		events: tokio::sync::mpsc::UnboundedSender<WorkerEvent>,
	) -> Self {
		assert!(size >= 1, "worker pool requires at least one worker");

		let workers = (0..size)
			.map(|id| {
				let (tx, rx) = mpsc::channel();
				let worker = EngineWorker::new(
					factory(),
					model_directory.join(format!("worker-{}", id)),
				);
				let events = events.clone();

				let thread = std::thread::Builder::new()
					.name(format!("solver-worker-{}", id))
					.spawn(move || run_worker(id, worker, rx, events))
					.expect("failed to spawn solver worker thread");

				WorkerHandle { id, commands: tx, thread: Some(thread) }
			})
			.collect();

		info!(workers = size, "Worker pool started");
		Self { workers }
	}

	pub fn len(&self) -> usize {
		self.workers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.workers.is_empty()
	}

	pub fn handles(&self) -> &[WorkerHandle] {
		&self.workers
	}

	pub fn handle(&self, id: WorkerId) -> Option<&WorkerHandle> {
		self.workers.iter().find(|worker| worker.id == id)
	}

	/// Sends a command to every worker; model and data definitions apply
	/// to the whole pool.
	pub fn broadcast(&self, make: impl Fn() -> WorkerCommand) {
		for worker in &self.workers {
			worker.send(make());
		}
	}

	/// Asks every worker to stop after its current command and waits for
	/// the threads. In-flight solves run to completion.
	pub fn shutdown(&mut self) {
		for worker in &self.workers {
			worker.send(WorkerCommand::Shutdown);
		}
		for worker in &mut self.workers {
			if let Some(thread) = worker.thread.take() {
				if thread.join().is_err() {
					error!(worker = worker.id, "Worker thread panicked during shutdown");
				}
			}
		}
		info!("Worker pool stopped");
	}
}

fn run_worker(
	id: WorkerId,
	mut worker: EngineWorker,
	commands: mpsc::Receiver<WorkerCommand>,
	events: tokio::sync::mpsc::UnboundedSender<WorkerEvent>,
) {
	debug!(worker = id, "Worker thread running");

	while let Ok(command) = commands.recv() {
		match command {
			WorkerCommand::LoadModel(problem) => {
				if let Err(error) = worker.load_model(&problem) {
					error!(worker = id, %error, "Model load failed");
				}
			}
			WorkerCommand::UpdateData(data) => {
				if let Err(error) = worker.update_data(&data) {
					error!(worker = id, %error, "Data update failed");
				}
			}
			WorkerCommand::Solve(context) => {
				let outcome = match worker.solve(&context) {
					Ok(Some(solution)) => WorkerOutcome::Solved(solution),
					Ok(None) => WorkerOutcome::NoSolution,
					Err(error) => WorkerOutcome::Failed(error),
				};
				if events.send(WorkerEvent { worker: id, outcome }).is_err() {
					// The dispatch side is gone; nothing left to serve.
					break;
				}
			}
			WorkerCommand::Shutdown => break,
		}
	}

	debug!(worker = id, "Worker thread stopped");
}
