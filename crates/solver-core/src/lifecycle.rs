//! Process-wide termination control.
//!
//! One control object per process, constructed in main and passed down:
//! a one-way running flag plus a broadcast channel waking every task and
//! thread blocked on termination. Components subscribe for shutdown and
//! finish their current work cooperatively; an in-flight solve always runs
//! to completion.

use tokio::sync::{broadcast, RwLock};
use tracing::info;

pub struct LifecycleManager {
	running: RwLock<bool>,
	shutdown_tx: broadcast::Sender<()>,
}

impl LifecycleManager {
	pub fn new() -> Self {
		let (shutdown_tx, _) = broadcast::channel(16);
		Self { running: RwLock::new(true), shutdown_tx }
	}

	pub async fn is_running(&self) -> bool {
		*self.running.read().await
	}

	pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
		self.shutdown_tx.subscribe()
	}

	/// Flips the running flag and wakes every waiter. The transition is
	/// one-way; repeated stops are no-ops.
	pub async fn stop(&self) {
		let mut running = self.running.write().await;
		if !*running {
			return;
		}
		*running = false;
		info!("Stop requested; signalling all components");
		let _ = self.shutdown_tx.send(());
	}

	/// Blocks until [`LifecycleManager::stop`] has been called.
	pub async fn wait_for_termination(&self) {
		let mut shutdown_rx = self.subscribe_shutdown();
		if !self.is_running().await {
			return;
		}
		let _ = shutdown_rx.recv().await;
	}
}

impl Default for LifecycleManager {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::time::Duration;

	#[tokio::test]
	async fn stop_is_one_way_and_wakes_waiters() {
		let lifecycle = Arc::new(LifecycleManager::new());
		assert!(lifecycle.is_running().await);

		let waiter = {
			let lifecycle = lifecycle.clone();
			tokio::spawn(async move { lifecycle.wait_for_termination().await })
		};

		lifecycle.stop().await;
		tokio::time::timeout(Duration::from_secs(1), waiter)
			.await
			.expect("waiter woke up")
			.unwrap();

		assert!(!lifecycle.is_running().await);

		// A second stop changes nothing and does not panic.
		lifecycle.stop().await;
		assert!(!lifecycle.is_running().await);

		// Waiting after the fact returns immediately.
		lifecycle.wait_for_termination().await;
	}
}
