use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide counters for messages that are dropped without a reply.
///
/// Cheap enough to bump from every handler; read by the status logger at
/// shutdown and by tests asserting that a drop actually happened.
#[derive(Debug, Default)]
pub struct DropCounters {
	schema_invalid: AtomicU64,
	unknown_metric: AtomicU64,
	violation_ignored: AtomicU64,
	duplicate_context: AtomicU64,
}

impl DropCounters {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn schema_invalid(&self) {
		self.schema_invalid.fetch_add(1, Ordering::Relaxed);
	}

	pub fn unknown_metric(&self) {
		self.unknown_metric.fetch_add(1, Ordering::Relaxed);
	}

	pub fn violation_ignored(&self) {
		self.violation_ignored.fetch_add(1, Ordering::Relaxed);
	}

	pub fn duplicate_context(&self) {
		self.duplicate_context.fetch_add(1, Ordering::Relaxed);
	}

	pub fn schema_invalid_total(&self) -> u64 {
		self.schema_invalid.load(Ordering::Relaxed)
	}

	pub fn unknown_metric_total(&self) -> u64 {
		self.unknown_metric.load(Ordering::Relaxed)
	}

	pub fn violation_ignored_total(&self) -> u64 {
		self.violation_ignored.load(Ordering::Relaxed)
	}

	pub fn duplicate_context_total(&self) -> u64 {
		self.duplicate_context.load(Ordering::Relaxed)
	}
}
