//! Time-sorted queue of pending execution contexts.
//!
//! Two indexes cover the same entries: a by-identifier map enforcing
//! uniqueness and a by-prediction-time ordering for FIFO-by-time dispatch,
//! with ties broken by insertion order. An entry lives in both indexes or
//! in neither.

use crate::DispatchError;
use solver_types::{ExecutionContext, TimePoint};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct ContextQueue {
	entries: HashMap<String, ExecutionContext>,
	by_time: BTreeMap<(TimePoint, u64), String>,
	sequence: u64,
}

impl ContextQueue {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts a context under its queue identifier.
	///
	/// Identifiers must be unique across all pending entries; a collision
	/// is a caller contract violation and fails only this enqueue.
	pub fn enqueue(&mut self, context: ExecutionContext) -> Result<String, DispatchError> {
		let identifier = context.queue_identifier();
		if self.entries.contains_key(&identifier) {
			return Err(DispatchError::DuplicateContext(identifier));
		}

		self.by_time
			.insert((context.timestamp, self.sequence), identifier.clone());
		self.sequence += 1;
		self.entries.insert(identifier.clone(), context);
		Ok(identifier)
	}

	/// Removes and returns the entry with the smallest prediction time,
	/// oldest insertion first among equal times.
	pub fn pop_oldest(&mut self) -> Option<(String, ExecutionContext)> {
		let (&key, _) = self.by_time.iter().next()?;
		let identifier = self.by_time.remove(&key).expect("key taken from the index");
		let context = self
			.entries
			.remove(&identifier)
			.expect("indexes cover the same entries");
		Some((identifier, context))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn contains(&self, identifier: &str) -> bool {
		self.entries.contains_key(identifier)
	}

	/// True when both indexes cover exactly the same identifiers.
	#[cfg(test)]
	pub fn indexes_agree(&self) -> bool {
		if self.entries.len() != self.by_time.len() {
			return false;
		}
		self.by_time
			.values()
			.all(|identifier| self.entries.contains_key(identifier))
	}
}
