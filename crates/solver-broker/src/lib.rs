//! Transport seam of the solver component.
//!
//! The platform runs a topic-based publish/subscribe broker with
//! per-consumer filtering on the `application` property. The broker itself
//! is an external collaborator; this crate defines the [`MessageBus`]
//! trait the pipeline programs against and ships an in-memory
//! implementation used by tests and local runs.
//!
//! Subscriptions feed a component's own mailbox sender, so each component
//! stays single-threaded over one ordered stream and routes inbound
//! messages by topic string at the transport boundary.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod implementations {
	pub mod memory;
}

pub use implementations::memory::InMemoryBroker;

#[derive(Debug, Error)]
pub enum BrokerError {
	#[error("Transport closed")]
	Closed,
	#[error("Unknown subscription {0}")]
	UnknownSubscription(SubscriptionId),
	#[error("Transport error: {0}")]
	Transport(String),
}

/// Identifier of an active subscription, used to unsubscribe.
pub type SubscriptionId = u64;

/// One message as delivered by the transport.
#[derive(Debug, Clone)]
pub struct Envelope {
	pub topic: String,
	/// Tenant id stamped by the producer and filtered by the consumer.
	pub application: String,
	pub payload: Value,
}

/// What a subscription should match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicPattern {
	Exact(String),
	/// Matches every topic starting with the prefix; used for the
	/// per-metric prediction topics.
	Prefix(String),
}

impl TopicPattern {
	pub fn matches(&self, topic: &str) -> bool {
		match self {
			Self::Exact(name) => name == topic,
			Self::Prefix(prefix) => topic.starts_with(prefix.as_str()),
		}
	}
}

/// Topic-based publish/subscribe with tenant filtering.
#[async_trait]
pub trait MessageBus: Send + Sync {
	/// Publishes a JSON payload, stamped with this producer's tenant id.
	async fn publish(&self, topic: &str, payload: Value) -> Result<(), BrokerError>;

	/// Routes every message matching `pattern` into `mailbox`.
	async fn attach(
		&self,
		pattern: TopicPattern,
		mailbox: mpsc::UnboundedSender<Envelope>,
	) -> Result<SubscriptionId, BrokerError>;

	/// Cancels a subscription created by [`MessageBus::attach`].
	async fn detach(&self, id: SubscriptionId) -> Result<(), BrokerError>;

	/// Closes the transport; subsequent publishes fail with
	/// [`BrokerError::Closed`].
	async fn close(&self) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn patterns_match_expected_topics() {
		let exact = TopicPattern::Exact("optimiser.solver.context".into());
		assert!(exact.matches("optimiser.solver.context"));
		assert!(!exact.matches("optimiser.solver.context.extra"));

		let prefix = TopicPattern::Prefix("monitoring.predicted.".into());
		assert!(prefix.matches("monitoring.predicted.cpu_load"));
		assert!(!prefix.matches("monitoring.slo.severity_value"));
	}
}
