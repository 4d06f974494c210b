//! In-memory message bus.
//!
//! Routes envelopes synchronously to every matching subscription of the
//! same tenant. Used by the test suites and by local runs without a
//! reachable broker; the production transport implements the same trait
//! against the platform broker.

use crate::{BrokerError, Envelope, MessageBus, SubscriptionId, TopicPattern};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

struct SubscriptionEntry {
	pattern: TopicPattern,
	mailbox: mpsc::UnboundedSender<Envelope>,
}

pub struct InMemoryBroker {
	application: String,
	subscriptions: Mutex<HashMap<SubscriptionId, SubscriptionEntry>>,
	next_id: AtomicU64,
	closed: AtomicBool,
}

impl InMemoryBroker {
	pub fn new(application: impl Into<String>) -> Self {
		Self {
			application: application.into(),
			subscriptions: Mutex::new(HashMap::new()),
			next_id: AtomicU64::new(1),
			closed: AtomicBool::new(false),
		}
	}
}

#[async_trait]
impl MessageBus for InMemoryBroker {
	async fn publish(&self, topic: &str, payload: Value) -> Result<(), BrokerError> {
		if self.closed.load(Ordering::Acquire) {
			return Err(BrokerError::Closed);
		}

		let envelope = Envelope {
			topic: topic.to_string(),
			application: self.application.clone(),
			payload,
		};

		let mut subscriptions = self.subscriptions.lock().unwrap();
		subscriptions.retain(|id, entry| {
			if !entry.pattern.matches(&envelope.topic) {
				return true;
			}
			// Consumer-side selector: application = '<tenant-id>'.
			if envelope.application != self.application {
				return true;
			}

			trace!(topic = %envelope.topic, subscription = *id, "Routing message");
			entry.mailbox.send(envelope.clone()).is_ok()
		});

		Ok(())
	}

	async fn attach(
		&self,
		pattern: TopicPattern,
		mailbox: mpsc::UnboundedSender<Envelope>,
	) -> Result<SubscriptionId, BrokerError> {
		if self.closed.load(Ordering::Acquire) {
			return Err(BrokerError::Closed);
		}

		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		self.subscriptions
			.lock()
			.unwrap()
			.insert(id, SubscriptionEntry { pattern, mailbox });
		Ok(id)
	}

	async fn detach(&self, id: SubscriptionId) -> Result<(), BrokerError> {
		self.subscriptions
			.lock()
			.unwrap()
			.remove(&id)
			.map(|_| ())
			.ok_or(BrokerError::UnknownSubscription(id))
	}

	async fn close(&self) -> Result<(), BrokerError> {
		self.closed.store(true, Ordering::Release);
		self.subscriptions.lock().unwrap().clear();
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[tokio::test]
	async fn exact_subscription_receives_matching_topic_only() {
		let broker = InMemoryBroker::new("tenant-a");
		let (tx, mut rx) = mpsc::unbounded_channel();

		broker
			.attach(TopicPattern::Exact("optimiser.solver.context".into()), tx)
			.await
			.unwrap();

		broker
			.publish("optimiser.solver.context", json!({"Timestamp": 1}))
			.await
			.unwrap();
		broker
			.publish("optimiser.solver.solution", json!({"Timestamp": 2}))
			.await
			.unwrap();

		let envelope = rx.recv().await.unwrap();
		assert_eq!(envelope.topic, "optimiser.solver.context");
		assert_eq!(envelope.application, "tenant-a");
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn prefix_subscription_spans_metric_topics() {
		let broker = InMemoryBroker::new("tenant-a");
		let (tx, mut rx) = mpsc::unbounded_channel();

		broker
			.attach(TopicPattern::Prefix("monitoring.predicted.".into()), tx)
			.await
			.unwrap();

		broker
			.publish("monitoring.predicted.cpu_load", json!({"metricValue": 0.5}))
			.await
			.unwrap();
		broker
			.publish("monitoring.predicted.active_users", json!({"metricValue": 12}))
			.await
			.unwrap();

		assert_eq!(rx.recv().await.unwrap().topic, "monitoring.predicted.cpu_load");
		assert_eq!(rx.recv().await.unwrap().topic, "monitoring.predicted.active_users");
	}

	#[tokio::test]
	async fn detached_subscription_stops_receiving() {
		let broker = InMemoryBroker::new("tenant-a");
		let (tx, mut rx) = mpsc::unbounded_channel();

		let id = broker
			.attach(TopicPattern::Exact("solver.state".into()), tx)
			.await
			.unwrap();
		broker.detach(id).await.unwrap();

		broker.publish("solver.state", json!({})).await.unwrap();
		assert!(rx.try_recv().is_err());

		assert!(matches!(
			broker.detach(id).await,
			Err(BrokerError::UnknownSubscription(_))
		));
	}

	#[tokio::test]
	async fn closed_broker_rejects_publishes() {
		let broker = InMemoryBroker::new("tenant-a");
		broker.close().await.unwrap();

		assert!(matches!(
			broker.publish("solver.state", json!({})).await,
			Err(BrokerError::Closed)
		));
	}
}
