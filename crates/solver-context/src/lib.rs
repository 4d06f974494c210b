//! Metric cache: the live application execution context.
//!
//! Subscribes to the prediction topic of every metric the controller
//! declares, holds the last value of each under a zero-order hold, and
//! turns violation events into execution contexts for the dispatch
//! manager, but only while the application is running, every tracked
//! metric has a value, and no reconfiguration is already in flight.
//!
//! All handlers run on one mailbox, so a violation event can never observe
//! a half-applied metric declaration or a missing update that arrived
//! before it.

use solver_broker::{Envelope, MessageBus, SubscriptionId, TopicPattern};
use solver_dispatch::DispatchCommand;
use solver_monitoring::DropCounters;
use solver_types::{
	topics, ApplicationState, AppStateUpdate, ExecutionContext, MetricList, Prediction,
	TimePoint, ViolationEvent,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Last known prediction for one tracked metric.
#[derive(Debug)]
struct MetricRecord {
	value: Option<serde_json::Value>,
	subscription: SubscriptionId,
}

pub struct MetricCache {
	bus: Arc<dyn MessageBus>,
	/// Clone of the mailbox sender, used for the per-metric subscriptions
	/// created on declaration.
	mailbox: mpsc::UnboundedSender<Envelope>,
	dispatch: mpsc::UnboundedSender<DispatchCommand>,
	counters: Arc<DropCounters>,

	metrics: HashMap<String, MetricRecord>,
	/// Version of the accepted metric declaration; strictly increasing.
	version: Option<i64>,
	/// Largest prediction time seen over any metric; the validity time of
	/// the cached vector under the zero-order hold.
	validity_time: TimePoint,

	app_state: ApplicationState,
	reconfiguration_in_flight: bool,
	/// Set once every tracked metric has reported a value; cleared when a
	/// declaration introduces new, still-unset metrics.
	all_values_known: bool,

	/// Violation events with a probability below this are not acted upon.
	violation_threshold: f64,
}

impl MetricCache {
	pub fn new(
		bus: Arc<dyn MessageBus>,
		mailbox: mpsc::UnboundedSender<Envelope>,
		dispatch: mpsc::UnboundedSender<DispatchCommand>,
		counters: Arc<DropCounters>,
		violation_threshold: f64,
	) -> Self {
		Self {
			bus,
			mailbox,
			dispatch,
			counters,
			metrics: HashMap::new(),
			version: None,
			validity_time: 0,
			app_state: ApplicationState::New,
			reconfiguration_in_flight: false,
			all_values_known: false,
			violation_threshold,
		}
	}

	/// Processes the mailbox until shutdown.
	pub async fn run(
		mut self,
		mut mailbox: mpsc::UnboundedReceiver<Envelope>,
		mut shutdown: broadcast::Receiver<()>,
	) {
		info!("Metric cache running");

		loop {
			tokio::select! {
				Some(envelope) = mailbox.recv() => self.handle_envelope(envelope).await,
				_ = shutdown.recv() => break,
			}
		}

		info!("Metric cache stopped");
	}

	/// Routes one inbound message by its topic string.
	pub async fn handle_envelope(&mut self, envelope: Envelope) {
		let topic = envelope.topic.as_str();

		if topic == topics::METRIC_LIST {
			match serde_json::from_value::<MetricList>(envelope.payload) {
				Ok(list) => self.declare_metrics(list).await,
				Err(error) => {
					self.counters.schema_invalid();
					warn!(%error, "Malformed metric declaration dropped");
				}
			}
		} else if let Some(metric) = topics::prediction_metric(topic) {
			match serde_json::from_value::<Prediction>(envelope.payload) {
				Ok(prediction) => self.update_metric(metric, prediction),
				Err(error) => {
					self.counters.schema_invalid();
					debug!(metric, %error, "Malformed prediction dropped");
				}
			}
		} else if topic == topics::VIOLATION {
			match serde_json::from_value::<ViolationEvent>(envelope.payload) {
				Ok(event) => self.on_violation(event),
				Err(error) => {
					self.counters.schema_invalid();
					warn!(%error, "Malformed violation event dropped");
				}
			}
		} else if topic == topics::APP_STATE {
			match serde_json::from_value::<AppStateUpdate>(envelope.payload) {
				Ok(update) => self.update_lifecycle(update.state),
				Err(error) => {
					self.counters.schema_invalid();
					warn!(%error, "Malformed application state dropped");
				}
			}
		} else if topic == topics::ADAPTATIONS {
			// Payload is only a signal that the reconfiguration finished.
			self.on_reconfiguration_done();
		} else {
			debug!(topic, "Message on an unrouted topic ignored");
		}
	}

	/// Replaces the tracked metric set with a newer declaration.
	///
	/// Declarations at or below the accepted version are a no-op. Metrics
	/// retained across declarations keep their values; removed metrics are
	/// unsubscribed and forgotten.
	async fn declare_metrics(&mut self, list: MetricList) {
		if let Some(current) = self.version {
			if list.version <= current {
				debug!(
					version = list.version,
					current, "Stale metric declaration ignored"
				);
				return;
			}
		}

		let declared: Vec<String> = list
			.metrics
			.into_iter()
			.map(|descriptor| descriptor.name)
			.collect();

		// Unsubscribe and forget metrics absent from the new declaration.
		let removed: Vec<String> = self
			.metrics
			.keys()
			.filter(|name| !declared.iter().any(|kept| kept == *name))
			.cloned()
			.collect();
		for name in removed {
			if let Some(record) = self.metrics.remove(&name) {
				if let Err(error) = self.bus.detach(record.subscription).await {
					warn!(metric = %name, %error, "Unsubscribe failed");
				}
				debug!(metric = %name, "Metric dropped from declaration");
			}
		}

		// Subscribe to metrics appearing for the first time.
		for name in declared {
			if self.metrics.contains_key(&name) {
				continue;
			}

			let topic = format!("{}{}", topics::PREDICTION_ROOT, name);
			match self
				.bus
				.attach(TopicPattern::Exact(topic), self.mailbox.clone())
				.await
			{
				Ok(subscription) => {
					self.metrics
						.insert(name.clone(), MetricRecord { value: None, subscription });
					self.all_values_known = false;
					debug!(metric = %name, "Metric declared; awaiting first prediction");
				}
				Err(error) => warn!(metric = %name, %error, "Subscribe failed"),
			}
		}

		self.version = Some(list.version);
		info!(
			version = list.version,
			tracked = self.metrics.len(),
			"Metric declaration applied"
		);
	}

	/// Records the latest prediction for a tracked metric.
	fn update_metric(&mut self, name: &str, prediction: Prediction) {
		match self.metrics.get_mut(name) {
			Some(record) => {
				record.value = Some(prediction.value);
				self.validity_time = self.validity_time.max(prediction.prediction_time);
			}
			None => {
				// High-volume stream; drops are silent but counted.
				self.counters.unknown_metric();
				debug!(metric = name, "Prediction for untracked metric dropped");
			}
		}
	}

	fn update_lifecycle(&mut self, state: ApplicationState) {
		info!(from = %self.app_state, to = %state, "Application state updated");
		self.app_state = state;

		// A failed or redeployed application cannot leave the pipeline
		// waiting for an adaptation signal that will never come.
		if matches!(state, ApplicationState::Failed | ApplicationState::Ready) {
			self.reconfiguration_in_flight = false;
		}
	}

	fn on_reconfiguration_done(&mut self) {
		debug!("Reconfiguration finished; violations may act again");
		self.reconfiguration_in_flight = false;
	}

	/// Turns a violation event into an execution context, if the gate
	/// allows it.
	fn on_violation(&mut self, event: ViolationEvent) {
		if let Some(probability) = event.probability {
			if probability < self.violation_threshold {
				self.counters.violation_ignored();
				debug!(
					probability,
					threshold = self.violation_threshold,
					"Violation below threshold ignored"
				);
				return;
			}
		}

		if self.app_state != ApplicationState::Running {
			self.counters.violation_ignored();
			debug!(state = %self.app_state, "Violation while not running ignored");
			return;
		}

		if self.reconfiguration_in_flight {
			self.counters.violation_ignored();
			debug!("Violation during an in-flight reconfiguration ignored");
			return;
		}

		if !self.all_values_known {
			let complete = !self.metrics.is_empty()
				&& self.metrics.values().all(|record| record.value.is_some());
			if !complete {
				self.counters.violation_ignored();
				debug!("Violation before all metrics have values ignored");
				return;
			}
			self.all_values_known = true;
		}

		let context = ExecutionContext {
			identifier: None,
			timestamp: event.prediction_time,
			objective: event.objective,
			metrics: self
				.metrics
				.iter()
				.map(|(name, record)| {
					(
						name.clone(),
						record.value.clone().expect("gate checked all values"),
					)
				})
				.collect::<BTreeMap<_, _>>(),
			deploy: true,
		};

		info!(
			timestamp = context.timestamp,
			validity_time = self.validity_time,
			metrics = context.metrics.len(),
			"Violation accepted; requesting a new configuration"
		);

		if self.dispatch.send(DispatchCommand::Enqueue(context)).is_err() {
			warn!("Dispatch manager is gone; context dropped");
			return;
		}

		// Self-gate until the reconfiguration is reported done.
		self.reconfiguration_in_flight = true;
		self.app_state = ApplicationState::Deploying;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use solver_broker::InMemoryBroker;

	struct Fixture {
		cache: MetricCache,
		mailbox: mpsc::UnboundedReceiver<Envelope>,
		dispatch: mpsc::UnboundedReceiver<DispatchCommand>,
		bus: Arc<InMemoryBroker>,
		counters: Arc<DropCounters>,
	}

	fn fixture() -> Fixture {
		let bus = Arc::new(InMemoryBroker::new("tenant-a"));
		let counters = DropCounters::new();
		let (mailbox_tx, mailbox) = mpsc::unbounded_channel();
		let (dispatch_tx, dispatch) = mpsc::unbounded_channel();
		let cache = MetricCache::new(
			bus.clone(),
			mailbox_tx,
			dispatch_tx,
			counters.clone(),
			0.0,
		);
		Fixture { cache, mailbox, dispatch, bus, counters }
	}

	fn envelope(topic: &str, payload: serde_json::Value) -> Envelope {
		Envelope { topic: topic.to_string(), application: "tenant-a".to_string(), payload }
	}

	async fn declare(fixture: &mut Fixture, names: &[&str], version: i64) {
		let metrics: Vec<_> = names.iter().map(|name| json!({ "name": name })).collect();
		fixture
			.cache
			.handle_envelope(envelope(
				topics::METRIC_LIST,
				json!({ "metrics": metrics, "version": version }),
			))
			.await;
	}

	async fn predict(fixture: &mut Fixture, name: &str, value: serde_json::Value, time: i64) {
		let topic = format!("{}{}", topics::PREDICTION_ROOT, name);
		fixture
			.cache
			.handle_envelope(envelope(
				&topic,
				json!({ "metricValue": value, "predictionTime": time }),
			))
			.await;
	}

	async fn set_state(fixture: &mut Fixture, state: &str) {
		fixture
			.cache
			.handle_envelope(envelope(
				topics::APP_STATE,
				json!({ "when": "2026-08-02T10:00:00Z", "state": state }),
			))
			.await;
	}

	async fn violate(fixture: &mut Fixture, time: i64) {
		fixture
			.cache
			.handle_envelope(envelope(topics::VIOLATION, json!({ "predictionTime": time })))
			.await;
	}

	fn expect_context(fixture: &mut Fixture) -> ExecutionContext {
		match fixture.dispatch.try_recv().expect("a context was dispatched") {
			DispatchCommand::Enqueue(context) => context,
			other => panic!("unexpected dispatch command {:?}", other),
		}
	}

	#[tokio::test]
	async fn violation_emits_a_deploying_context_when_gated_open() {
		let mut fixture = fixture();

		declare(&mut fixture, &["m"], 1).await;
		predict(&mut fixture, "m", json!(5), 900).await;
		set_state(&mut fixture, "RUNNING").await;
		violate(&mut fixture, 1000).await;

		let context = expect_context(&mut fixture);
		assert_eq!(context.timestamp, 1000);
		assert_eq!(context.metrics["m"], json!(5));
		assert!(context.deploy);
		assert!(context.identifier.is_none());

		assert!(fixture.cache.reconfiguration_in_flight);
		assert_eq!(fixture.cache.app_state, ApplicationState::Deploying);
	}

	#[tokio::test]
	async fn violation_before_running_is_ignored() {
		let mut fixture = fixture();

		declare(&mut fixture, &["m"], 1).await;
		predict(&mut fixture, "m", json!(5), 900).await;
		violate(&mut fixture, 1000).await;

		assert!(fixture.dispatch.try_recv().is_err());
		assert_eq!(fixture.counters.violation_ignored_total(), 1);
	}

	#[tokio::test]
	async fn violation_with_unset_metrics_is_ignored() {
		let mut fixture = fixture();

		declare(&mut fixture, &["m", "n"], 1).await;
		predict(&mut fixture, "m", json!(5), 900).await;
		set_state(&mut fixture, "RUNNING").await;
		violate(&mut fixture, 1000).await;

		assert!(fixture.dispatch.try_recv().is_err());

		// Once the last value arrives the next violation passes.
		predict(&mut fixture, "n", json!(2), 950).await;
		violate(&mut fixture, 1100).await;
		let context = expect_context(&mut fixture);
		assert_eq!(context.metrics.len(), 2);
	}

	#[tokio::test]
	async fn second_violation_waits_for_the_adaptation_signal() {
		let mut fixture = fixture();

		declare(&mut fixture, &["m"], 1).await;
		predict(&mut fixture, "m", json!(5), 900).await;
		set_state(&mut fixture, "RUNNING").await;
		violate(&mut fixture, 1000).await;
		expect_context(&mut fixture);

		// Still deploying: nothing may fire.
		set_state(&mut fixture, "RUNNING").await;
		violate(&mut fixture, 1100).await;
		assert!(fixture.dispatch.try_recv().is_err());

		// The adaptation signal re-opens the gate.
		fixture
			.cache
			.handle_envelope(envelope(topics::ADAPTATIONS, json!({})))
			.await;
		violate(&mut fixture, 1200).await;
		assert_eq!(expect_context(&mut fixture).timestamp, 1200);
	}

	#[tokio::test]
	async fn failed_lifecycle_clears_the_inflight_flag() {
		let mut fixture = fixture();

		declare(&mut fixture, &["m"], 1).await;
		predict(&mut fixture, "m", json!(5), 900).await;
		set_state(&mut fixture, "RUNNING").await;
		violate(&mut fixture, 1000).await;
		expect_context(&mut fixture);

		set_state(&mut fixture, "FAILED").await;
		assert!(!fixture.cache.reconfiguration_in_flight);

		set_state(&mut fixture, "RUNNING").await;
		violate(&mut fixture, 1100).await;
		assert_eq!(expect_context(&mut fixture).timestamp, 1100);
	}

	#[tokio::test]
	async fn stale_metric_declarations_are_ignored() {
		let mut fixture = fixture();

		declare(&mut fixture, &["m"], 2).await;
		predict(&mut fixture, "m", json!(5), 900).await;

		// Same and older versions change nothing.
		declare(&mut fixture, &["other"], 2).await;
		declare(&mut fixture, &["other"], 1).await;
		assert!(fixture.cache.metrics.contains_key("m"));
		assert!(!fixture.cache.metrics.contains_key("other"));

		// A newer one replaces the set and keeps retained values.
		declare(&mut fixture, &["m", "n"], 3).await;
		assert!(fixture.cache.metrics["m"].value.is_some());
		assert!(fixture.cache.metrics["n"].value.is_none());
	}

	#[tokio::test]
	async fn removed_metrics_are_unsubscribed_and_forgotten() {
		let mut fixture = fixture();

		declare(&mut fixture, &["m", "gone"], 1).await;
		predict(&mut fixture, "gone", json!(1), 100).await;
		declare(&mut fixture, &["m"], 2).await;

		assert!(!fixture.cache.metrics.contains_key("gone"));

		// The broker no longer routes the removed metric to the mailbox.
		while fixture.mailbox.try_recv().is_ok() {}
		fixture
			.bus
			.publish(
				"monitoring.predicted.gone",
				json!({ "metricValue": 2, "predictionTime": 200 }),
			)
			.await
			.unwrap();
		assert!(fixture.mailbox.try_recv().is_err());

		// While the kept metric still is.
		fixture
			.bus
			.publish(
				"monitoring.predicted.m",
				json!({ "metricValue": 3, "predictionTime": 300 }),
			)
			.await
			.unwrap();
		assert!(fixture.mailbox.try_recv().is_ok());
	}

	#[tokio::test]
	async fn predictions_for_untracked_metrics_are_counted() {
		let mut fixture = fixture();

		predict(&mut fixture, "stray", json!(1), 100).await;
		assert_eq!(fixture.counters.unknown_metric_total(), 1);
	}

	#[tokio::test]
	async fn malformed_declarations_are_schema_invalid() {
		let mut fixture = fixture();

		fixture
			.cache
			.handle_envelope(envelope(topics::METRIC_LIST, json!({ "metrics": "m" })))
			.await;
		assert_eq!(fixture.counters.schema_invalid_total(), 1);
	}

	#[tokio::test]
	async fn validity_time_holds_the_largest_prediction_time() {
		let mut fixture = fixture();

		declare(&mut fixture, &["m", "n"], 1).await;
		predict(&mut fixture, "m", json!(1), 500).await;
		predict(&mut fixture, "n", json!(2), 300).await;
		assert_eq!(fixture.cache.validity_time, 500);

		predict(&mut fixture, "n", json!(3), 800).await;
		assert_eq!(fixture.cache.validity_time, 800);
	}

	#[tokio::test]
	async fn low_probability_violations_are_ignored() {
		let bus = Arc::new(InMemoryBroker::new("tenant-a"));
		let counters = DropCounters::new();
		let (mailbox_tx, _mailbox) = mpsc::unbounded_channel();
		let (dispatch_tx, mut dispatch) = mpsc::unbounded_channel();
		let mut cache =
			MetricCache::new(bus, mailbox_tx, dispatch_tx, counters.clone(), 0.5);

		cache
			.handle_envelope(envelope(
				topics::VIOLATION,
				json!({ "predictionTime": 1000, "probability": 0.2 }),
			))
			.await;

		assert!(dispatch.try_recv().is_err());
		assert_eq!(counters.violation_ignored_total(), 1);
	}
}
