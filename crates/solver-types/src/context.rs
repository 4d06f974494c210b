use crate::TimePoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A snapshot of predicted metric values that parameterises one
/// optimisation run.
///
/// Contexts are produced by the metric cache when a violation event fires,
/// or arrive directly on the context topic for what-if evaluations used to
/// train external predictors. A context is immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
	/// Caller-provided correlation id. When absent the dispatcher
	/// synthesises one from the prediction time.
	#[serde(rename = "Identifier", default, skip_serializing_if = "Option::is_none")]
	pub identifier: Option<String>,

	/// Prediction time of the violation or request, microseconds since epoch.
	#[serde(rename = "Timestamp")]
	pub timestamp: TimePoint,

	/// Objective to maximise. Falls back to the model default when absent.
	#[serde(rename = "ObjectiveFunction", default, skip_serializing_if = "Option::is_none")]
	pub objective: Option<String>,

	/// Metric name to predicted value. Values are raw JSON scalars; the
	/// worker rejects unsupported kinds at solve time.
	#[serde(rename = "ExecutionContext")]
	pub metrics: BTreeMap<String, serde_json::Value>,

	/// True for real reconfiguration requests, false for hypothetical
	/// evaluations. Copied verbatim into the solution.
	#[serde(rename = "DeploySolution", default)]
	pub deploy: bool,
}

impl ExecutionContext {
	/// The identifier under which this context is queued: the caller's
	/// identifier if one was supplied, otherwise the prediction time.
	pub fn queue_identifier(&self) -> String {
		self.identifier
			.clone()
			.unwrap_or_else(|| self.timestamp.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn context_message_parses_with_wire_keys() {
		let payload = json!({
			"Timestamp": 1_700_000_000_000_000i64,
			"ObjectiveFunction": "MaxUtility",
			"ExecutionContext": { "cpu_load": 0.75, "active_users": 40 },
			"DeploySolution": true
		});

		let context: ExecutionContext = serde_json::from_value(payload).unwrap();
		assert_eq!(context.timestamp, 1_700_000_000_000_000);
		assert_eq!(context.objective.as_deref(), Some("MaxUtility"));
		assert_eq!(context.metrics.len(), 2);
		assert!(context.deploy);
		assert_eq!(context.queue_identifier(), "1700000000000000");
	}

	#[test]
	fn explicit_identifier_wins_over_timestamp() {
		let payload = json!({
			"Identifier": "what-if-17",
			"Timestamp": 2000,
			"ExecutionContext": { "m": 1 },
			"DeploySolution": false
		});

		let context: ExecutionContext = serde_json::from_value(payload).unwrap();
		assert_eq!(context.queue_identifier(), "what-if-17");
		assert!(!context.deploy);
		assert!(context.objective.is_none());
	}
}
