//! Inbound and outbound message payloads.
//!
//! Field names are bound to the exact JSON keys used on the wire; unknown
//! fields are ignored because the monitoring streams carry additional
//! bookkeeping attributes this component does not consume.

use crate::{ApplicationState, SolverState, TimePoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A model definition received on the model topic.
///
/// Carries the model file, the mandatory default objective, an optional
/// data file, and an optional map of constants mirroring deployed
/// variable values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemDefinition {
	#[serde(rename = "FileName")]
	pub file_name: String,

	#[serde(rename = "FileContent")]
	pub file_content: String,

	/// Default objective to optimise when a context names none. The field
	/// is optional on the wire but its absence makes the model invalid.
	#[serde(rename = "ObjectiveFunction", default, skip_serializing_if = "Option::is_none")]
	pub default_objective: Option<String>,

	/// Constant name to (variable, initial value). After every deploying
	/// solve the variable's optimum is written back into the constant.
	#[serde(rename = "Constants", default, skip_serializing_if = "BTreeMap::is_empty")]
	pub constants: BTreeMap<String, ConstantDefinition>,

	#[serde(rename = "DataFileName", default, skip_serializing_if = "Option::is_none")]
	pub data_file_name: Option<String>,

	#[serde(rename = "DataFileContent", default, skip_serializing_if = "Option::is_none")]
	pub data_file_content: Option<String>,
}

/// One constant entry of a [`ProblemDefinition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantDefinition {
	/// The variable whose deployed value this constant tracks.
	#[serde(rename = "Variable")]
	pub variable: String,

	/// Initial value of the constant before the first deployment.
	#[serde(rename = "Value")]
	pub value: serde_json::Value,
}

/// A data file replacing parameter values of the loaded model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFile {
	#[serde(rename = "FileName")]
	pub file_name: String,

	#[serde(rename = "FileContent")]
	pub file_content: String,
}

/// The versioned metric declaration from the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricList {
	pub metrics: Vec<MetricDescriptor>,
	pub version: i64,
}

/// One declared metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDescriptor {
	pub name: String,
}

/// A predicted metric value published on a per-metric topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
	#[serde(rename = "metricValue")]
	pub value: serde_json::Value,

	#[serde(rename = "predictionTime")]
	pub prediction_time: TimePoint,
}

/// A violation event from the SLO violation detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationEvent {
	#[serde(rename = "predictionTime")]
	pub prediction_time: TimePoint,

	/// Probability that at least one SLO is breached at the predicted
	/// time. Compared against a configurable threshold; absent means
	/// certain enough.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub probability: Option<f64>,

	#[serde(rename = "ObjectiveFunction", default, skip_serializing_if = "Option::is_none")]
	pub objective: Option<String>,
}

/// Application lifecycle transition from the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppStateUpdate {
	pub when: DateTime<Utc>,
	pub state: ApplicationState,
}

/// Solver status broadcast on the status topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
	pub when: DateTime<Utc>,
	pub state: SolverState,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

impl StatusUpdate {
	/// A status update stamped with the current wall-clock time.
	pub fn now(state: SolverState) -> Self {
		Self { when: Utc::now(), state, message: None }
	}

	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(message.into());
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn model_message_parses_constants_and_data() {
		let payload = json!({
			"FileName": "model.mod",
			"FileContent": "var x integer >= 0 <= 10;",
			"ObjectiveFunction": "MaxUtility",
			"Constants": {
				"cur_x": { "Variable": "x", "Value": 0 }
			},
			"DataFileName": "model.dat",
			"DataFileContent": "param m := 5;"
		});

		let problem: ProblemDefinition = serde_json::from_value(payload).unwrap();
		assert_eq!(problem.default_objective.as_deref(), Some("MaxUtility"));
		assert_eq!(problem.constants["cur_x"].variable, "x");
		assert_eq!(problem.data_file_name.as_deref(), Some("model.dat"));
	}

	#[test]
	fn model_message_tolerates_missing_optional_sections() {
		let payload = json!({ "FileName": "m.mod", "FileContent": "" });
		let problem: ProblemDefinition = serde_json::from_value(payload).unwrap();
		assert!(problem.default_objective.is_none());
		assert!(problem.constants.is_empty());
	}

	#[test]
	fn prediction_ignores_extra_monitoring_fields() {
		let payload = json!({
			"metricValue": 0.93,
			"predictionTime": 1_700_000_000i64,
			"probability": 0.88,
			"confidence_interval": [0.8, 1.0]
		});

		let prediction: Prediction = serde_json::from_value(payload).unwrap();
		assert_eq!(prediction.prediction_time, 1_700_000_000);
	}

	#[test]
	fn metric_list_requires_versioned_envelope() {
		let payload = json!({ "metrics": [ { "name": "cpu_load" } ], "version": 3 });
		let list: MetricList = serde_json::from_value(payload).unwrap();
		assert_eq!(list.version, 3);
		assert_eq!(list.metrics[0].name, "cpu_load");

		let malformed = json!({ "metrics": "cpu_load" });
		assert!(serde_json::from_value::<MetricList>(malformed).is_err());
	}
}
