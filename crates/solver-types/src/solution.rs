use crate::TimePoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The outcome of one solver run: a feasible, utility-maximising
/// assignment of the application variables.
///
/// The objective map carries the value of every objective defined in the
/// model, not only the one that was optimised, so that subscribers can
/// inspect the whole trade-off surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
	/// Prediction time of the originating context, echoed for correlation.
	#[serde(rename = "Timestamp")]
	pub timestamp: TimePoint,

	/// Name of the objective that was optimised.
	#[serde(rename = "ObjectiveFunction")]
	pub objective: String,

	/// Value of every objective defined in the model at the optimum.
	#[serde(rename = "ObjectiveValues")]
	pub objective_values: BTreeMap<String, f64>,

	/// The optimal assignment of every problem variable.
	#[serde(rename = "VariableValues")]
	pub variable_values: BTreeMap<String, f64>,

	/// Deploy flag copied verbatim from the context.
	#[serde(rename = "DeploySolution")]
	pub deploy: bool,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn solution_serialises_with_wire_keys() {
		let solution = Solution {
			timestamp: 1000,
			objective: "MaxUtility".into(),
			objective_values: BTreeMap::from([("MaxUtility".into(), 12.0)]),
			variable_values: BTreeMap::from([("replicas".into(), 3.0)]),
			deploy: true,
		};

		let wire = serde_json::to_value(&solution).unwrap();
		assert_eq!(wire["Timestamp"], 1000);
		assert_eq!(wire["ObjectiveFunction"], "MaxUtility");
		assert_eq!(wire["ObjectiveValues"]["MaxUtility"], 12.0);
		assert_eq!(wire["VariableValues"]["replicas"], 3.0);
		assert_eq!(wire["DeploySolution"], true);
	}
}
