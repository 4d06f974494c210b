//! Topic names of the platform wire protocol.
//!
//! All inbound and outbound traffic of the solver component flows over
//! these topics; consumers additionally filter on the `application`
//! property carrying the tenant id.

/// Metric declarations from the controller (versioned envelope).
pub const METRIC_LIST: &str = "optimiser.controller.metric_list";

/// Optimisation model definition, sent to every solver worker.
pub const MODEL: &str = "optimiser.controller.model";

/// Data file updates for the currently loaded model.
pub const DATA: &str = "optimiser.solver.data";

/// Externally submitted execution contexts (what-if requests).
pub const CONTEXT: &str = "optimiser.solver.context";

/// Prefix of the per-metric prediction topics; the metric name is the
/// remainder of the topic string.
pub const PREDICTION_ROOT: &str = "monitoring.predicted.";

/// Violation events from the SLO violation detector.
pub const VIOLATION: &str = "monitoring.slo.severity_value";

/// Application lifecycle state changes from the controller.
pub const APP_STATE: &str = "optimiser.controller.app_state";

/// Signal that a reconfiguration has been applied by the controller.
pub const ADAPTATIONS: &str = "optimiser.adaptations";

/// Outbound solutions.
pub const SOLUTION: &str = "optimiser.solver.solution";

/// Outbound solver status broadcasts.
pub const SOLVER_STATE: &str = "solver.state";

/// Resolves a prediction topic to the metric it carries, if it is one.
pub fn prediction_metric(topic: &str) -> Option<&str> {
	topic.strip_prefix(PREDICTION_ROOT).filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn prediction_topics_resolve_to_metric_names() {
		assert_eq!(prediction_metric("monitoring.predicted.cpu_load"), Some("cpu_load"));
		assert_eq!(prediction_metric("monitoring.predicted."), None);
		assert_eq!(prediction_metric("optimiser.solver.context"), None);
	}
}
