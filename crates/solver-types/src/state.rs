use serde::{Deserialize, Serialize};

/// Lifecycle state of the managed application as reported by the
/// controller.
///
/// Violation events only lead to a reconfiguration while the application
/// is `Running`; the metric cache self-gates to `Deploying` after emitting
/// a context so that concurrent violations cannot race a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApplicationState {
	New,
	Ready,
	Deploying,
	Running,
	Failed,
}

impl std::fmt::Display for ApplicationState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::New => write!(f, "NEW"),
			Self::Ready => write!(f, "READY"),
			Self::Deploying => write!(f, "DEPLOYING"),
			Self::Running => write!(f, "RUNNING"),
			Self::Failed => write!(f, "FAILED"),
		}
	}
}

/// Operational state of this solver component, broadcast on the status
/// topic at startup and shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverState {
	Starting,
	Started,
	Stopping,
	Stopped,
}

impl std::fmt::Display for SolverState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Starting => write!(f, "starting"),
			Self::Started => write!(f, "started"),
			Self::Stopping => write!(f, "stopping"),
			Self::Stopped => write!(f, "stopped"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn application_state_uses_uppercase_wire_form() {
		let state: ApplicationState = serde_json::from_str("\"RUNNING\"").unwrap();
		assert_eq!(state, ApplicationState::Running);
		assert_eq!(serde_json::to_string(&ApplicationState::Failed).unwrap(), "\"FAILED\"");
	}

	#[test]
	fn solver_state_uses_lowercase_wire_form() {
		assert_eq!(serde_json::to_string(&SolverState::Starting).unwrap(), "\"starting\"");
		let state: SolverState = serde_json::from_str("\"stopped\"").unwrap();
		assert_eq!(state, SolverState::Stopped);
	}
}
