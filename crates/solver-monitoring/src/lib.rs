//! Tracing initialisation and operational counters.
//!
//! The inbound streams are high-volume and noisy, and several paths drop
//! malformed or unactionable messages silently by design. Every such drop
//! site increments a named counter here so that the drops stay observable
//! without a negative acknowledgement on the wire.

pub mod counters;

pub use counters::DropCounters;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialises the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level so operators can raise
/// verbosity without touching the config file.
pub fn init_tracing(log_level: &str) {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();
}
