//! Shared types for the optimiser solver component.
//!
//! This crate defines the domain model exchanged between the pipeline
//! components (execution contexts, solutions, metric scalars, lifecycle
//! states) together with the serde bindings for every message that crosses
//! the broker, using the exact JSON keys of the platform wire protocol.

pub mod context;
pub mod messages;
pub mod scalar;
pub mod solution;
pub mod state;
pub mod topics;

pub use context::*;
pub use messages::*;
pub use scalar::*;
pub use solution::*;
pub use state::*;

/// Prediction time in microseconds since the Unix epoch.
///
/// Used both as the ordering key of the dispatch queue and as the
/// correlation id between a violation event and the solution produced
/// for it.
pub type TimePoint = i64;
