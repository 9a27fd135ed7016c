//! Error type shared by the construction APIs.
//!
//! Running tasks never fail from the scheduler's point of view: a task only
//! exits with a status code. Errors are limited to building simulations,
//! channels and tasks, and to trace sink I/O.

use crate::task::TaskId;

/// Errors surfaced by simulation construction and configuration.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// The channel cycle time is shorter than its per-hop latency.
    #[error("invalid channel timing: cycle {cycle} is shorter than latency {latency}")]
    InvalidTiming { latency: u64, cycle: u64 },

    /// Storage for a task or channel could not be reserved.
    #[error("failed to allocate {what}")]
    Allocation {
        what: &'static str,
        #[source]
        source: std::collections::TryReserveError,
    },

    /// The task id does not name a live task of this simulation.
    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    /// A configuration value was rejected.
    #[error("configuration error: {0}")]
    Config(String),

    /// A trace sink failed to write.
    #[error("trace output failed")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T, E = SimError> = std::result::Result<T, E>;
