use thiserror::Error;

use crate::endpoints::EndpointId;

pub type Result<T, E = PmError> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Eq, Error)]
pub enum PmError {
    /// The non-blocking path could not take the gate lock (or a transition is in flight).
    #[error("active clients gate is busy")]
    Busy,

    /// The non-blocking path refuses to power the block up; use the blocking path or defer.
    #[error("hardware is not powered (active clients count is 0)")]
    NotPowered,

    #[error("invalid voltage level {0}")]
    InvalidVoltage(u32),

    #[error("endpoint {0} is in polling state")]
    EndpointPolling(EndpointId),

    #[error("endpoint {0} is out of range")]
    InvalidEndpoint(EndpointId),

    #[error("failed to enable clocks during initialization: {0}")]
    ClockInit(#[source] HwError),

    #[error("failed to start work queue {name}: {reason}")]
    WorkQueueSpawn { name: &'static str, reason: String },
}

/// Failure reported by a hardware collaborator (clock, bus, pipe, transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HwError {
    #[error("{op} failed with status {status}")]
    Status { op: &'static str, status: i32 },

    #[error("{0} is not available")]
    Unavailable(&'static str),
}
