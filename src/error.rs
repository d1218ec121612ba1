//! Core error kinds shared across every subsystem.
//!
//! Mirrors the propagation policy in spec §7: contended mutations return a
//! typed result rather than throwing, and each variant carries a short,
//! stable reason string suitable for logs.

use thiserror::Error;

/// Error kinds produced by the orchestration fabric.
///
/// Every public operation that can be rejected under contention or bad input
/// returns `Result<_, FleetError>` instead of panicking. Panics are reserved
/// for programmer errors (mutating an entity that was never created).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FleetError {
    /// Bad input: wrong trust-vector length, unknown tier, non-member voter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Referenced agent/task/session does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate vote, double assignment, or other state clash.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Precondition for the operation isn't met (no eligible agents, tier
    /// mismatch, circuit broken).
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Recoverable, caller may retry (backend disconnected, stale claim
    /// recovered).
    #[error("transient: {0}")]
    Transient(String),

    /// Programmer error: signature invalid, mutate a terminal session/task.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl FleetError {
    /// The short reason string carried by this error, for logs and events.
    pub fn reason(&self) -> &str {
        match self {
            Self::InvalidArgument(s)
            | Self::NotFound(s)
            | Self::Conflict(s)
            | Self::PreconditionFailed(s)
            | Self::Transient(s)
            | Self::Fatal(s) => s,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type FleetResult<T> = Result<T, FleetError>;
