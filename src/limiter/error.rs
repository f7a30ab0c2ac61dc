//! Limiter Error Types
//!
//! Errors surfaced by the reservoir. Waiting, refilling and teardown are
//! ordinary control states and never show up here.

use std::time::Duration;

use super::cancel::CancelReason;

/// Error returned by an admission request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    /// The caller's cancellation fired before a token arrived
    #[error("Admission cancelled: {0}")]
    Cancelled(CancelReason),

    /// The manager went away without serving this caller (runtime shutdown)
    #[error("Reservoir manager stopped before a token was dispensed")]
    Closed,
}

impl LimitError {
    /// The cancellation reason, if this is a cancellation
    pub fn reason(&self) -> Option<&CancelReason> {
        match self {
            LimitError::Cancelled(reason) => Some(reason),
            LimitError::Closed => None,
        }
    }
}

/// Error returned when a reservoir is built with invalid parameters
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A reservoir must hold at least one token
    #[error("Reservoir capacity must be > 0")]
    ZeroCapacity,

    /// The refill timer needs a non-zero period
    #[error("Refill period must be > 0, got {0:?}")]
    ZeroRefillPeriod(Duration),
}
