//! Reservoir Admission Limiting
//!
//! This module bounds how many callers may proceed by handing out tokens from
//! a reservoir of fixed capacity that refills itself over time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  enter/leave   ┌──────────────────────┐
//! │  Reservoir   │───────────────▶│ participant count    │
//! │  (facade)    │                │ (mutex)              │
//! └──────┬───────┘                └──────────┬───────────┘
//!        │ waiter ▲ token                    │ start / exit
//!        ▼        │                          ▼
//! ┌──────────────────────────────────────────────────────┐
//! │ Manager task: owns `level`, empty / partial / full    │
//! └──────────────────────────────────────────────────────┘
//!        ▲ refill (non-blocking)           │ spawn per dispense from full
//!        │                                 ▼
//! ┌──────────────────────────────────────────────────────┐
//! │ Refill schedulers: tick every refill period           │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! The manager only runs while someone relies on it. Once the reservoir is
//! full and no caller is blocked it exits; the next request starts a fresh
//! one at full capacity.

use async_trait::async_trait;

pub mod cancel;
pub mod error;
mod handoff;
mod manager;
mod refill;
pub mod reservoir;
pub mod stats;

#[cfg(test)]
mod proptests;

pub use cancel::{CancelReason, Cancellation};
pub use error::{ConfigError, LimitError};
pub use reservoir::Reservoir;
pub use stats::ReservoirStats;

/// Admission control
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Block until admitted or `cx` fires
    async fn limit(&self, cx: &Cancellation) -> Result<(), LimitError>;
}

#[async_trait]
impl Limiter for Reservoir {
    async fn limit(&self, cx: &Cancellation) -> Result<(), LimitError> {
        self.limit_with(cx).await
    }
}
