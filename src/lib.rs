//! Reservoir Limiter Library
//!
//! A concurrency-safe admission limiter. Callers draw tokens from a reservoir
//! of fixed capacity that refills itself over time, blocking until a token is
//! available or their own cancellation fires.

pub mod config;
pub mod limiter;
pub mod metrics;


pub use limiter::{
    CancelReason, Cancellation, ConfigError, LimitError, Limiter, Reservoir, ReservoirStats,
};
