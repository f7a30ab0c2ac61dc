//! Caller-side Cancellation
//!
//! The reservoir never times anything out on its own. A blocked caller hands
//! in a signal (any future resolving to a [`CancelReason`]) and the reservoir
//! races it against token arrival. [`Cancellation`] bundles the two common
//! sources, an explicit [`CancellationToken`] and a deadline.

use std::fmt;
use std::future;
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Why a blocked admission request gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// Explicitly cancelled by the caller
    Cancelled,
    /// The caller's deadline passed
    DeadlineExceeded,
    /// Any other caller-defined reason
    Other(String),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cancelled => f.write_str("cancelled"),
            CancelReason::DeadlineExceeded => f.write_str("deadline exceeded"),
            CancelReason::Other(reason) => f.write_str(reason),
        }
    }
}

/// Cancellation context for an admission request
///
/// An empty context never fires.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use reservoir_limiter::Cancellation;
/// use tokio_util::sync::CancellationToken;
///
/// let token = CancellationToken::new();
/// let cx = Cancellation::new()
///     .with_token(token.clone())
///     .with_timeout(Duration::from_secs(5));
/// assert!(cx.deadline().is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// Create a context that never fires
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire when `token` is cancelled
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Fire at `deadline`. An earlier deadline already set wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Fire `timeout` from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The effective deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the context has already fired
    pub fn is_cancelled(&self) -> bool {
        self.token.as_ref().is_some_and(|t| t.is_cancelled())
            || self.deadline.is_some_and(|d| d <= Instant::now())
    }

    /// Resolve once the context fires, with the reason it fired
    ///
    /// An explicit cancellation takes precedence over a deadline that
    /// expires at the same instant.
    pub async fn fired(&self) -> CancelReason {
        let cancelled = async {
            match &self.token {
                Some(token) => token.cancelled().await,
                None => future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => time::sleep_until(deadline).await,
                None => future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => CancelReason::Cancelled,
            _ = expired => CancelReason::DeadlineExceeded,
        }
    }
}
