//! Reservoir Facade
//!
//! [`Reservoir`] is the public entry point. It keeps the participant count,
//! lazily starts the manager task on the first admission request after an
//! idle period, and races each request against the caller's cancellation.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::cancel::{CancelReason, Cancellation};
use super::error::{ConfigError, LimitError};
use super::handoff::{RefillSlot, Token, Waiter};
use super::manager;
use super::stats::{Counters, ReservoirStats};
use crate::config::ReservoirConfig;
use crate::metrics;

/// Name used for reservoirs built without one
pub const DEFAULT_RESERVOIR_NAME: &str = "default";

/// Manager lifecycle bookkeeping
#[derive(Debug, Default)]
struct Participants {
    /// The running manager (if any) plus every blocked caller
    count: usize,
    /// Handle of the most recently started manager
    manager: Option<JoinHandle<()>>,
}

/// Receiving ends read by the manager, handed from one manager to the next
#[derive(Debug)]
pub(crate) struct Inbox {
    /// Blocked callers waiting for a token
    pub(crate) waiters: mpsc::UnboundedReceiver<Waiter>,
    /// Tokens handed back by requests dropped after the handoff
    pub(crate) returns: mpsc::UnboundedReceiver<Token>,
}

/// State shared between the facade, the manager and the schedulers
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) name: Arc<str>,
    pub(crate) capacity: usize,
    pub(crate) refill_period: Duration,
    participants: Mutex<Participants>,
    /// Wakes a full manager when the participant count drops to 1
    pub(crate) idle: Notify,
    pub(crate) refills: Arc<RefillSlot>,
    waiters_tx: mpsc::UnboundedSender<Waiter>,
    returns_tx: mpsc::UnboundedSender<Token>,
    pub(crate) inbox: Arc<AsyncMutex<Inbox>>,
    pub(crate) counters: Arc<Counters>,
}

impl Shared {
    fn lock_participants(&self) -> MutexGuard<'_, Participants> {
        self.participants.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by a full manager. Returns `true` when the manager is the only
    /// participant left, in which case the count is reset and it must exit.
    ///
    /// `on_release` runs under the lock before the count is reset, so no new
    /// caller can register in between.
    pub(crate) fn release_if_idle(&self, on_release: impl FnOnce()) -> bool {
        let mut participants = self.lock_participants();
        if participants.count == 1 {
            on_release();
            participants.count = 0;
            true
        } else {
            false
        }
    }

    fn record(&self, outcome: &Result<(), LimitError>, started: Instant) {
        let name = &*self.name;
        let waited = started.elapsed();
        match outcome {
            Ok(()) => {
                Counters::bump(&self.counters.admitted);
                metrics::ADMISSIONS_TOTAL.with_label_values(&[name]).inc();
                metrics::ADMISSION_WAIT_SECONDS
                    .with_label_values(&[name])
                    .observe(waited.as_secs_f64());
            }
            Err(e) => {
                Counters::bump(&self.counters.cancelled);
                metrics::CANCELLATIONS_TOTAL.with_label_values(&[name]).inc();
                debug!(
                    reservoir = %name,
                    waited_ms = waited.as_millis() as u64,
                    error = %e,
                    "Admission request gave up"
                );
            }
        }
    }

    /// A request future dropped before it settled counts as cancelled
    fn record_dropped(&self, started: Instant) {
        Counters::bump(&self.counters.cancelled);
        metrics::CANCELLATIONS_TOTAL
            .with_label_values(&[&*self.name])
            .inc();
        debug!(
            reservoir = %self.name,
            waited_ms = started.elapsed().as_millis() as u64,
            "Admission request dropped"
        );
    }

    fn leave(&self) {
        let mut participants = self.lock_participants();
        participants.count = participants.count.saturating_sub(1);
        if participants.count == 1 {
            self.idle.notify_one();
        }
    }
}

/// An admission request in flight
///
/// Leaves the participant count when it goes away. A request dropped before
/// settling closes its handoff and returns any token that already reached
/// it, so dropping never loses a token.
struct Request<'a> {
    shared: &'a Shared,
    token: oneshot::Receiver<Token>,
    started: Instant,
    settled: bool,
}

impl Drop for Request<'_> {
    fn drop(&mut self) {
        if self.settled {
            self.shared.leave();
            return;
        }

        self.token.close();
        if let Ok(token) = self.token.try_recv() {
            // Sent before leaving, so the manager is still running to take it
            let _ = self.shared.returns_tx.send(token);
            trace!(reservoir = %self.shared.name, "Returned token from dropped request");
        }
        self.shared.leave();
        self.shared.record_dropped(self.started);
    }
}

/// A token reservoir bounding how many callers are admitted
///
/// The reservoir starts full. Every admission consumes one token; a token
/// taken from a full reservoir schedules its own refill one period later.
/// Handles are cheap to clone and share the same reservoir.
///
/// Must be used from within a Tokio runtime.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use reservoir_limiter::Reservoir;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let reservoir = Reservoir::new(3, Duration::from_millis(100))?;
///     reservoir.limit_timeout(Duration::from_secs(1)).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Reservoir {
    shared: Arc<Shared>,
}

impl Reservoir {
    /// Create a reservoir holding `capacity` tokens, refilled one token per
    /// `refill_period` for each token taken
    pub fn new(capacity: usize, refill_period: Duration) -> Result<Self, ConfigError> {
        Self::named(DEFAULT_RESERVOIR_NAME, capacity, refill_period)
    }

    /// Create a named reservoir. The name labels logs and metrics.
    pub fn named(
        name: impl Into<String>,
        capacity: usize,
        refill_period: Duration,
    ) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if refill_period.is_zero() {
            return Err(ConfigError::ZeroRefillPeriod(refill_period));
        }

        let (waiters_tx, waiters) = mpsc::unbounded_channel();
        let (returns_tx, returns) = mpsc::unbounded_channel();
        let name: String = name.into();
        Ok(Self {
            shared: Arc::new(Shared {
                name: Arc::from(name),
                capacity,
                refill_period,
                participants: Mutex::new(Participants::default()),
                idle: Notify::new(),
                refills: Arc::new(RefillSlot::new()),
                waiters_tx,
                returns_tx,
                inbox: Arc::new(AsyncMutex::new(Inbox { waiters, returns })),
                counters: Arc::new(Counters::new(capacity)),
            }),
        })
    }

    /// Create a reservoir from configuration
    pub fn from_config(config: &ReservoirConfig) -> Result<Self, ConfigError> {
        Self::named(config.name.clone(), config.capacity, config.refill_period())
    }

    /// Reservoir name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Maximum number of tokens
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Delay between refill attempts
    pub fn refill_period(&self) -> Duration {
        self.shared.refill_period
    }

    /// Tokens currently in the reservoir, as last published by the manager
    pub fn available(&self) -> usize {
        self.shared.counters.level()
    }

    /// The manager (if running) plus every caller currently blocked
    pub fn participants(&self) -> usize {
        self.shared.lock_participants().count
    }

    /// Whether a manager task currently owns the reservoir
    pub fn is_active(&self) -> bool {
        self.participants() > 0
    }

    /// Snapshot of the reservoir's counters
    pub fn stats(&self) -> ReservoirStats {
        ReservoirStats::collect(&self.shared.counters, self.shared.capacity, self.participants())
    }

    /// Block until a token is dispensed or `signal` resolves
    ///
    /// `signal` is the caller's cancellation source; its output becomes the
    /// reason carried by [`LimitError::Cancelled`]. A cancelled request never
    /// consumes a token. Dropping the returned future is equivalent to
    /// cancelling it.
    pub async fn limit<S>(&self, signal: S) -> Result<(), LimitError>
    where
        S: Future<Output = CancelReason>,
    {
        let mut request = self.enter();

        let fired = tokio::select! {
            received = &mut request.token => Ok(received),
            reason = signal => Err(reason),
        };
        let outcome = match fired {
            Ok(received) => received.map(|_| ()).map_err(|_| LimitError::Closed),
            Err(reason) => {
                request.token.close();
                // A token handed over in the same instant still counts
                match request.token.try_recv() {
                    Ok(_) => Ok(()),
                    Err(_) => Err(LimitError::Cancelled(reason)),
                }
            }
        };

        let started = request.started;
        request.settled = true;
        drop(request);

        self.shared.record(&outcome, started);
        outcome
    }

    /// Block until admitted or `cx` fires
    pub async fn limit_with(&self, cx: &Cancellation) -> Result<(), LimitError> {
        self.limit(cx.fired()).await
    }

    /// Block until admitted or `token` is cancelled
    pub async fn limit_with_token(&self, token: &CancellationToken) -> Result<(), LimitError> {
        self.limit(async {
            token.cancelled().await;
            CancelReason::Cancelled
        })
        .await
    }

    /// Block until admitted or `deadline` passes
    pub async fn limit_until(&self, deadline: Instant) -> Result<(), LimitError> {
        self.limit(async move {
            tokio::time::sleep_until(deadline).await;
            CancelReason::DeadlineExceeded
        })
        .await
    }

    /// Block until admitted or `timeout` elapses
    pub async fn limit_timeout(&self, timeout: Duration) -> Result<(), LimitError> {
        self.limit_until(Instant::now() + timeout).await
    }

    /// Wait for the current manager task, if any, to exit
    ///
    /// The manager exits once the reservoir is full and no caller is
    /// blocked, so this resolves only after outstanding refills complete.
    pub async fn join_manager(&self) {
        let handle = self.shared.lock_participants().manager.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(
                    reservoir = %self.shared.name,
                    error = %e,
                    "Reservoir manager ended abnormally"
                );
            }
        }
    }

    /// Join the participants and register a waiter with the manager
    fn enter(&self) -> Request<'_> {
        let started = Instant::now();
        let mut participants = self.shared.lock_participants();
        if participants.count == 0 {
            // One for the manager, one for this caller
            participants.count = 2;
            participants.manager = Some(tokio::spawn(manager::run(self.shared.clone())));

            Counters::bump(&self.shared.counters.managers_started);
            metrics::MANAGER_STARTS_TOTAL
                .with_label_values(&[&*self.shared.name])
                .inc();
            debug!(reservoir = %self.shared.name, "Starting reservoir manager");
        } else {
            participants.count += 1;
        }
        drop(participants);

        let (waiter, token) = oneshot::channel();
        // The inbox lives in `shared`, so the send cannot fail
        let _ = self.shared.waiters_tx.send(waiter);

        Request {
            shared: &self.shared,
            token,
            started,
            settled: false,
        }
    }
}
