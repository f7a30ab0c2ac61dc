//! Reservoir Manager
//!
//! The manager task is the only owner of the token level. It runs a loop
//! over three states:
//!
//! - **empty**: wait for a refill, dispense nothing; arriving waiters are
//!   held and those that gave up are discarded
//! - **full**: exit if nobody but the manager participates, otherwise hand a
//!   token to the next waiter and spawn a refill scheduler for it
//! - **partial**: race an incoming refill against the next waiter
//!
//! In every state the manager also takes back tokens from requests that were
//! dropped after the handoff. The participant mutex is only taken for the
//! exit decision in the full state and is never held across an await.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use super::handoff::{self, Token, Waiter};
use super::refill::RefillScheduler;
use super::reservoir::{Inbox, Shared};
use super::stats::Counters;
use crate::metrics;

/// What woke the manager up
enum Event {
    Refill(Result<Token, oneshot::error::RecvError>),
    Returned,
    Waiter(Waiter),
    Idle,
}

/// Keeps the running-managers gauge in step with the task, including when
/// the runtime drops it mid-flight
struct Running {
    name: Arc<str>,
}

impl Running {
    fn start(name: Arc<str>) -> Self {
        metrics::MANAGERS_RUNNING.with_label_values(&[&*name]).inc();
        Self { name }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        metrics::MANAGERS_RUNNING
            .with_label_values(&[&*self.name])
            .dec();
    }
}

pub(crate) async fn run(shared: Arc<Shared>) {
    let _running = Running::start(shared.name.clone());

    // Held for the whole lifetime of this manager. A successor started right
    // after this one decided to exit waits here until it is gone.
    let mut inbox = shared.inbox.clone().lock_owned().await;
    let Inbox { waiters, returns } = &mut *inbox;

    let capacity = shared.capacity;
    let mut level = capacity;
    let mut refill: Option<oneshot::Receiver<Token>> = None;
    // Live waiters received while the reservoir was empty
    let mut backlog: VecDeque<Waiter> = VecDeque::new();
    shared.counters.publish_level(level);
    debug!(reservoir = %shared.name, capacity, "Reservoir manager started");

    loop {
        if level == capacity {
            // A return can fill the reservoir while a listener is parked;
            // deliveries to it must now miss
            refill = None;

            let released = shared.release_if_idle(|| {
                discard_queued(&shared, &mut *waiters, &mut *returns, &mut backlog)
            });
            if released {
                break;
            }

            let event = match backlog.pop_front() {
                Some(waiter) => Event::Waiter(waiter),
                None => tokio::select! {
                    Some(waiter) = waiters.recv() => Event::Waiter(waiter),
                    Some(_) = returns.recv() => Event::Returned,
                    // A waiter left; re-check whether the manager is alone
                    _ = shared.idle.notified() => Event::Idle,
                },
            };

            match event {
                Event::Waiter(waiter) => {
                    if serve(&shared, waiter, &mut level) {
                        spawn_refill(&shared);
                    }
                }
                Event::Returned => returned(&shared, &mut level),
                Event::Refill(_) | Event::Idle => {}
            }
            continue;
        }

        if level > 0 {
            if let Some(waiter) = backlog.pop_front() {
                serve(&shared, waiter, &mut level);
                continue;
            }
        }

        // Below capacity a refill listener stays parked until it is used
        let pending = refill.get_or_insert_with(|| shared.refills.listen());

        let event = tokio::select! {
            received = pending => Event::Refill(received),
            Some(_) = returns.recv() => Event::Returned,
            Some(waiter) = waiters.recv() => Event::Waiter(waiter),
        };

        match event {
            Event::Refill(received) => {
                refill = None;
                if received.is_ok() {
                    refilled(&shared, &mut level);
                }
            }
            Event::Returned => returned(&shared, &mut level),
            // Nothing to dispense while empty: hold the waiter and keep the
            // queue drained so cancelled registrations do not pile up
            Event::Waiter(waiter) if level == 0 => hold(&shared, &mut backlog, waiter),
            Event::Waiter(waiter) => {
                serve(&shared, waiter, &mut level);
            }
            Event::Idle => {}
        }
    }

    debug!(reservoir = %shared.name, "Reservoir manager stopped, reservoir idle");
}

/// Hand one token to `waiter`. Returns whether the handoff completed.
fn serve(shared: &Shared, waiter: Waiter, level: &mut usize) -> bool {
    if !handoff::dispense(waiter) {
        Counters::bump(&shared.counters.stale_waiters);
        trace!(reservoir = %shared.name, "Discarded cancelled waiter");
        return false;
    }

    *level -= 1;
    shared.counters.publish_level(*level);
    trace!(reservoir = %shared.name, level = *level, "Dispensed token");
    true
}

/// Queue a waiter received while empty, pruning any that gave up
fn hold(shared: &Shared, backlog: &mut VecDeque<Waiter>, waiter: Waiter) {
    let before = backlog.len();
    backlog.retain(|w| !w.is_closed());
    let pruned = (before - backlog.len()) as u64;
    if pruned > 0 {
        Counters::add(&shared.counters.stale_waiters, pruned);
        trace!(reservoir = %shared.name, pruned, "Discarded cancelled waiters");
    }

    if waiter.is_closed() {
        Counters::bump(&shared.counters.stale_waiters);
        trace!(reservoir = %shared.name, "Discarded cancelled waiter");
    } else {
        backlog.push_back(waiter);
    }
}

/// Drop everything still queued. Only called while the manager is the sole
/// participant, so every queued waiter belongs to a caller that already left.
fn discard_queued(
    shared: &Shared,
    waiters: &mut mpsc::UnboundedReceiver<Waiter>,
    returns: &mut mpsc::UnboundedReceiver<Token>,
    backlog: &mut VecDeque<Waiter>,
) {
    let mut stale = backlog.len() as u64;
    backlog.clear();
    while waiters.try_recv().is_ok() {
        stale += 1;
    }
    // Returns only come from departed callers and the reservoir is full
    while returns.try_recv().is_ok() {}

    if stale > 0 {
        Counters::add(&shared.counters.stale_waiters, stale);
        trace!(reservoir = %shared.name, stale, "Discarded cancelled waiters");
    }
}

fn spawn_refill(shared: &Shared) {
    RefillScheduler::new(
        shared.refills.clone(),
        shared.counters.clone(),
        shared.capacity,
        shared.refill_period,
        shared.name.clone(),
    )
    .spawn();
}

fn refilled(shared: &Shared, level: &mut usize) {
    *level += 1;
    shared.counters.publish_level(*level);
    trace!(reservoir = %shared.name, level = *level, "Accepted refill");
}

/// Take back a token from a request dropped after the handoff
fn returned(shared: &Shared, level: &mut usize) {
    // Refills may already have topped the reservoir up in the meantime
    if *level < shared.capacity {
        *level += 1;
        shared.counters.publish_level(*level);
    }
    trace!(reservoir = %shared.name, level = *level, "Took back returned token");
}
