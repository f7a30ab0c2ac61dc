//! Reservoir Statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Live counters shared by the facade, the manager and the schedulers
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) admitted: AtomicU64,
    pub(crate) cancelled: AtomicU64,
    pub(crate) stale_waiters: AtomicU64,
    pub(crate) refills: AtomicU64,
    pub(crate) refills_dropped: AtomicU64,
    pub(crate) schedulers_spawned: AtomicU64,
    pub(crate) schedulers_retired: AtomicU64,
    pub(crate) managers_started: AtomicU64,
    /// Mirror of the manager's level. Written by the manager only.
    pub(crate) level: AtomicUsize,
}

impl Counters {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            level: AtomicUsize::new(capacity),
            ..Self::default()
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn publish_level(&self, level: usize) {
        self.level.store(level, Ordering::Release);
    }

    pub(crate) fn level(&self) -> usize {
        self.level.load(Ordering::Acquire)
    }
}

/// Point-in-time view of a reservoir
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservoirStats {
    /// Configured capacity
    pub capacity: usize,
    /// Tokens currently in the reservoir (as last published by the manager)
    pub available: usize,
    /// Manager plus blocked callers
    pub participants: usize,
    /// Whether a manager task is currently running
    pub manager_running: bool,
    /// Successful admissions
    pub admitted: u64,
    /// Admission requests that were cancelled
    pub cancelled: u64,
    /// Cancelled registrations the manager discarded
    pub stale_waiters: u64,
    /// Tokens returned by refill schedulers
    pub refills: u64,
    /// Scheduler misses that happened while the reservoir was below capacity
    pub refills_dropped: u64,
    /// Refill schedulers spawned (one per dispense from a full reservoir)
    pub schedulers_spawned: u64,
    /// Refill schedulers that have stopped
    pub schedulers_retired: u64,
    /// Manager tasks started over the reservoir's lifetime
    pub managers_started: u64,
}

impl ReservoirStats {
    pub(crate) fn collect(counters: &Counters, capacity: usize, participants: usize) -> Self {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Self {
            capacity,
            available: counters.level(),
            participants,
            manager_running: participants > 0,
            admitted: load(&counters.admitted),
            cancelled: load(&counters.cancelled),
            stale_waiters: load(&counters.stale_waiters),
            refills: load(&counters.refills),
            refills_dropped: load(&counters.refills_dropped),
            schedulers_spawned: load(&counters.schedulers_spawned),
            schedulers_retired: load(&counters.schedulers_retired),
            managers_started: load(&counters.managers_started),
        }
    }

    /// Refill schedulers still ticking
    pub fn active_schedulers(&self) -> u64 {
        self.schedulers_spawned.saturating_sub(self.schedulers_retired)
    }
}
