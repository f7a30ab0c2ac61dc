//! Refill Scheduler
//!
//! One scheduler is spawned for every token the manager hands out while the
//! reservoir is full. It ticks every refill period and tries to return one
//! token per tick. The first miss retires it for good.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::trace;

use super::handoff::RefillSlot;
use super::stats::Counters;
use crate::metrics;

/// Why a scheduler stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retired {
    /// No listener and the reservoir was full
    Full,
    /// No listener although the reservoir was below capacity
    Dropped,
}

pub(crate) struct RefillScheduler {
    slot: Arc<RefillSlot>,
    counters: Arc<Counters>,
    capacity: usize,
    period: Duration,
    reservoir: Arc<str>,
}

impl RefillScheduler {
    pub(crate) fn new(
        slot: Arc<RefillSlot>,
        counters: Arc<Counters>,
        capacity: usize,
        period: Duration,
        reservoir: Arc<str>,
    ) -> Self {
        Self {
            slot,
            counters,
            capacity,
            period,
            reservoir,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<Retired> {
        Counters::bump(&self.counters.schedulers_spawned);
        metrics::SCHEDULERS_SPAWNED_TOTAL
            .with_label_values(&[&*self.reservoir])
            .inc();
        tokio::spawn(self.run())
    }

    async fn run(self) -> Retired {
        let mut ticker = time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut delivered = 0u64;
        loop {
            ticker.tick().await;

            if self.slot.try_deliver() {
                delivered += 1;
                Counters::bump(&self.counters.refills);
                metrics::REFILLS_TOTAL
                    .with_label_values(&[&*self.reservoir])
                    .inc();
                trace!(reservoir = %self.reservoir, delivered, "Refilled one token");
                continue;
            }

            let retired = if self.counters.level() < self.capacity {
                Counters::bump(&self.counters.refills_dropped);
                metrics::REFILLS_DROPPED_TOTAL
                    .with_label_values(&[&*self.reservoir])
                    .inc();
                Retired::Dropped
            } else {
                Retired::Full
            };
            Counters::bump(&self.counters.schedulers_retired);
            trace!(
                reservoir = %self.reservoir,
                delivered,
                reason = ?retired,
                "Refill scheduler stopped"
            );
            return retired;
        }
    }
}
