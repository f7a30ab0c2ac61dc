// Prometheus metrics for reservoir monitoring
//
// Every per-reservoir series carries a `reservoir` label:
// - Admissions and cancellations (counter)
// - Admission wait time (histogram)
// - Refills delivered and dropped (counter)
// - Refill schedulers spawned (counter)
// - Manager starts (counter) and running managers (gauge)

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Admission metrics
    pub static ref ADMISSIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("reservoir_admissions_total", "Total number of admitted requests"),
        &["reservoir"]
    ).expect("Failed to create admissions metric");

    pub static ref CANCELLATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("reservoir_cancellations_total", "Total number of cancelled admission requests"),
        &["reservoir"]
    ).expect("Failed to create cancellations metric");

    pub static ref ADMISSION_WAIT_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new("reservoir_admission_wait_seconds", "Time an admitted request spent waiting for a token"),
        &["reservoir"]
    ).expect("Failed to create admission wait metric");

    // Refill metrics
    pub static ref REFILLS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("reservoir_refills_total", "Total number of tokens returned by refill schedulers"),
        &["reservoir"]
    ).expect("Failed to create refills metric");

    pub static ref REFILLS_DROPPED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("reservoir_refills_dropped_total", "Refill attempts abandoned while the reservoir was below capacity"),
        &["reservoir"]
    ).expect("Failed to create refills dropped metric");

    pub static ref SCHEDULERS_SPAWNED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("reservoir_refill_schedulers_spawned_total", "Total number of refill schedulers spawned"),
        &["reservoir"]
    ).expect("Failed to create schedulers spawned metric");

    // Manager metrics
    pub static ref MANAGER_STARTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("reservoir_manager_starts_total", "Total number of manager tasks started"),
        &["reservoir"]
    ).expect("Failed to create manager starts metric");

    pub static ref MANAGERS_RUNNING: IntGaugeVec = IntGaugeVec::new(
        prometheus::Opts::new("reservoir_managers_running", "Number of reservoir manager tasks currently running"),
        &["reservoir"]
    ).expect("Failed to create managers running metric");
}

/// Initialize metrics registry - must be called once at startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(ADMISSIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CANCELLATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ADMISSION_WAIT_SECONDS.clone()))?;
    REGISTRY.register(Box::new(REFILLS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REFILLS_DROPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SCHEDULERS_SPAWNED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MANAGER_STARTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MANAGERS_RUNNING.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
