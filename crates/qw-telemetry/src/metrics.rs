//! Prometheus metrics.
//!
//! All metrics follow the naming convention: `qw_<component>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., operations_queued_total)
//! - **Gauge**: Value that can go up or down (e.g., queue_depth)
//! - **Histogram**: Distribution of values (e.g., operation_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};
use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // DISPATCHER METRICS
    // =========================================================================

    /// Operations accepted into the queue
    pub static ref OPERATIONS_QUEUED: IntCounter = IntCounter::new(
        "qw_dispatcher_operations_queued_total",
        "Total operations accepted into the dispatch queue"
    ).expect("metric creation failed");

    /// Terminal outcomes by kind
    pub static ref OPERATION_OUTCOMES: IntCounterVec = IntCounterVec::new(
        Opts::new("qw_dispatcher_outcomes_total", "Terminal operation outcomes"),
        &["outcome"]  // completed/failed/lost/timed_out
    ).expect("metric creation failed");

    /// Submissions refused by admission control
    pub static ref ADMISSION_REJECTIONS: IntCounter = IntCounter::new(
        "qw_dispatcher_admission_rejections_total",
        "Submissions refused because no worker became available"
    ).expect("metric creation failed");

    /// Results that arrived after the operation had timed out
    pub static ref STALE_RESULTS: IntCounter = IntCounter::new(
        "qw_dispatcher_stale_results_total",
        "Worker results discarded because the operation already timed out"
    ).expect("metric creation failed");

    /// Operations waiting for a worker
    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "qw_dispatcher_queue_depth",
        "Operations currently queued"
    ).expect("metric creation failed");

    /// Slots currently executing an operation
    pub static ref BUSY_SLOTS: IntGauge = IntGauge::new(
        "qw_dispatcher_busy_slots",
        "Worker slots currently busy"
    ).expect("metric creation failed");

    /// Assignment-to-result duration
    pub static ref OPERATION_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "qw_dispatcher_operation_duration_seconds",
            "Time from assignment to a worker until its result arrived"
        ).buckets(exponential_buckets(0.005, 2.0, 14).expect("bucket creation failed"))
    ).expect("metric creation failed");

    // =========================================================================
    // WORKER METRICS
    // =========================================================================

    /// Worker replacements by reason
    pub static ref WORKER_RESTARTS: IntCounterVec = IntCounterVec::new(
        Opts::new("qw_worker_restarts_total", "Worker replacements requested"),
        &["reason"]  // failed/recycled
    ).expect("metric creation failed");

    /// Rejected worker authentications
    pub static ref WORKER_AUTH_FAILURES: IntCounter = IntCounter::new(
        "qw_worker_auth_failures_total",
        "Worker connections rejected during authentication"
    ).expect("metric creation failed");
}

/// Registers every metric with [`REGISTRY`]. Fails on a second call.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Dispatcher
        Box::new(OPERATIONS_QUEUED.clone()),
        Box::new(OPERATION_OUTCOMES.clone()),
        Box::new(ADMISSION_REJECTIONS.clone()),
        Box::new(STALE_RESULTS.clone()),
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(BUSY_SLOTS.clone()),
        Box::new(OPERATION_DURATION.clone()),
        // Workers
        Box::new(WORKER_RESTARTS.clone()),
        Box::new(WORKER_AUTH_FAILURES.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
