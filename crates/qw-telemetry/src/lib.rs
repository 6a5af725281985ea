//! # QW Telemetry
//!
//! Logging and metrics shared by the dispatcher process and worker processes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use qw_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_telemetry(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `QW_SERVICE_NAME` | `quarantine-workers` | Service name attached to logs |
//! | `QW_LOG_LEVEL` | `info` | Log filter when `RUST_LOG` is unset |
//! | `QW_JSON_LOGS` | `false` | JSON log lines instead of the human format |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    encode_metrics, register_metrics, ADMISSION_REJECTIONS,
    BUSY_SLOTS, OPERATIONS_QUEUED, OPERATION_DURATION, OPERATION_OUTCOMES, QUEUE_DEPTH,
    STALE_RESULTS, WORKER_AUTH_FAILURES, WORKER_RESTARTS,
};

use thiserror::Error;

/// Telemetry initialization errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Installs the log subscriber and registers every metric.
///
/// Registration failures for metrics already registered (a second call in the
/// same process) are ignored.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    init_logging(config)?;
    if let Err(e) = register_metrics() {
        tracing::debug!(error = %e, "Metrics already registered");
    }
    Ok(())
}
