//! Telemetry configuration from environment variables.

use std::env;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to every log line.
    pub service_name: String,

    /// Log level filter used when `RUST_LOG` is unset.
    pub log_level: String,

    /// JSON log lines (containers) instead of the human format.
    pub json_logs: bool,

    /// Include thread ids in log lines.
    pub thread_ids: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "quarantine-workers".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            thread_ids: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// - `QW_SERVICE_NAME`: Service name (default: quarantine-workers)
    /// - `QW_LOG_LEVEL`: Log level (default: info)
    /// - `QW_JSON_LOGS`: Enable JSON logs (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: env::var("QW_SERVICE_NAME").unwrap_or(defaults.service_name),
            log_level: env::var("QW_LOG_LEVEL").unwrap_or(defaults.log_level),
            json_logs: env::var("QW_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.json_logs),
            thread_ids: defaults.thread_ids,
        }
    }

    /// Same configuration with a different service name (e.g. `qw-worker-3`).
    #[must_use]
    pub fn for_service(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}
