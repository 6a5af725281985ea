//! # Quarantine-Workers Dispatcher Process
//!
//! Loads configuration, starts the [`OperationRuntime`], and runs until
//! Ctrl-C. Workers connect to it on `QW_LISTEN_ADDR`.
//!
//! ## Startup
//!
//! 1. `.env` loaded, telemetry initialized
//! 2. [`RuntimeConfig`] read from the environment
//! 3. Production mode refuses to start without a real worker secret
//! 4. Runtime started, workers launched by the configured supervisor

use anyhow::{Context, Result};
use qw_03_dispatcher::FixedApplication;
use qw_runtime::{builtin_registry, OperationRuntime, RuntimeConfig, SupervisionMode};
use qw_telemetry::{init_telemetry, TelemetryConfig};
use shared_types::ApplicationId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Could not load .env: {e}");
        }
    }
    init_telemetry(&TelemetryConfig::from_env()).context("Failed to initialize telemetry")?;

    info!("===========================================");
    info!("  Quarantine-Workers Dispatcher v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");

    let config = RuntimeConfig::from_env().context("Invalid configuration")?;
    if config.supervision == SupervisionMode::Production {
        config
            .validate_for_production()
            .context("Configuration not fit for production")?;
    }

    let runtime = OperationRuntime::start(
        config,
        builtin_registry(),
        Arc::new(FixedApplication(ApplicationId(0))),
    )
    .await
    .context("Failed to start operation runtime")?;

    let mut health_tick = tokio::time::interval(HEALTH_LOG_INTERVAL);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Received shutdown signal");
                break;
            }
            _ = health_tick.tick() => {
                let report = runtime.health();
                if report.is_healthy() {
                    info!(queue = report.queue_len, "Health: OK");
                } else {
                    warn!(queue = report.queue_len, status = %report.status(), "Health check failed");
                }
            }
        }
    }

    runtime.shutdown().await;
    Ok(())
}
