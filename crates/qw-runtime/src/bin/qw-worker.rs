//! # Quarantine-Workers Worker Process
//!
//! `qw-worker <worker-number>`
//!
//! Started by the supervisor. Connects to the dispatcher on `QW_LISTEN_ADDR`,
//! authenticates with `QW_WORKER_TOKEN` (or a token derived from
//! `QW_WORKER_SECRET`), and performs operations until it recycles or the
//! dispatcher goes away.
//!
//! ## Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Recycled or dispatcher closed the connection |
//! | 1 | Any other error |
//! | 2 | Authentication rejected |

use anyhow::{anyhow, bail, Context, Result};
use qw_04_dispatch_server::{
    default_listen_addr, ProcessMemoryProbe, RecyclePolicy, TcpConnector, WorkerConfig,
    WorkerProcess,
};
use qw_runtime::builtin_registry;
use qw_telemetry::{init_logging, TelemetryConfig};
use shared_types::{SlotNumber, WorkerTokenIssuer};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

fn worker_number() -> Result<SlotNumber> {
    let arg = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("usage: qw-worker <worker-number>"))?;
    arg.parse()
        .with_context(|| format!("Invalid worker number {arg:?}"))
}

fn worker_token(number: SlotNumber) -> Result<String> {
    if let Ok(token) = std::env::var("QW_WORKER_TOKEN") {
        return Ok(token);
    }
    match std::env::var("QW_WORKER_SECRET") {
        Ok(secret) => {
            let issuer = WorkerTokenIssuer::from_hex(&secret).context("Invalid QW_WORKER_SECRET")?;
            Ok(issuer.issue(number)?)
        }
        Err(_) => bail!("Neither QW_WORKER_TOKEN nor QW_WORKER_SECRET is set"),
    }
}

fn server_addr() -> Result<SocketAddr> {
    match std::env::var("QW_LISTEN_ADDR") {
        Ok(addr) => addr
            .parse()
            .with_context(|| format!("Invalid QW_LISTEN_ADDR {addr:?}")),
        Err(_) => Ok(default_listen_addr()),
    }
}

async fn run() -> Result<i32> {
    let number = worker_number()?;
    let telemetry = TelemetryConfig::from_env().for_service(format!("qw-worker-{number}"));
    init_logging(&telemetry).context("Failed to initialize logging")?;

    let config = WorkerConfig::new(number, worker_token(number)?).with_recycle(RecyclePolicy::default());
    let connector = TcpConnector::new(server_addr()?);
    let mut worker = WorkerProcess::new(
        config,
        Arc::new(builtin_registry()),
        Arc::new(connector),
        Arc::new(ProcessMemoryProbe),
    );

    match worker.run().await {
        Ok(exit) => {
            info!(worker = number, ?exit, performed = worker.operations_performed(), "[worker-{number}] Exiting");
            Ok(exit.exit_code())
        }
        Err(e) => {
            error!(worker = number, error = %e, "[worker-{number}] Stopped");
            Ok(e.exit_code())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    match run().await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("qw-worker: {e:#}");
            ExitCode::from(1)
        }
    }
}
