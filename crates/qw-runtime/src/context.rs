//! # Operation Runtime
//!
//! The one context object a host process holds. It owns every component and
//! defines the order they start and stop in:
//!
//! ```text
//! start:    limits ─► dispatcher ─► server (bind + serve) ─► timeout monitor ─► supervisor
//! shutdown: stop accepting ─► drain queue ─► stop workers ─► close permits ─► join tasks
//! ```
//!
//! Only one runtime may exist per process at a time. A second
//! [`OperationRuntime::start`] fails with [`RuntimeError::AlreadyStarted`]
//! until the first runtime is dropped.

use crate::config::{ConfigError, RuntimeConfig, SupervisionMode};
use parking_lot::Mutex;
use qw_01_admission::{AdmissionController, ConcurrencyLimits};
use qw_02_notify::InFlightRegistry;
use qw_03_dispatcher::{
    DefaultQueuer, DispatchError, DispatchStatsSnapshot, Dispatcher, HostContext, WorkerSupervisor,
};
use qw_04_dispatch_server::{DispatchServer, ServerError, TcpConnector};
use qw_05_supervisor::{ExternalProcessSupervisor, InProcessSupervisor, SupervisorctlManager};
use qw_telemetry::TelemetryError;
use shared_types::{OperationRegistry, SlotNumber, WorkerTokenIssuer};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

static RUNTIME_STARTED: AtomicBool = AtomicBool::new(false);

/// Held by the live runtime; releases the process-wide flag on drop.
#[derive(Debug)]
struct StartedFlag;

impl StartedFlag {
    fn claim() -> Result<Self, RuntimeError> {
        if RUNTIME_STARTED.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyStarted);
        }
        Ok(Self)
    }
}

impl Drop for StartedFlag {
    fn drop(&mut self) {
        RUNTIME_STARTED.store(false, Ordering::SeqCst);
    }
}

/// Runtime startup errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("An operation runtime is already running in this process")]
    AlreadyStarted,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// Health name prefix for a slot stuck in FAILED.
pub const WORKER_FAILED_PREFIX: &str = "WORKER_FAILED_";

/// Result of a health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// Slots FAILED for longer than the policy's grace period.
    pub failed_slots: Vec<SlotNumber>,
    /// Exhausted permit pools and application gates.
    pub concurrency: Vec<String>,
    pub queue_len: usize,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.failed_slots.is_empty() && self.concurrency.is_empty()
    }

    /// `"OK"`, or every problem name joined with commas.
    pub fn status(&self) -> String {
        if self.is_healthy() {
            return "OK".to_string();
        }
        self.failed_slots
            .iter()
            .map(|slot| format!("{WORKER_FAILED_PREFIX}{slot}"))
            .chain(self.concurrency.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Owns the dispatcher, server, supervisor and admission control.
pub struct OperationRuntime {
    config: RuntimeConfig,
    limits: Arc<ConcurrencyLimits>,
    admission: Arc<AdmissionController>,
    dispatcher: Arc<Dispatcher>,
    supervisor: Arc<dyn WorkerSupervisor>,
    queuer: DefaultQueuer,
    in_flight: InFlightRegistry,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
    _started: StartedFlag,
}

impl OperationRuntime {
    /// How long shutdown waits for background tasks before aborting them.
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

    /// Starts every component. `registry` is what in-process workers can
    /// perform; `host` tags submissions with the calling application.
    pub async fn start(
        config: RuntimeConfig,
        registry: OperationRegistry,
        host: Arc<dyn HostContext>,
    ) -> Result<Self, RuntimeError> {
        let started = StartedFlag::claim()?;
        config.policy.validate().map_err(ConfigError::from)?;
        if config.supervision == SupervisionMode::Production {
            config.validate_for_production()?;
        }

        info!(
            workers = config.policy.number_of_workers,
            mode = ?config.supervision,
            "Starting operation runtime"
        );

        // =====================================================================
        // Shared infrastructure
        // =====================================================================
        let issuer = Arc::new(match config.worker_secret {
            Some(secret) => WorkerTokenIssuer::new(secret),
            None => {
                debug!("No worker secret configured, generating one for in-process workers");
                WorkerTokenIssuer::new(rand::random())
            }
        });
        let limits = Arc::new(ConcurrencyLimits::new(config.limits));
        let admission = Arc::new(AdmissionController::new(Arc::clone(&limits)));
        let dispatcher = Arc::new(Dispatcher::with_limits(
            config.policy.clone(),
            Arc::clone(&limits),
        )?);

        // =====================================================================
        // Dispatch server and timeout monitor
        // =====================================================================
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = Arc::new(DispatchServer::new(Arc::clone(&dispatcher), Arc::clone(&issuer)));
        let listener = DispatchServer::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr().map_err(ServerError::from)?;

        let serving = {
            let server = Arc::clone(&server);
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve(listener, shutdown).await {
                    error!(error = %e, "Dispatch server stopped");
                }
            })
        };
        let monitor = dispatcher.spawn_timeout_monitor(shutdown_rx);

        // =====================================================================
        // Supervision
        // =====================================================================
        let supervisor: Arc<dyn WorkerSupervisor> = match config.supervision {
            SupervisionMode::Production => Arc::new(ExternalProcessSupervisor::new(
                SupervisorctlManager::new(config.supervisor_group.clone()),
            )),
            SupervisionMode::InProcess => {
                let connector = TcpConnector::new(local_addr)
                    .with_retries(5, Duration::from_millis(200));
                Arc::new(
                    InProcessSupervisor::new(Arc::new(connector), Arc::clone(&issuer), Arc::new(registry))
                        .disabled(config.in_process_workers_disabled),
                )
            }
        };
        dispatcher.use_supervisor(Arc::clone(&supervisor));

        let queuer = DefaultQueuer::new(Arc::clone(&dispatcher), host);
        info!(addr = %local_addr, "Operation runtime started");

        Ok(Self {
            config,
            limits,
            admission,
            dispatcher,
            supervisor,
            queuer,
            in_flight: InFlightRegistry::new(),
            local_addr,
            shutdown_tx,
            tasks: Mutex::new(vec![serving, monitor]),
            stopped: AtomicBool::new(false),
            _started: started,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn queuer(&self) -> &DefaultQueuer {
        &self.queuer
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Shared registry for [`DefaultQueuer::perform_coalesced`].
    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    /// Address the dispatch server actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.dispatcher.stats()
    }

    pub fn health(&self) -> HealthReport {
        self.in_flight.prune();
        let report = HealthReport {
            failed_slots: self
                .dispatcher
                .failed_slots_beyond(self.config.policy.failed_slot_grace),
            concurrency: self.admission.health_check(),
            queue_len: self.dispatcher.queue_len(),
        };
        if !report.is_healthy() {
            warn!(status = %report.status(), "Runtime unhealthy");
        }
        report
    }

    /// Prometheus text exposition of every registered metric.
    pub fn metrics(&self) -> Result<String, RuntimeError> {
        Ok(qw_telemetry::encode_metrics()?)
    }

    /// Stops accepting workers, fails queued operations, stops workers and
    /// waits for background tasks. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down operation runtime...");
        let _ = self.shutdown_tx.send(true);

        let drained = self.dispatcher.shutdown();
        if drained > 0 {
            warn!(drained, "Queued operations failed by shutdown");
        }
        self.supervisor.shutdown().await;
        self.limits.close();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for mut task in tasks {
            if tokio::time::timeout(Self::SHUTDOWN_GRACE, &mut task)
                .await
                .is_err()
            {
                warn!("Background task did not stop in time, aborting");
                task.abort();
            }
        }
        info!("Operation runtime shutdown complete");
    }
}

impl Drop for OperationRuntime {
    fn drop(&mut self) {
        if !self.stopped.load(Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(true);
            self.dispatcher.shutdown();
            for task in self.tasks.get_mut().drain(..) {
                task.abort();
            }
        }
    }
}

impl std::fmt::Debug for OperationRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRuntime")
            .field("local_addr", &self.local_addr)
            .field("supervision", &self.config.supervision)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
