//! Production supervision through an external process manager.
//!
//! The manager owns the worker processes; this side only tells it what to do.
//! A failure is always answered with a targeted restart of one slot, never of
//! the whole pool.

use crate::domain::{RestartLedger, RestartReason, SlotRestarts, SupervisorError};
use crate::ports::ProcessManager;
use async_trait::async_trait;
use qw_03_dispatcher::WorkerSupervisor;
use shared_types::{Policy, SlotNumber};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

pub struct ExternalProcessSupervisor<M: ProcessManager> {
    manager: Arc<M>,
    started: AtomicBool,
    stopping: AtomicBool,
    restarts: RestartLedger,
}

impl<M: ProcessManager> ExternalProcessSupervisor<M> {
    pub fn new(manager: M) -> Self {
        Self {
            manager: Arc::new(manager),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            restarts: RestartLedger::new(),
        }
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub fn restarts(&self, slot: SlotNumber) -> SlotRestarts {
        self.restarts.for_slot(slot)
    }

    fn spawn<F>(&self, action: &'static str, task: F)
    where
        F: Future<Output = Result<(), SupervisorError>> + Send + 'static,
    {
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = task.await {
                        error!(action, error = %e, "[supervisor] Process manager command failed");
                    }
                });
            }
            Err(_) => error!(action, error = %SupervisorError::NoRuntime, "[supervisor] Cannot run process manager command"),
        }
    }

    fn replace(&self, slot: SlotNumber, reason: RestartReason) {
        if self.stopping.load(Ordering::SeqCst) {
            debug!(slot, "[supervisor] Stopping, not replacing worker");
            return;
        }
        let total = self.restarts.record(slot, reason);
        warn!(slot, reason = reason.as_str(), restarts = total, "[supervisor] Restarting worker");
        let manager = Arc::clone(&self.manager);
        self.spawn("restart", async move { manager.restart_worker(slot).await });
    }
}

#[async_trait]
impl<M: ProcessManager> WorkerSupervisor for ExternalProcessSupervisor<M> {
    fn start_supervision(&self, policy: &Policy) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("[supervisor] Supervision already started");
            return;
        }
        info!(workers = policy.number_of_workers, "[supervisor] Launching worker processes");
        let manager = Arc::clone(&self.manager);
        self.spawn("launch", async move { manager.launch().await });
    }

    fn worker_failed(&self, slot: SlotNumber) {
        self.replace(slot, RestartReason::Failed);
    }

    fn worker_recycling(&self, slot: SlotNumber) {
        self.replace(slot, RestartReason::Recycled);
    }

    async fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        info!("[supervisor] Stopping worker processes");
        if let Err(e) = self.manager.stop_all().await {
            error!(error = %e, "[supervisor] Could not stop worker processes");
        }
    }
}
