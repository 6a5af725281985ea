//! In-process supervision for tests and development.
//!
//! Each worker runs as a tokio task speaking the real protocol through a
//! [`WorkerConnector`]. Replacing a worker aborts its task and spawns a new
//! one once the old task has ended. A failure reported while the replacement
//! is still authenticating belongs to the old connection and is ignored.
//! Memory-driven recycling is disabled: a restart here would not reclaim
//! anything and would disturb state shared with the host.

use crate::domain::{RestartLedger, RestartReason, SlotRestarts};
use async_trait::async_trait;
use parking_lot::Mutex;
use qw_03_dispatcher::WorkerSupervisor;
use qw_04_dispatch_server::{
    ProcessMemoryProbe, RecyclePolicy, WorkerConfig, WorkerConnector, WorkerProcess,
};
use shared_types::{OperationRegistry, Policy, SlotNumber, WorkerTokenIssuer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Environment variable that, when `yes`, stops in-process workers starting.
pub const DISABLE_IN_PROCESS_WORKERS: &str = "DISABLE_IN_PROCESS_WORKERS";

/// Whether [`DISABLE_IN_PROCESS_WORKERS`] is set to `yes`.
pub fn disabled_by_environment() -> bool {
    std::env::var(DISABLE_IN_PROCESS_WORKERS).is_ok_and(|value| value == "yes")
}

/// A worker task and whether the server has accepted it yet.
struct RunningWorker {
    task: JoinHandle<()>,
    accepted: Arc<AtomicBool>,
}

impl RunningWorker {
    /// Still connecting or authenticating, so it cannot own the slot yet.
    fn is_starting(&self) -> bool {
        !self.task.is_finished() && !self.accepted.load(Ordering::SeqCst)
    }
}

pub struct InProcessSupervisor {
    connector: Arc<dyn WorkerConnector>,
    issuer: Arc<WorkerTokenIssuer>,
    registry: Arc<OperationRegistry>,
    workers: Mutex<Vec<Option<RunningWorker>>>,
    started: AtomicBool,
    stopping: AtomicBool,
    disabled: bool,
    restarts: RestartLedger,
}

impl InProcessSupervisor {
    pub fn new(
        connector: Arc<dyn WorkerConnector>,
        issuer: Arc<WorkerTokenIssuer>,
        registry: Arc<OperationRegistry>,
    ) -> Self {
        Self {
            connector,
            issuer,
            registry,
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            disabled: false,
            restarts: RestartLedger::new(),
        }
    }

    /// A supervisor that never starts workers.
    #[must_use]
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn restarts(&self, slot: SlotNumber) -> SlotRestarts {
        self.restarts.for_slot(slot)
    }

    /// Worker tasks that are still running.
    pub fn running_workers(&self) -> usize {
        self.workers
            .lock()
            .iter()
            .flatten()
            .filter(|worker| !worker.task.is_finished())
            .count()
    }

    /// Spawns a worker for `slot` that starts once `previous` has ended.
    fn spawn_worker(
        &self,
        slot: SlotNumber,
        previous: Option<JoinHandle<()>>,
    ) -> Option<RunningWorker> {
        let token = match self.issuer.issue(slot) {
            Ok(token) => token,
            Err(e) => {
                error!(slot, error = %e, "[supervisor] Cannot issue worker token");
                return None;
            }
        };
        let Ok(runtime) = Handle::try_current() else {
            error!(slot, "[supervisor] No tokio runtime, in-process worker not started");
            return None;
        };

        let accepted = Arc::new(AtomicBool::new(false));
        let config = WorkerConfig::new(slot, token).with_recycle(RecyclePolicy::disabled());
        let mut worker = WorkerProcess::new(
            config,
            Arc::clone(&self.registry),
            Arc::clone(&self.connector),
            Arc::new(ProcessMemoryProbe),
        )
        .with_accepted_flag(Arc::clone(&accepted));
        let task = runtime.spawn(async move {
            if let Some(previous) = previous {
                // Aborted: resolves once its connection has been dropped.
                let _ = previous.await;
            }
            match worker.run().await {
                Ok(exit) => info!(slot, ?exit, "[supervisor] In-process worker finished"),
                Err(e) => warn!(slot, error = %e, "[supervisor] In-process worker stopped"),
            }
        });
        Some(RunningWorker { task, accepted })
    }
}

#[async_trait]
impl WorkerSupervisor for InProcessSupervisor {
    fn start_supervision(&self, policy: &Policy) {
        if self.disabled {
            info!("[supervisor] In-process workers disabled by {DISABLE_IN_PROCESS_WORKERS}=yes");
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(workers = policy.number_of_workers, "[supervisor] Starting in-process workers");
        let tasks: Vec<_> = (0..policy.number_of_workers)
            .map(|slot| self.spawn_worker(slot, None))
            .collect();
        *self.workers.lock() = tasks;
    }

    fn worker_failed(&self, slot: SlotNumber) {
        if self.stopping.load(Ordering::SeqCst) || !self.started.load(Ordering::SeqCst) {
            return;
        }
        let mut workers = self.workers.lock();
        if workers.len() <= slot {
            workers.resize_with(slot + 1, || None);
        }
        if workers[slot].as_ref().is_some_and(RunningWorker::is_starting) {
            debug!(slot, "[supervisor] Replacement already starting, ignoring failure");
            return;
        }

        let total = self.restarts.record(slot, RestartReason::Failed);
        info!(slot, restarts = total, "[supervisor] Replacing in-process worker");
        let previous = workers[slot].take().map(|old| {
            old.task.abort();
            old.task
        });
        workers[slot] = self.spawn_worker(slot, previous);
    }

    async fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let workers: Vec<_> = self.workers.lock().drain(..).flatten().collect();
        if !workers.is_empty() {
            info!(workers = workers.len(), "[supervisor] Stopping in-process workers");
        }
        for worker in workers {
            worker.task.abort();
        }
    }
}

impl std::fmt::Debug for InProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessSupervisor")
            .field("disabled", &self.disabled)
            .field("running", &self.running_workers())
            .finish()
    }
}
