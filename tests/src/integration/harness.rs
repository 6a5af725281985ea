//! # Integration Harness
//!
//! A dispatcher, its dispatch server and a way to start workers against it,
//! without any supervisor getting in the way unless a test installs one.

use async_trait::async_trait;
use parking_lot::Mutex;
use qw_03_dispatcher::{Dispatcher, SlotState, WorkerSupervisor};
use qw_04_dispatch_server::{
    DispatchServer, DuplexConnector, RecyclePolicy, ResourceProbe, WorkerConfig, WorkerConnector,
    WorkerError, WorkerExit, WorkerProcess,
};
use qw_runtime::builtin_registry;
use serde::{Deserialize, Serialize};
use shared_types::{
    Operation, OperationContext, OperationError, OperationRegistry, Policy, SlotNumber,
    WorkerTokenIssuer,
};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

// =============================================================================
// OPERATIONS
// =============================================================================

/// Executions of [`CountedLookup`] in this process.
pub static LOOKUP_EXECUTIONS: AtomicUsize = AtomicUsize::new(0);

/// Slow, countable lookup for coalescing tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountedLookup {
    pub key: String,
    pub millis: u64,
}

impl Operation for CountedLookup {
    const KIND: &'static str = "it.counted_lookup";
    type Output = String;

    fn perform(self, _ctx: &OperationContext) -> Result<String, OperationError> {
        LOOKUP_EXECUTIONS.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(self.millis));
        Ok(self.key.to_uppercase())
    }
}

/// Diagnostic operations plus [`CountedLookup`].
pub fn test_registry() -> Arc<OperationRegistry> {
    let mut registry = builtin_registry();
    registry.register::<CountedLookup>();
    Arc::new(registry)
}

// =============================================================================
// PROBES AND SUPERVISORS
// =============================================================================

/// Memory probe that reports whatever the test stores.
#[derive(Debug, Default)]
pub struct FixedProbe(pub AtomicU32);

impl FixedProbe {
    pub fn at(percent: u32) -> Arc<Self> {
        Arc::new(Self(AtomicU32::new(percent)))
    }

    pub fn set(&self, percent: u32) {
        self.0.store(percent, Ordering::SeqCst);
    }
}

impl ResourceProbe for FixedProbe {
    fn usage_percent(&self) -> Option<u32> {
        Some(self.0.load(Ordering::SeqCst))
    }
}

/// What a supervisor was told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorCall {
    Failed(SlotNumber),
    Recycling(SlotNumber),
}

/// Records calls and does nothing else.
#[derive(Debug, Default)]
pub struct RecordingSupervisor {
    calls: Mutex<Vec<SupervisorCall>>,
}

impl RecordingSupervisor {
    pub fn calls(&self) -> Vec<SupervisorCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl WorkerSupervisor for RecordingSupervisor {
    fn start_supervision(&self, _policy: &Policy) {}

    fn worker_failed(&self, slot: SlotNumber) {
        self.calls.lock().push(SupervisorCall::Failed(slot));
    }

    fn worker_recycling(&self, slot: SlotNumber) {
        self.calls.lock().push(SupervisorCall::Recycling(slot));
    }

    async fn shutdown(&self) {}
}

// =============================================================================
// HARNESS
// =============================================================================

/// Runs a worker for `slot` on a spawned task.
pub fn launch_worker(
    issuer: &WorkerTokenIssuer,
    registry: &Arc<OperationRegistry>,
    connector: Arc<dyn WorkerConnector>,
    slot: SlotNumber,
    probe: Arc<dyn ResourceProbe>,
    recycle: RecyclePolicy,
) -> JoinHandle<Result<WorkerExit, WorkerError>> {
    let token = issuer.issue(slot).expect("token");
    let config = WorkerConfig::new(slot, token).with_recycle(recycle);
    let mut worker = WorkerProcess::new(config, Arc::clone(registry), connector, probe);
    tokio::spawn(async move { worker.run().await })
}

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub server: Arc<DispatchServer>,
    pub issuer: Arc<WorkerTokenIssuer>,
    pub registry: Arc<OperationRegistry>,
}

impl Harness {
    pub fn new(policy: Policy) -> Self {
        let issuer = Arc::new(WorkerTokenIssuer::new([42; 32]));
        let dispatcher = Arc::new(Dispatcher::new(policy).expect("valid policy"));
        let server = Arc::new(DispatchServer::new(Arc::clone(&dispatcher), Arc::clone(&issuer)));
        Self {
            dispatcher,
            server,
            issuer,
            registry: test_registry(),
        }
    }

    pub fn with_workers(workers: usize) -> Self {
        Self::new(Policy::with_workers(workers))
    }

    pub fn duplex(&self) -> Arc<dyn WorkerConnector> {
        Arc::new(DuplexConnector::new(Arc::clone(&self.server)))
    }

    /// Starts a worker for `slot` over an in-memory connection.
    pub fn spawn_worker(
        &self,
        slot: SlotNumber,
        probe: Arc<dyn ResourceProbe>,
        recycle: RecyclePolicy,
    ) -> JoinHandle<Result<WorkerExit, WorkerError>> {
        self.spawn_worker_via(self.duplex(), slot, probe, recycle)
    }

    pub fn spawn_worker_via(
        &self,
        connector: Arc<dyn WorkerConnector>,
        slot: SlotNumber,
        probe: Arc<dyn ResourceProbe>,
        recycle: RecyclePolicy,
    ) -> JoinHandle<Result<WorkerExit, WorkerError>> {
        launch_worker(&self.issuer, &self.registry, connector, slot, probe, recycle)
    }

    /// Starts one steady worker per slot.
    pub fn spawn_all(&self) -> Vec<JoinHandle<Result<WorkerExit, WorkerError>>> {
        (0..self.dispatcher.policy().number_of_workers)
            .map(|slot| self.spawn_worker(slot, FixedProbe::at(10), RecyclePolicy::disabled()))
            .collect()
    }

    /// Polls until every slot is IDLE.
    pub async fn wait_all_idle(&self) {
        self.wait_until(|dispatcher| {
            dispatcher
                .slots()
                .iter()
                .all(|slot| slot.state == SlotState::Idle)
        })
        .await;
    }

    /// Polls `condition` every 5 ms for up to 2 s.
    pub async fn wait_until<F>(&self, condition: F)
    where
        F: Fn(&Dispatcher) -> bool,
    {
        for _ in 0..400 {
            if condition(&self.dispatcher) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never held: {:?}", self.dispatcher.slots());
    }
}
