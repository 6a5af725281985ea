//! # Supervision Flows
//!
//! The production supervisor driving a process manager that "starts
//! processes" by launching worker tasks, so recycling and crash replacement
//! run through the same code paths supervisord would trigger.

use super::harness::{launch_worker, FixedProbe, Harness, RecordingSupervisor, SupervisorCall};
use async_trait::async_trait;
use parking_lot::Mutex;
use qw_02_notify::WaitingNotifyTarget;
use qw_03_dispatcher::{SlotState, WorkerSupervisor};
use qw_04_dispatch_server::{RecyclePolicy, WorkerConnector, WorkerError, WorkerExit};
use qw_05_supervisor::{ExternalProcessSupervisor, ProcessManager, SlotRestarts, SupervisorError};
use qw_runtime::{Ping, Sleep};
use shared_types::{
    decode_output, encode_request, ApplicationId, OperationError, OperationRegistry, Outcome,
    SlotNumber, WorkerTokenIssuer,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

type WorkerTask = JoinHandle<Result<WorkerExit, WorkerError>>;

/// Stands in for supervisord: one worker task per program.
struct TaskManager {
    workers: usize,
    connector: Arc<dyn WorkerConnector>,
    issuer: Arc<WorkerTokenIssuer>,
    registry: Arc<OperationRegistry>,
    probes: Mutex<HashMap<SlotNumber, Arc<FixedProbe>>>,
    tasks: Mutex<HashMap<SlotNumber, WorkerTask>>,
    stops: AtomicUsize,
}

impl TaskManager {
    fn new(harness: &Harness) -> Self {
        Self {
            workers: harness.dispatcher.policy().number_of_workers,
            connector: harness.duplex(),
            issuer: Arc::clone(&harness.issuer),
            registry: Arc::clone(&harness.registry),
            probes: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            stops: AtomicUsize::new(0),
        }
    }

    fn start(&self, slot: SlotNumber) {
        let probe = FixedProbe::at(10);
        let task = launch_worker(
            &self.issuer,
            &self.registry,
            Arc::clone(&self.connector),
            slot,
            probe.clone(),
            RecyclePolicy::default(),
        );
        self.probes.lock().insert(slot, probe);
        if let Some(old) = self.tasks.lock().insert(slot, task) {
            old.abort();
        }
    }

    /// Memory probe of the worker currently running `slot`.
    fn probe(&self, slot: SlotNumber) -> Arc<FixedProbe> {
        Arc::clone(&self.probes.lock()[&slot])
    }

    /// Simulates the worker process for `slot` crashing.
    fn kill(&self, slot: SlotNumber) {
        if let Some(task) = self.tasks.lock().remove(&slot) {
            task.abort();
        }
    }
}

#[async_trait]
impl ProcessManager for TaskManager {
    async fn launch(&self) -> Result<(), SupervisorError> {
        for slot in 0..self.workers {
            self.start(slot);
        }
        Ok(())
    }

    async fn restart_worker(&self, slot: SlotNumber) -> Result<(), SupervisorError> {
        self.start(slot);
        Ok(())
    }

    async fn stop_all(&self) -> Result<(), SupervisorError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        for (_, task) in self.tasks.lock().drain() {
            task.abort();
        }
        Ok(())
    }
}

fn supervised(workers: usize) -> (Harness, Arc<ExternalProcessSupervisor<TaskManager>>) {
    let harness = Harness::with_workers(workers);
    let supervisor = Arc::new(ExternalProcessSupervisor::new(TaskManager::new(&harness)));
    harness.dispatcher.use_supervisor(supervisor.clone());
    (harness, supervisor)
}

fn submit(harness: &Harness, envelope: shared_types::OperationEnvelope) -> Arc<WaitingNotifyTarget> {
    let target = Arc::new(WaitingNotifyTarget::new());
    harness
        .dispatcher
        .submit(envelope, ApplicationId(1), target.clone())
        .unwrap();
    target
}

async fn ping(harness: &Harness, payload: &str) -> Option<SlotNumber> {
    let target = submit(
        harness,
        encode_request(&Ping {
            payload: payload.into(),
        })
        .unwrap(),
    );
    match target.wait().await.unwrap() {
        Outcome::Completed(bytes) => decode_output::<Ping>(&bytes).unwrap().worker,
        other => panic!("ping failed: {other:?}"),
    }
}

#[tokio::test]
async fn test_recycling_worker_replaced_before_next_assignment() {
    let (harness, supervisor) = supervised(1);
    harness.wait_all_idle().await;
    let first_generation = harness.dispatcher.slots()[0].generation;

    // Memory grows past the baseline while the first ping runs.
    supervisor.manager().probe(0).set(90);
    assert_eq!(ping(&harness, "last").await, Some(0));

    // The replacement authenticates before the slot takes more work.
    assert_eq!(ping(&harness, "next").await, Some(0));
    let slot = &harness.dispatcher.slots()[0];
    assert_eq!(slot.state, SlotState::Idle);
    assert!(slot.generation > first_generation);
    assert_eq!(
        supervisor.restarts(0),
        SlotRestarts {
            failed: 0,
            recycled: 1
        }
    );
}

#[tokio::test]
async fn test_starting_slot_receives_no_work() {
    let harness = Harness::with_workers(1);
    let supervisor = Arc::new(RecordingSupervisor::default());
    harness.dispatcher.use_supervisor(supervisor.clone());

    let probe = FixedProbe::at(10);
    let first = harness.spawn_worker(0, probe.clone(), RecyclePolicy::default());
    harness.wait_all_idle().await;
    probe.set(90);

    assert_eq!(ping(&harness, "last").await, Some(0));
    assert_eq!(first.await.unwrap().unwrap(), WorkerExit::Recycled);
    assert_eq!(supervisor.calls(), vec![SupervisorCall::Recycling(0)]);

    // Nobody has replaced the worker yet: the operation waits in the queue.
    let waiting = submit(&harness, encode_request(&Ping { payload: "queued".into() }).unwrap());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!waiting.is_complete());
    assert_eq!(harness.dispatcher.queue_len(), 1);
    assert_eq!(harness.dispatcher.slots()[0].state, SlotState::Starting);

    let _replacement = harness.spawn_worker(0, FixedProbe::at(10), RecyclePolicy::default());
    assert!(waiting.wait().await.unwrap().is_success());
}

#[tokio::test]
async fn test_crashed_worker_lost_and_restarted() {
    let (harness, supervisor) = supervised(2);
    harness.wait_all_idle().await;

    let slow = submit(&harness, encode_request(&Sleep { millis: 1_000 }).unwrap());
    harness
        .wait_until(|d| d.slots()[0].state == SlotState::Busy)
        .await;
    supervisor.manager().kill(0);

    assert_eq!(slow.wait().await.unwrap(), Outcome::Lost { slot: 0 });
    harness.wait_all_idle().await;
    assert_eq!(supervisor.restarts(0).failed, 1);
    assert_eq!(supervisor.restarts(1).total(), 0);

    // LOST is never retried; the restarted slot serves new work.
    assert_eq!(harness.dispatcher.stats().submitted, 1);
    assert_eq!(ping(&harness, "after crash").await, Some(0));
}

#[tokio::test]
async fn test_shutdown_fails_queued_work_and_stops_workers() {
    let (harness, supervisor) = supervised(1);
    harness.wait_all_idle().await;

    let running = submit(&harness, encode_request(&Sleep { millis: 300 }).unwrap());
    harness
        .wait_until(|d| d.slots()[0].state == SlotState::Busy)
        .await;
    let queued = submit(&harness, encode_request(&Ping { payload: "late".into() }).unwrap());

    assert_eq!(harness.dispatcher.shutdown(), 1);
    assert_eq!(
        queued.wait().await.unwrap(),
        Outcome::Failed(OperationError::DispatcherShutdown)
    );
    // Work already on a worker still completes.
    assert!(running.wait().await.unwrap().is_success());

    supervisor.shutdown().await;
    assert_eq!(supervisor.manager().stops.load(Ordering::SeqCst), 1);
    supervisor.worker_failed(0);
    assert_eq!(supervisor.restarts(0).total(), 0);
}
