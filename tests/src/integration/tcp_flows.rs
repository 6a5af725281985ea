//! # Loopback TCP Flows
//!
//! Workers connecting over real sockets, the way separately started worker
//! processes do.

use super::harness::{FixedProbe, Harness, RecordingSupervisor, SupervisorCall};
use qw_02_notify::WaitingNotifyTarget;
use qw_03_dispatcher::{DefaultQueuer, FixedApplication, SlotState};
use qw_04_dispatch_server::{
    DispatchServer, RecyclePolicy, TcpConnector, WorkerConfig, WorkerConnector, WorkerError,
    WorkerProcess,
};
use qw_runtime::{Ping, Sleep};
use shared_types::{encode_request, ApplicationId, Outcome};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Binds an ephemeral port and serves `harness` on it.
async fn serve(harness: &Harness) -> (SocketAddr, watch::Sender<bool>) {
    let listener = DispatchServer::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(Arc::clone(&harness.server).serve(listener, shutdown_rx));
    (addr, shutdown_tx)
}

fn tcp(addr: SocketAddr) -> Arc<dyn WorkerConnector> {
    Arc::new(TcpConnector::new(addr).with_retries(5, Duration::from_millis(20)))
}

#[tokio::test]
async fn test_ping_over_loopback() {
    let harness = Harness::with_workers(1);
    let (addr, shutdown) = serve(&harness).await;
    let _worker =
        harness.spawn_worker_via(tcp(addr), 0, FixedProbe::at(10), RecyclePolicy::disabled());

    let queuer = DefaultQueuer::new(
        Arc::clone(&harness.dispatcher),
        Arc::new(FixedApplication(ApplicationId(1))),
    );
    let pong = queuer
        .perform(&Ping {
            payload: "tcp".into(),
        })
        .await
        .unwrap();
    assert_eq!(pong.payload, "tcp");
    assert_eq!(pong.worker, Some(0));

    shutdown.send(true).unwrap();
}

#[tokio::test]
async fn test_bad_token_rejected_without_touching_other_slots() {
    let harness = Harness::with_workers(2);
    let (addr, _shutdown) = serve(&harness).await;
    let _good =
        harness.spawn_worker_via(tcp(addr), 0, FixedProbe::at(10), RecyclePolicy::disabled());
    harness
        .wait_until(|d| d.slots()[0].state == SlotState::Idle)
        .await;

    let mut impostor = WorkerProcess::new(
        WorkerConfig::new(1, harness.issuer.issue(0).unwrap()),
        Arc::clone(&harness.registry),
        tcp(addr),
        FixedProbe::at(10),
    );
    let error = impostor.run().await.unwrap_err();
    assert!(matches!(error, WorkerError::Rejected { worker_number: 1 }));
    assert_eq!(error.exit_code(), 2);

    let slots = harness.dispatcher.slots();
    assert_eq!(slots[0].state, SlotState::Idle);
    assert_eq!(slots[1].state, SlotState::Starting);
}

#[tokio::test]
async fn test_duplicate_worker_number_rejected() {
    let harness = Harness::with_workers(1);
    let (addr, _shutdown) = serve(&harness).await;
    let _first =
        harness.spawn_worker_via(tcp(addr), 0, FixedProbe::at(10), RecyclePolicy::disabled());
    harness.wait_all_idle().await;
    let generation = harness.dispatcher.slots()[0].generation;

    let mut second = WorkerProcess::new(
        WorkerConfig::new(0, harness.issuer.issue(0).unwrap()),
        Arc::clone(&harness.registry),
        tcp(addr),
        FixedProbe::at(10),
    );
    assert!(matches!(
        second.run().await,
        Err(WorkerError::Rejected { worker_number: 0 })
    ));

    // The original connection keeps its slot.
    let slot = &harness.dispatcher.slots()[0];
    assert_eq!(slot.state, SlotState::Idle);
    assert_eq!(slot.generation, generation);
}

#[tokio::test]
async fn test_worker_dropped_while_busy_is_lost_exactly_once() {
    let harness = Harness::with_workers(1);
    let supervisor = Arc::new(RecordingSupervisor::default());
    harness.dispatcher.use_supervisor(supervisor.clone());
    let (addr, _shutdown) = serve(&harness).await;
    let worker =
        harness.spawn_worker_via(tcp(addr), 0, FixedProbe::at(10), RecyclePolicy::disabled());
    harness.wait_all_idle().await;

    let target = Arc::new(WaitingNotifyTarget::new());
    harness
        .dispatcher
        .submit(
            encode_request(&Sleep { millis: 1_000 }).unwrap(),
            ApplicationId(1),
            target.clone(),
        )
        .unwrap();
    harness
        .wait_until(|d| d.slots()[0].state == SlotState::Busy)
        .await;

    // Dropping the worker task closes its socket mid-operation.
    worker.abort();

    assert_eq!(target.wait().await.unwrap(), Outcome::Lost { slot: 0 });
    harness
        .wait_until(|d| d.slots()[0].state == SlotState::Failed)
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(supervisor.calls(), vec![SupervisorCall::Failed(0)]);
    assert_eq!(harness.dispatcher.stats().lost, 1);
}

#[tokio::test]
async fn test_connect_gives_up_after_configured_attempts() {
    let unused = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let harness = Harness::with_workers(1);
    let connector = Arc::new(TcpConnector::new(unused).with_retries(2, Duration::from_millis(10)));
    let mut worker = WorkerProcess::new(
        WorkerConfig::new(0, harness.issuer.issue(0).unwrap()),
        Arc::clone(&harness.registry),
        connector,
        FixedProbe::at(10),
    );

    let error = worker.run().await.unwrap_err();
    assert!(matches!(error, WorkerError::Connect { attempts: 2, .. }));
    assert_eq!(error.exit_code(), 1);
}
