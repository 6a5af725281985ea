//! # Protocol Flows
//!
//! The whole stack over in-memory duplex connections: dispatcher, dispatch
//! server, real worker loops, notify targets and queuers.

use super::harness::{CountedLookup, Harness, LOOKUP_EXECUTIONS};
use qw_02_notify::{InFlightRegistry, WaitingNotifyTarget};
use qw_03_dispatcher::{DefaultQueuer, FixedApplication, PerformError};
use qw_runtime::{Fail, Ping, Sleep};
use shared_types::{
    encode_request, AdmissionError, ApplicationId, OperationEnvelope, OperationError, Outcome,
    Policy, SpinBudget,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn queuer(harness: &Harness, app: i64) -> DefaultQueuer {
    DefaultQueuer::new(
        Arc::clone(&harness.dispatcher),
        Arc::new(FixedApplication(ApplicationId(app))),
    )
}

// =============================================================================
// OUTCOMES
// =============================================================================

#[tokio::test]
async fn test_every_submission_gets_exactly_one_outcome() {
    let harness = Harness::with_workers(3);
    let _workers = harness.spawn_all();
    harness.wait_all_idle().await;

    let targets: Vec<_> = (0..20)
        .map(|i| {
            let target = Arc::new(WaitingNotifyTarget::new());
            let envelope = encode_request(&Ping {
                payload: format!("#{i}"),
            })
            .unwrap();
            harness
                .dispatcher
                .submit(envelope, ApplicationId(i % 4), target.clone())
                .unwrap();
            target
        })
        .collect();

    for target in &targets {
        assert!(target.wait().await.unwrap().is_success());
    }
    let stats = harness.dispatcher.stats();
    assert_eq!(stats.submitted, 20);
    assert_eq!(stats.terminal(), 20);
    assert_eq!(harness.dispatcher.queue_len(), 0);
}

#[tokio::test]
async fn test_operation_error_preserved_across_the_wire() {
    let harness = Harness::with_workers(1);
    let _workers = harness.spawn_all();

    let result = queuer(&harness, 1)
        .perform(&Fail {
            message: "invalid template".into(),
        })
        .await;

    assert_eq!(
        result,
        Err(PerformError::Failed(OperationError::Failed {
            message: "invalid template".into()
        }))
    );
    // A failed operation is never retried.
    assert_eq!(harness.dispatcher.stats().submitted, 1);
    assert_eq!(harness.dispatcher.stats().failed, 1);
}

#[tokio::test]
async fn test_failure_target_reports_exception() {
    let harness = Harness::with_workers(1);
    let _workers = harness.spawn_all();

    let target = Arc::new(WaitingNotifyTarget::new());
    harness
        .dispatcher
        .submit(
            encode_request(&Fail {
                message: "boom".into(),
            })
            .unwrap(),
            ApplicationId(1),
            target.clone(),
        )
        .unwrap();
    target.wait().await.unwrap();

    assert_eq!(target.was_successful(), Some(false));
    assert_eq!(target.exception(), Some(OperationError::failed("boom")));
    assert_eq!(target.result(), None);
}

#[tokio::test]
async fn test_ping_reports_answering_slot() {
    let harness = Harness::with_workers(2);
    let _workers = harness.spawn_all();
    harness.wait_all_idle().await;

    let pong = queuer(&harness, 1)
        .perform(&Ping {
            payload: "hello".into(),
        })
        .await
        .unwrap();
    assert_eq!(pong.payload, "hello");
    // Lowest idle slot takes the work.
    assert_eq!(pong.worker, Some(0));
}

// =============================================================================
// FAIRNESS AND ADMISSION
// =============================================================================

#[tokio::test]
async fn test_per_application_cap_lets_other_application_through() {
    let harness = Harness::new(Policy {
        max_ops_per_application: 2,
        ..Policy::with_workers(3)
    });
    let _workers = harness.spawn_all();
    harness.wait_all_idle().await;

    let slow: Vec<_> = (0..3)
        .map(|_| {
            let target = Arc::new(WaitingNotifyTarget::new());
            harness
                .dispatcher
                .submit(
                    encode_request(&Sleep { millis: 300 }).unwrap(),
                    ApplicationId(1),
                    target.clone(),
                )
                .unwrap();
            target
        })
        .collect();

    // Two of app 1's operations run; the third waits behind the cap, so the
    // free slot goes to app 2.
    let started = Instant::now();
    let pong = queuer(&harness, 2)
        .perform(&Ping {
            payload: "other".into(),
        })
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(pong.payload, "other");
    assert!(!slow[2].is_complete());

    for target in &slow {
        assert!(target.wait().await.unwrap().is_success());
    }
}

#[tokio::test]
async fn test_back_to_back_submissions_use_both_idle_workers() {
    let harness = Harness::with_workers(2);
    let _workers = harness.spawn_all();
    harness.wait_all_idle().await;

    let submit = |envelope: OperationEnvelope, app: i64| {
        let target = Arc::new(WaitingNotifyTarget::new());
        harness
            .dispatcher
            .submit(envelope, ApplicationId(app), target.clone())
            .unwrap();
        target
    };

    // Neither worker has picked anything up between the two submissions.
    let started = Instant::now();
    let slow = submit(encode_request(&Sleep { millis: 1_000 }).unwrap(), 1);
    let fast = submit(
        encode_request(&Ping {
            payload: "fast".into(),
        })
        .unwrap(),
        2,
    );

    assert!(fast.wait().await.unwrap().is_success());
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(!slow.is_complete());
    assert!(slow.wait().await.unwrap().is_success());
}

#[tokio::test]
async fn test_third_admission_refused_when_both_workers_busy() {
    let harness = Harness::new(Policy {
        admission: SpinBudget::new(4, Duration::from_millis(5)),
        ..Policy::with_workers(2)
    });
    let _workers = harness.spawn_all();
    harness.wait_all_idle().await;

    let mut accepted = Vec::new();
    for app in 1..=2 {
        let target = Arc::new(WaitingNotifyTarget::new());
        harness
            .dispatcher
            .submit_with_admission(
                encode_request(&Sleep { millis: 400 }).unwrap(),
                ApplicationId(app),
                target.clone(),
            )
            .await
            .unwrap();
        accepted.push(target);
    }

    let refused = harness
        .dispatcher
        .submit_with_admission(
            encode_request(&Sleep { millis: 400 }).unwrap(),
            ApplicationId(3),
            Arc::new(WaitingNotifyTarget::new()),
        )
        .await;
    assert!(matches!(
        refused,
        Err(AdmissionError::NoWorkerAvailable { spins: 4, .. })
    ));
    assert_eq!(harness.dispatcher.stats().admission_rejections, 1);

    for target in &accepted {
        assert!(target.wait().await.unwrap().is_success());
    }
}

#[tokio::test]
async fn test_inline_fallback_refuses_isolated_operation() {
    let harness = Harness::new(Policy {
        admission: SpinBudget::new(1, Duration::from_millis(1)),
        ..Policy::with_workers(1)
    });
    // No workers: admission can never succeed.
    let queuer = queuer(&harness, 1);

    let pong = queuer
        .perform_or_inline(Ping {
            payload: "inline".into(),
        })
        .await
        .unwrap();
    assert_eq!(pong.worker, None);

    let isolated = queuer.perform_or_inline(Sleep { millis: 1 }).await;
    assert!(matches!(
        isolated,
        Err(PerformError::Failed(OperationError::RequiresIsolation { .. }))
    ));
}

// =============================================================================
// COALESCING
// =============================================================================

#[tokio::test]
async fn test_identical_lookups_share_one_execution() {
    let harness = Harness::with_workers(2);
    let _workers = harness.spawn_all();
    harness.wait_all_idle().await;

    let queuer = queuer(&harness, 9);
    let in_flight = InFlightRegistry::with_stagger(Duration::from_millis(10));
    let lookup = CountedLookup {
        key: "report-17".into(),
        millis: 100,
    };
    let before = LOOKUP_EXECUTIONS.load(Ordering::SeqCst);

    let (a, b, c) = tokio::join!(
        queuer.perform_coalesced(&in_flight, "report-17", &lookup),
        queuer.perform_coalesced(&in_flight, "report-17", &lookup),
        queuer.perform_coalesced(&in_flight, "report-17", &lookup),
    );

    for result in [a, b, c] {
        assert_eq!(result.unwrap(), "REPORT-17");
    }
    assert_eq!(LOOKUP_EXECUTIONS.load(Ordering::SeqCst) - before, 1);
    assert_eq!(harness.dispatcher.stats().submitted, 1);

    in_flight.prune();
    assert!(in_flight.is_empty());
}

#[tokio::test]
async fn test_waiters_released_with_stagger() {
    let harness = Harness::with_workers(1);
    let _workers = harness.spawn_all();
    harness.wait_all_idle().await;

    let stagger = Duration::from_millis(40);
    let target = Arc::new(WaitingNotifyTarget::with_stagger(stagger));
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let target = Arc::clone(&target);
            tokio::spawn(async move {
                let outcome = target.wait().await.unwrap();
                (outcome, Instant::now())
            })
        })
        .collect();
    // All three must be registered before the operation can complete.
    harness.wait_until(|_| target.waiter_count() == 3).await;

    harness
        .dispatcher
        .submit(
            encode_request(&Ping {
                payload: "shared".into(),
            })
            .unwrap(),
            ApplicationId(1),
            target.clone(),
        )
        .unwrap();

    let mut released = Vec::new();
    for waiter in waiters {
        let (outcome, at) = waiter.await.unwrap();
        assert!(matches!(outcome, Outcome::Completed(_)));
        released.push(at);
    }
    released.sort();
    // A pause follows every release but the last.
    assert!(released[1] - released[0] >= stagger);
    assert!(released[2] - released[1] >= stagger);

    let (sender, _receiver) = tokio::sync::oneshot::channel();
    assert_eq!(target.add_waiter(sender).unwrap(), None);
}
