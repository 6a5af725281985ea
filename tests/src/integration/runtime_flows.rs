//! # Runtime Flows
//!
//! [`OperationRuntime`] end to end: configuration from variables, in-process
//! workers over loopback TCP, health and metrics, shutdown.
//!
//! Only one runtime may run per process, so everything lives in one test.

use qw_03_dispatcher::{HostContext, PerformError};
use qw_runtime::{Fail, OperationRuntime, Ping, RuntimeConfig, RuntimeError, SupervisionMode};
use shared_types::{ApplicationId, OperationError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Host whose "current request" changes between calls.
#[derive(Debug, Default)]
struct SwitchingHost(AtomicI64);

impl HostContext for SwitchingHost {
    fn current_application_id(&self) -> ApplicationId {
        ApplicationId(self.0.load(Ordering::SeqCst))
    }
}

fn runtime_config() -> RuntimeConfig {
    let vars: HashMap<&str, &str> = [
        ("QW_WORKERS", "2"),
        ("QW_LISTEN_ADDR", "127.0.0.1:0"),
        ("QW_SUPERVISION", "in-process"),
        ("QW_WORKER_SECRET", "0f0e0d0c0b0a09080706050403020100f0e0d0c0b0a090807060504030201000"),
    ]
    .into_iter()
    .collect();
    RuntimeConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_runtime_end_to_end() {
    let config = runtime_config();
    assert_eq!(config.supervision, SupervisionMode::InProcess);

    let host = Arc::new(SwitchingHost::default());
    let runtime = OperationRuntime::start(config.clone(), qw_runtime::builtin_registry(), host.clone())
        .await
        .unwrap();
    assert!(matches!(
        OperationRuntime::start(config, qw_runtime::builtin_registry(), host.clone()).await,
        Err(RuntimeError::AlreadyStarted)
    ));

    for app in 1..=3 {
        host.0.store(app, Ordering::SeqCst);
        let pong = runtime
            .queuer()
            .perform(&Ping {
                payload: format!("app {app}"),
            })
            .await
            .unwrap();
        assert_eq!(pong.payload, format!("app {app}"));
        assert!(matches!(pong.worker, Some(0 | 1)));
    }

    let failure = runtime
        .queuer()
        .perform(&Fail {
            message: "expected".into(),
        })
        .await;
    assert_eq!(
        failure,
        Err(PerformError::Failed(OperationError::failed("expected")))
    );

    let health = runtime.health();
    assert!(health.is_healthy(), "{}", health.status());
    assert_eq!(health.queue_len, 0);

    let stats = runtime.stats();
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.failed, 1);

    runtime.shutdown().await;
    let after = runtime
        .queuer()
        .perform(&Ping {
            payload: "too late".into(),
        })
        .await;
    assert!(matches!(after, Err(PerformError::Submit(_))));

    drop(runtime);
    // The process-wide flag is released with the runtime.
    let again = OperationRuntime::start(
        RuntimeConfig {
            in_process_workers_disabled: true,
            ..runtime_config()
        },
        qw_runtime::builtin_registry(),
        host,
    )
    .await
    .unwrap();
    again.shutdown().await;
}
