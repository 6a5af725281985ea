//! Process-wide counting permits.

use shared_types::AdmissionError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

/// Health name reported when no script permits remain.
pub const CONCURRENCY_RUNTIME: &str = "CONCURRENCY_RUNTIME";
/// Health name reported when no worker-activity permits remain.
pub const CONCURRENCY_WORKERS: &str = "CONCURRENCY_WORKERS";

/// Permit pool sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitsConfig {
    /// Concurrent script-layer executions.
    pub script_runtime_permits: usize,
    /// Concurrently active workers, system-wide.
    pub worker_activity_permits: usize,
}

impl LimitsConfig {
    pub const DEFAULT_SCRIPT_RUNTIME_PERMITS: usize = 8;

    /// Defaults sized for `workers` worker slots.
    #[must_use]
    pub fn for_workers(workers: usize) -> Self {
        Self {
            script_runtime_permits: Self::DEFAULT_SCRIPT_RUNTIME_PERMITS,
            worker_activity_permits: workers,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self::for_workers(shared_types::Policy::DEFAULT_WORKERS)
    }
}

/// Two independent FIFO-fair permit pools.
///
/// Tokio semaphores queue waiters in arrival order, which gives the
/// fairness the serving layer relies on.
#[derive(Debug)]
pub struct ConcurrencyLimits {
    config: LimitsConfig,
    script_runtime: Arc<Semaphore>,
    worker_activity: Arc<Semaphore>,
}

impl ConcurrencyLimits {
    pub fn new(config: LimitsConfig) -> Self {
        Self {
            config,
            script_runtime: Arc::new(Semaphore::new(config.script_runtime_permits)),
            worker_activity: Arc::new(Semaphore::new(config.worker_activity_permits)),
        }
    }

    pub fn config(&self) -> LimitsConfig {
        self.config
    }

    /// Waits for a script-runtime permit.
    pub async fn acquire_script(&self) -> Result<OwnedSemaphorePermit, AdmissionError> {
        self.script_runtime
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::PermitsClosed)
    }

    pub fn try_acquire_script(&self) -> Option<OwnedSemaphorePermit> {
        self.script_runtime.clone().try_acquire_owned().ok()
    }

    /// Takes every script permit, waiting until the script layer is quiescent.
    pub async fn exclusive(&self) -> Result<OwnedSemaphorePermit, AdmissionError> {
        let all = u32::try_from(self.config.script_runtime_permits).unwrap_or(u32::MAX);
        self.script_runtime
            .clone()
            .acquire_many_owned(all)
            .await
            .map_err(|_| AdmissionError::PermitsClosed)
    }

    /// Non-blocking: the dispatcher never waits for a worker permit.
    pub fn try_acquire_worker(&self) -> Option<OwnedSemaphorePermit> {
        self.worker_activity.clone().try_acquire_owned().ok()
    }

    pub fn available_script_permits(&self) -> usize {
        self.script_runtime.available_permits()
    }

    pub fn available_worker_permits(&self) -> usize {
        self.worker_activity.available_permits()
    }

    /// Fails every pending and future acquisition.
    pub fn close(&self) {
        self.script_runtime.close();
        self.worker_activity.close();
    }

    /// Names of exhausted pools; empty when healthy.
    pub fn health_check(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.config.script_runtime_permits > 0 && self.available_script_permits() == 0 {
            warn!("[admission] script runtime permits exhausted");
            problems.push(CONCURRENCY_RUNTIME.to_string());
        }
        if self.config.worker_activity_permits > 0 && self.available_worker_permits() == 0 {
            problems.push(CONCURRENCY_WORKERS.to_string());
        }
        problems
    }
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self::new(LimitsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limits(script: usize, workers: usize) -> ConcurrencyLimits {
        ConcurrencyLimits::new(LimitsConfig {
            script_runtime_permits: script,
            worker_activity_permits: workers,
        })
    }

    #[tokio::test]
    async fn test_script_permits_exhaust_and_report() {
        let limits = limits(1, 2);
        let permit = limits.acquire_script().await.unwrap();
        assert_eq!(limits.health_check(), vec![CONCURRENCY_RUNTIME.to_string()]);
        drop(permit);
        assert!(limits.health_check().is_empty());
    }

    #[test]
    fn test_worker_permits_are_non_blocking() {
        let limits = limits(1, 1);
        let held = limits.try_acquire_worker();
        assert!(held.is_some());
        assert!(limits.try_acquire_worker().is_none());
        assert_eq!(limits.health_check(), vec![CONCURRENCY_WORKERS.to_string()]);
        drop(held);
        assert_eq!(limits.available_worker_permits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exclusive_waits_for_quiescence() {
        let limits = Arc::new(limits(2, 1));
        let running = limits.acquire_script().await.unwrap();

        let l = limits.clone();
        let exclusive = tokio::spawn(async move { l.exclusive().await.map(|_| ()) });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!exclusive.is_finished());

        drop(running);
        exclusive.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_closed_limits_fail_acquire() {
        let limits = limits(1, 1);
        limits.close();
        assert!(matches!(
            limits.acquire_script().await,
            Err(AdmissionError::PermitsClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_script_permits_are_fifo() {
        let limits = Arc::new(limits(1, 1));
        let first = limits.acquire_script().await.unwrap();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..3 {
            let l = limits.clone();
            let o = order.clone();
            handles.push(tokio::spawn(async move {
                let _p = l.acquire_script().await.unwrap();
                o.lock().push(i);
            }));
            // Ensure arrival order.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        drop(first);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }
}
