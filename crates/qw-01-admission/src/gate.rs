//! Per-application single-flight gate.
//!
//! Entering takes a fair permit, then waits a bounded number of spins for any
//! other request of the same application to finish. When the budget runs out
//! the caller proceeds anyway; the gate smooths bursts, it never deadlocks.

use shared_types::{AdmissionError, SpinBudget};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Gate for one application.
#[derive(Debug)]
pub struct ApplicationGate {
    permits: Arc<Semaphore>,
    capacity: usize,
    in_progress: AtomicUsize,
    finished: Notify,
}

impl ApplicationGate {
    /// Concurrent requests allowed per application.
    pub const DEFAULT_PERMITS: usize = 8;

    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_progress: AtomicUsize::new(0),
            finished: Notify::new(),
        }
    }

    /// Number of requests currently inside the gate.
    pub fn in_progress(&self) -> usize {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn is_exhausted(&self) -> bool {
        self.capacity > 0 && self.permits.available_permits() == 0
    }

    /// Enters the gate, waiting at most `budget` for a running request to finish.
    pub async fn enter(self: &Arc<Self>, budget: SpinBudget) -> Result<ApplicationPass, AdmissionError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::PermitsClosed)?;

        let mut spins = 0;
        while spins < budget.spins {
            let notified = self.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_progress() == 0 {
                break;
            }
            let _ = tokio::time::timeout(budget.wait, notified).await;
            spins += 1;
        }
        if spins == budget.spins && self.in_progress() > 0 {
            debug!(spins, "[admission] spin budget spent, proceeding alongside running request");
        }

        self.in_progress.fetch_add(1, Ordering::AcqRel);
        Ok(ApplicationPass {
            gate: Arc::clone(self),
            spins,
            _permit: permit,
        })
    }
}

/// Proof of entry; leaving the gate happens on drop.
#[derive(Debug)]
pub struct ApplicationPass {
    gate: Arc<ApplicationGate>,
    spins: u32,
    _permit: OwnedSemaphorePermit,
}

impl ApplicationPass {
    /// Spins spent waiting before entry.
    pub fn spins(&self) -> u32 {
        self.spins
    }
}

impl Drop for ApplicationPass {
    fn drop(&mut self) {
        self.gate.in_progress.fetch_sub(1, Ordering::AcqRel);
        self.gate.finished.notify_waiters();
    }
}
