//! Dispatcher counters.

use shared_types::OutcomeKind;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifetime counters, updated without taking the dispatcher lock.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub lost: AtomicU64,
    pub timed_out: AtomicU64,
    /// Results that arrived after the operation had already timed out.
    pub stale_results: AtomicU64,
    /// Unacknowledged operations returned to the queue.
    pub requeued: AtomicU64,
    pub admission_rejections: AtomicU64,
}

/// Plain copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub lost: u64,
    pub timed_out: u64,
    pub stale_results: u64,
    pub requeued: u64,
    pub admission_rejections: u64,
}

impl DispatchStatsSnapshot {
    /// Operations that have reached a terminal outcome.
    pub fn terminal(&self) -> u64 {
        self.completed + self.failed + self.lost + self.timed_out
    }
}

impl DispatchStats {
    pub(crate) fn record(&self, kind: OutcomeKind) {
        let counter = match kind {
            OutcomeKind::Completed => &self.completed,
            OutcomeKind::Failed => &self.failed,
            OutcomeKind::Lost => &self.lost,
            OutcomeKind::TimedOut => &self.timed_out,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            stale_results: self.stale_results.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            admission_rejections: self.admission_rejections.load(Ordering::Relaxed),
        }
    }
}
