//! FIFO pending queue with per-application eligibility.

use qw_02_notify::NotifyTarget;
use shared_types::{ApplicationId, OperationEnvelope, OperationId, SubmitError};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::Instant;

/// A queued operation awaiting a free slot.
pub struct QueueEntry {
    pub operation_id: OperationId,
    pub application: ApplicationId,
    pub envelope: OperationEnvelope,
    pub target: Arc<dyn NotifyTarget>,
    pub queued_at: Instant,
}

impl std::fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEntry")
            .field("operation_id", &self.operation_id)
            .field("application", &self.application)
            .field("kind", &self.envelope.kind)
            .finish()
    }
}

pub(crate) struct PendingQueue {
    entries: VecDeque<QueueEntry>,
    capacity: usize,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(16)),
            capacity,
        }
    }

    /// Appends a new submission, refusing once the queue is at capacity.
    pub fn push_back(&mut self, entry: QueueEntry) -> Result<(), SubmitError> {
        if self.entries.len() >= self.capacity {
            return Err(SubmitError::QueueFull {
                capacity: self.capacity,
            });
        }
        self.entries.push_back(entry);
        Ok(())
    }

    /// Returns work that was never started to the head of the queue.
    /// Capacity is not checked: the entry was already admitted once.
    pub fn push_front(&mut self, entry: QueueEntry) {
        self.entries.push_front(entry);
    }

    /// Removes the first entry whose application passes `eligible`.
    pub fn take_first_eligible(
        &mut self,
        mut eligible: impl FnMut(ApplicationId) -> bool,
    ) -> Option<QueueEntry> {
        let index = self
            .entries
            .iter()
            .position(|entry| eligible(entry.application))?;
        self.entries.remove(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn drain(&mut self) -> Vec<QueueEntry> {
        self.entries.drain(..).collect()
    }
}
