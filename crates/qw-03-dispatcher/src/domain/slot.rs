//! # Worker Slots
//!
//! ```text
//!            worker_authenticated        worker_ready
//!  STARTING ─────────────────────► AUTHENTICATED ─────────► IDLE ◄──────────┐
//!     ▲  ▲                               │                   │ next_work    │ finished_work
//!     │  │                               │ connection lost   ▼              │
//!     │  └──── finished_work(will_exit) ─┼──────────────── BUSY ────────────┘
//!     │                                  ▼                   │ connection lost /
//!     └── replacement authenticates ── FAILED ◄──────────────┘ return_work
//! ```
//!
//! Each (re)connection bumps the slot generation. A [`SlotHandle`] carries the
//! generation it was issued for, so an old connection can never act on its
//! replacement's slot.

use crate::domain::queue::QueueEntry;
use shared_types::{ApplicationId, OperationEnvelope, OperationId, SlotNumber};
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;

/// Lifecycle state of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Waiting for a worker process to connect.
    Starting,
    /// Connected and authenticated, not yet accepting work.
    Authenticated,
    Idle,
    Busy,
    /// Connection lost or worker failed; waiting for a replacement.
    Failed,
}

impl SlotState {
    /// Whether a live connection owns the slot.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Authenticated | Self::Idle | Self::Busy)
    }
}

/// Capability held by the connection that owns a slot generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    pub number: SlotNumber,
    pub generation: u64,
}

/// An operation handed to a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub operation_id: OperationId,
    pub application: ApplicationId,
    pub envelope: OperationEnvelope,
}

/// Point-in-time view of a slot, for health checks and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub number: SlotNumber,
    pub state: SlotState,
    pub generation: u64,
    pub operation: Option<OperationId>,
    pub application: Option<ApplicationId>,
    pub in_state_for: Duration,
}

pub(crate) struct Assigned {
    pub entry: QueueEntry,
    pub started_at: Instant,
    pub deadline: Instant,
    pub timed_out: bool,
    pub permit: Option<OwnedSemaphorePermit>,
}

pub(crate) struct WorkerSlot {
    pub number: SlotNumber,
    pub state: SlotState,
    pub generation: u64,
    pub current: Option<Assigned>,
    pub state_since: Instant,
}

impl WorkerSlot {
    pub fn new(number: SlotNumber) -> Self {
        Self {
            number,
            state: SlotState::Starting,
            generation: 0,
            current: None,
            state_since: Instant::now(),
        }
    }

    pub fn handle(&self) -> SlotHandle {
        SlotHandle {
            number: self.number,
            generation: self.generation,
        }
    }

    pub fn set_state(&mut self, state: SlotState) {
        self.state = state;
        self.state_since = Instant::now();
    }

    /// Moves to a new generation, invalidating every outstanding handle.
    pub fn invalidate(&mut self, state: SlotState) {
        self.generation += 1;
        self.set_state(state);
    }

    pub fn running(&self) -> Option<OperationId> {
        self.current.as_ref().map(|a| a.entry.operation_id)
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        SlotSnapshot {
            number: self.number,
            state: self.state,
            generation: self.generation,
            operation: self.running(),
            application: self.current.as_ref().map(|a| a.entry.application),
            in_state_for: self.state_since.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_states() {
        assert!(!SlotState::Starting.is_connected());
        assert!(SlotState::Authenticated.is_connected());
        assert!(SlotState::Busy.is_connected());
        assert!(!SlotState::Failed.is_connected());
    }

    #[tokio::test]
    async fn test_invalidate_bumps_generation() {
        let mut slot = WorkerSlot::new(3);
        let before = slot.handle();
        slot.invalidate(SlotState::Authenticated);
        assert_eq!(slot.handle().generation, before.generation + 1);
        assert_eq!(slot.snapshot().state, SlotState::Authenticated);
    }
}
