//! Per-slot restart counters.

use parking_lot::Mutex;
use shared_types::SlotNumber;

/// Why a slot's worker was replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestartReason {
    Failed,
    Recycled,
}

impl RestartReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Recycled => "recycled",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SlotRestarts {
    pub failed: u64,
    pub recycled: u64,
}

impl SlotRestarts {
    pub fn total(&self) -> u64 {
        self.failed + self.recycled
    }
}

/// Restart counts for every slot, grown on demand.
#[derive(Debug, Default)]
pub struct RestartLedger {
    slots: Mutex<Vec<SlotRestarts>>,
}

impl RestartLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a restart and returns the slot's new total.
    pub fn record(&self, slot: SlotNumber, reason: RestartReason) -> u64 {
        let mut slots = self.slots.lock();
        if slots.len() <= slot {
            slots.resize(slot + 1, SlotRestarts::default());
        }
        let entry = &mut slots[slot];
        match reason {
            RestartReason::Failed => entry.failed += 1,
            RestartReason::Recycled => entry.recycled += 1,
        }
        entry.total()
    }

    pub fn for_slot(&self, slot: SlotNumber) -> SlotRestarts {
        self.slots.lock().get(slot).copied().unwrap_or_default()
    }

    pub fn snapshot(&self) -> Vec<SlotRestarts> {
        self.slots.lock().clone()
    }
}
