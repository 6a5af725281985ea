//! Dispatcher error types.

use crate::domain::slot::SlotState;
use shared_types::{OperationId, PolicyError, SlotNumber};
use thiserror::Error;

/// Errors from the slot-facing dispatcher API.
///
/// These indicate a protocol or bookkeeping violation by a connection; the
/// connection is expected to close when it sees one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Bad worker number {number}: only {workers} slots")]
    BadWorkerNumber { number: SlotNumber, workers: usize },

    #[error("Worker slot {slot} is already connected")]
    AlreadyConnected { slot: SlotNumber },

    #[error("Stale handle for slot {slot}: generation {generation}, current {current}")]
    StaleHandle {
        slot: SlotNumber,
        generation: u64,
        current: u64,
    },

    #[error("Slot {slot} is {state:?}, expected {expected}")]
    UnexpectedState {
        slot: SlotNumber,
        state: SlotState,
        expected: &'static str,
    },

    #[error("Slot {slot} is running {running:?}, not {reported}")]
    WrongOperation {
        slot: SlotNumber,
        running: Option<OperationId>,
        reported: OperationId,
    },

    #[error(transparent)]
    InvalidPolicy(#[from] PolicyError),
}
