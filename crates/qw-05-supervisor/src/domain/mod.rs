//! Domain layer: supervisor errors and restart bookkeeping.

pub mod errors;
pub mod restarts;

pub use errors::SupervisorError;
pub use restarts::{RestartLedger, RestartReason, SlotRestarts};
