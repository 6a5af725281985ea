//! Domain layer: slots, queue, and errors.

pub mod errors;
pub mod queue;
pub mod slot;

pub use errors::DispatchError;
pub use queue::QueueEntry;
pub use slot::{Assignment, SlotHandle, SlotSnapshot, SlotState};
