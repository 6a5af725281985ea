//! Ports layer: interfaces the dispatcher depends on.

pub mod outbound;

pub use outbound::WorkerSupervisor;
