//! # Worker Supervisor
//!
//! Implementations of the dispatcher's
//! [`WorkerSupervisor`](qw_03_dispatcher::WorkerSupervisor) port.
//!
//! | Strategy | Workers are | Replacement |
//! |----------|-------------|-------------|
//! | [`ExternalProcessSupervisor`] | processes owned by a [`ProcessManager`] | targeted `restart` of one program |
//! | [`InProcessSupervisor`] | tokio tasks in this process | abort the task, spawn a new one |
//!
//! Supervisors react only to explicit signals from the dispatcher (dropped
//! connection, missing acknowledgement, `will_exit`); they never poll worker
//! health themselves.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod domain;
pub mod in_process;
pub mod ports;
pub mod production;

pub use adapters::{SupervisorctlManager, DEFAULT_GROUP};
pub use domain::{RestartLedger, RestartReason, SlotRestarts, SupervisorError};
pub use in_process::{disabled_by_environment, InProcessSupervisor, DISABLE_IN_PROCESS_WORKERS};
pub use ports::ProcessManager;
pub use production::ExternalProcessSupervisor;
