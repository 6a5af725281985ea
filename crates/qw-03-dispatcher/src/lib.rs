//! # Dispatcher
//!
//! Owns the pending-operation queue and the worker-slot table, and delivers
//! exactly one terminal [`Outcome`](shared_types::Outcome) per submitted
//! operation.
//!
//! ## Slot Lifecycle
//!
//! ```text
//! [STARTING] ──auth──→ [AUTHENTICATED] ──ready──→ [IDLE] ⇄ [BUSY]
//!      ▲                      │                     │        │
//!      │ will_exit            └──── disconnect ─────┴────────┴──→ [FAILED]
//!      └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! | Event | Method | Effect |
//! |-------|--------|--------|
//! | Submit | `submit()` | Append to queue, wake lowest idle slot |
//! | Assign | `next_work()` | First queued entry under the per-application cap |
//! | Complete | `finished_work()` | Deliver outcome, slot back to IDLE |
//! | No acknowledgement | `return_work()` | Entry back to queue head, slot FAILED |
//! | Disconnect | `connection_closed()` | `Lost` if BUSY, supervisor told once |
//! | Deadline | `expire_overdue()` | `TimedOut` delivered, late result discarded |
//!
//! ## Guarantees
//!
//! - A slot never holds two assignments.
//! - Outcomes and supervisor calls are issued after the state lock is released.
//! - Every connection (re)authentication bumps the slot generation, so a stale
//!   connection cannot act on its replacement's slot.
//!
//! ## Outbound Dependencies
//!
//! | Port | Purpose |
//! |------|---------|
//! | `WorkerSupervisor` | Start workers, replace failed or recycling ones |
//! | `NotifyTarget` | Per-operation completion hook |

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod domain;
pub mod ports;
pub mod queuer;
pub mod service;
pub mod stats;

pub use domain::{Assignment, DispatchError, QueueEntry, SlotHandle, SlotSnapshot, SlotState};
pub use ports::WorkerSupervisor;
pub use queuer::{DefaultQueuer, FixedApplication, HostContext, PerformError, Queuer};
pub use service::Dispatcher;
pub use stats::{DispatchStats, DispatchStatsSnapshot};
