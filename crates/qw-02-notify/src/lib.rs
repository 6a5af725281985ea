//! # QW-02 Completion Notification
//!
//! Every submitted operation carries a [`NotifyTarget`]; the dispatcher calls
//! it exactly once with the operation's terminal [`Outcome`](shared_types::Outcome).
//!
//! - [`WaitingNotifyTarget`]: many callers suspended on one operation, released
//!   together (staggered) when it completes.
//! - [`InFlightRegistry`]: finds the target for identical work already in
//!   flight so it runs once.
//! - [`CallbackNotifyTarget`]: adapts a closure for fire-and-forget callers.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod coalesce;
pub mod errors;
pub mod target;
pub mod waiting;

pub use coalesce::{InFlightRegistry, Joined};
pub use errors::NotifyError;
pub use target::{CallbackNotifyTarget, NotifyTarget};
pub use waiting::{WaiterId, WaitingNotifyTarget};
