//! The host-callback abstraction the dispatcher depends on.

use shared_types::Outcome;
use std::fmt;

/// Receives the terminal outcome of one operation.
///
/// Called exactly once per submitted operation, from a dispatcher task and
/// never while dispatcher state is locked. Implementations must not block.
pub trait NotifyTarget: Send + Sync {
    fn notify(&self, outcome: Outcome);
}

/// [`NotifyTarget`] backed by a closure.
pub struct CallbackNotifyTarget<F> {
    callback: F,
}

impl<F> CallbackNotifyTarget<F>
where
    F: Fn(Outcome) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> NotifyTarget for CallbackNotifyTarget<F>
where
    F: Fn(Outcome) + Send + Sync,
{
    fn notify(&self, outcome: Outcome) {
        (self.callback)(outcome);
    }
}

impl<F> fmt::Debug for CallbackNotifyTarget<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CallbackNotifyTarget")
    }
}
