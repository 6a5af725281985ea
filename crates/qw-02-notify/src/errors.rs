use thiserror::Error;

/// Limits on waiter fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("Too many requests waiting on one operation (limit {limit})")]
    TooManyWaiters { limit: usize },

    #[error("Too many coalesced operations in flight (limit {limit})")]
    TooManyInFlight { limit: usize },
}
