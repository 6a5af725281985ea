//! # Error Types
//!
//! Errors shared across components. [`OperationError`] crosses the process
//! boundary and is therefore serializable and cloneable; the others stay on
//! the dispatcher side.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure of an operation, as reported by the worker that ran it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum OperationError {
    /// The operation's own logic failed.
    #[error("Operation failed: {message}")]
    Failed { message: String },

    /// No handler is registered for this kind in the worker.
    #[error("Unknown operation kind: {kind}")]
    UnknownKind { kind: String },

    /// The request bytes could not be decoded.
    #[error("Invalid request for {kind}: {message}")]
    InvalidRequest { kind: String, message: String },

    /// The result bytes could not be encoded or decoded.
    #[error("Invalid result for {kind}: {message}")]
    InvalidResult { kind: String, message: String },

    /// Refused to run inline on a thread that is not a worker.
    #[error("Operation {kind} requires a worker process")]
    RequiresIsolation { kind: String },

    /// The handler panicked while performing.
    #[error("Operation {kind} panicked: {message}")]
    Panicked { kind: String, message: String },

    /// The dispatcher shut down while the operation was still queued.
    #[error("Dispatcher shut down before the operation was dispatched")]
    DispatcherShutdown,
}

impl OperationError {
    /// Shorthand for [`OperationError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Rejection of a non-blocking submit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("Queue length exceeded: {capacity} operations already queued")]
    QueueFull { capacity: usize },

    #[error("Dispatcher is shut down")]
    ShutDown,
}

/// Admission failed: no worker became available within the spin/wait budget.
///
/// Deliberately separate from [`OperationError`]: the operation never ran, and
/// the caller is expected to fall back (e.g. run it in-process).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("No worker available after {spins} spins ({waited:?})")]
    NoWorkerAvailable { spins: u32, waited: Duration },

    #[error("Concurrency permits closed")]
    PermitsClosed,

    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// Invalid [`Policy`](crate::Policy) values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("Invalid policy: {field} {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Worker token problems.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Invalid token secret: {0}")]
    InvalidSecret(String),
}
