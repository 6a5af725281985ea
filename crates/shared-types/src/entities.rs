//! # Core Entities
//!
//! Identifiers, the request envelope that travels to a worker, and the
//! terminal [`Outcome`] of an operation.

use crate::errors::OperationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Index of a worker slot, `0..number_of_workers`.
pub type SlotNumber = usize;

/// Tenant tag used for per-application accounting.
///
/// Not an isolation boundary: operations from different applications share
/// the same worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId(pub i64);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app-{}", self.0)
    }
}

/// Dispatcher-assigned operation identifier, monotonic per dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// A serialized operation request.
///
/// Immutable once submitted; the `kind` selects the handler registered in the
/// worker's [`OperationRegistry`](crate::OperationRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationEnvelope {
    pub kind: String,
    pub request: Vec<u8>,
}

impl OperationEnvelope {
    pub fn new(kind: impl Into<String>, request: Vec<u8>) -> Self {
        Self {
            kind: kind.into(),
            request,
        }
    }
}

/// The single terminal state of a submitted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The worker returned a result payload.
    Completed(Vec<u8>),
    /// The operation's own logic failed; the worker's error is preserved.
    Failed(OperationError),
    /// The worker connection dropped while the operation was assigned to it.
    Lost { slot: SlotNumber },
    /// The dispatcher-side deadline passed before a result arrived.
    TimedOut { after: Duration },
}

/// Discriminant of an [`Outcome`], used for metrics labels and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Completed,
    Failed,
    Lost,
    TimedOut,
}

impl OutcomeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Lost => "lost",
            Self::TimedOut => "timed_out",
        }
    }
}

impl Outcome {
    #[must_use]
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Completed(_) => OutcomeKind::Completed,
            Self::Failed(_) => OutcomeKind::Failed,
            Self::Lost { .. } => OutcomeKind::Lost,
            Self::TimedOut { .. } => OutcomeKind::TimedOut,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Builds the outcome for a worker's reply.
    #[must_use]
    pub fn from_result(result: Result<Vec<u8>, OperationError>) -> Self {
        match result {
            Ok(bytes) => Self::Completed(bytes),
            Err(error) => Self::Failed(error),
        }
    }
}
