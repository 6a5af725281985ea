//! # Operation Contract
//!
//! An [`Operation`] is a serializable unit of work with a single `perform`
//! entry point. Operations are normally shipped to a worker process; some can
//! also run inline, but those that need process isolation (native libraries,
//! unbounded memory) refuse unless the current thread is a genuine worker.
//!
//! ```text
//! caller ──encode_request──► OperationEnvelope ──► worker registry ──► perform()
//!    ▲                                                                    │
//!    └──────────decode_output◄──── result bytes ◄─────────────────────────┘
//! ```

use crate::entities::{OperationEnvelope, SlotNumber};
use crate::errors::OperationError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::Cell;
use std::fmt::Display;
use tracing::info;

/// Log target for best-effort failures that are deliberately swallowed.
pub const IGNORED_LOG_TARGET: &str = "ops::ignored";

/// A pluggable unit of work.
pub trait Operation: Serialize + DeserializeOwned + Send + 'static {
    /// Registry key; must be unique among operations a worker registers.
    const KIND: &'static str;

    type Output: Serialize + DeserializeOwned + Send + 'static;

    fn perform(self, ctx: &OperationContext) -> Result<Self::Output, OperationError>;

    /// Whether this operation must never run outside a worker.
    fn requires_isolation() -> bool {
        false
    }
}

/// Execution context handed to [`Operation::perform`].
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    worker_number: Option<SlotNumber>,
}

impl OperationContext {
    /// Context for an operation running in worker `number`.
    #[must_use]
    pub fn for_worker(number: SlotNumber) -> Self {
        Self {
            worker_number: Some(number),
        }
    }

    /// Context for an inline (non-worker) run.
    #[must_use]
    pub fn inline() -> Self {
        Self::default()
    }

    pub fn worker_number(&self) -> Option<SlotNumber> {
        self.worker_number
    }

    /// Records a failure of an optional sub-step without failing the operation.
    pub fn log_ignored(&self, reason: &str, error: &dyn Display) {
        info!(
            target: IGNORED_LOG_TARGET,
            worker = ?self.worker_number,
            reason,
            error = %error,
            "Ignored operation error"
        );
    }
}

// =============================================================================
// WORKER THREAD FLAG
// =============================================================================

thread_local! {
    static IN_WORKER_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as a worker thread.
pub fn mark_thread_as_worker() {
    IN_WORKER_THREAD.with(|flag| flag.set(true));
}

pub fn unmark_thread_as_worker() {
    IN_WORKER_THREAD.with(|flag| flag.set(false));
}

#[must_use]
pub fn is_thread_marked_as_worker() -> bool {
    IN_WORKER_THREAD.with(Cell::get)
}

/// Marks the current thread as a worker until dropped, restoring the prior state.
#[must_use = "the thread is unmarked when the guard is dropped"]
pub struct WorkerThreadMark {
    previous: bool,
}

impl WorkerThreadMark {
    pub fn enter() -> Self {
        let previous = is_thread_marked_as_worker();
        mark_thread_as_worker();
        Self { previous }
    }
}

impl Drop for WorkerThreadMark {
    fn drop(&mut self) {
        IN_WORKER_THREAD.with(|flag| flag.set(self.previous));
    }
}

// =============================================================================
// ENCODING
// =============================================================================

/// Serializes an operation into an envelope for submission.
pub fn encode_request<O: Operation>(operation: &O) -> Result<OperationEnvelope, OperationError> {
    let request = bincode::serialize(operation).map_err(|e| OperationError::InvalidRequest {
        kind: O::KIND.to_string(),
        message: e.to_string(),
    })?;
    Ok(OperationEnvelope::new(O::KIND, request))
}

/// Decodes a worker's result bytes into the operation's output type.
pub fn decode_output<O: Operation>(bytes: &[u8]) -> Result<O::Output, OperationError> {
    bincode::deserialize(bytes).map_err(|e| OperationError::InvalidResult {
        kind: O::KIND.to_string(),
        message: e.to_string(),
    })
}

/// Runs an operation in the current thread.
///
/// Returns [`OperationError::RequiresIsolation`] when the operation needs a
/// worker process and this thread is not one.
pub fn perform_locally<O: Operation>(operation: O) -> Result<O::Output, OperationError> {
    if O::requires_isolation() && !is_thread_marked_as_worker() {
        return Err(OperationError::RequiresIsolation {
            kind: O::KIND.to_string(),
        });
    }
    operation.perform(&OperationContext::inline())
}
