//! Diagnostic operations shipped with every worker.
//!
//! Embedding applications register their own operations next to these when
//! they build a worker binary.

use serde::{Deserialize, Serialize};
use shared_types::{Operation, OperationContext, OperationError, OperationRegistry, SlotNumber};
use std::time::Duration;

/// Round trip through a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub payload: String,
    /// Slot that answered; `None` when performed inline.
    pub worker: Option<SlotNumber>,
}

impl Operation for Ping {
    const KIND: &'static str = "qw.ping";
    type Output = Pong;

    fn perform(self, ctx: &OperationContext) -> Result<Pong, OperationError> {
        Ok(Pong {
            payload: self.payload,
            worker: ctx.worker_number(),
        })
    }
}

/// Holds a worker busy. Used to exercise timeouts and admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sleep {
    pub millis: u64,
}

impl Operation for Sleep {
    const KIND: &'static str = "qw.sleep";
    type Output = ();

    fn perform(self, _ctx: &OperationContext) -> Result<(), OperationError> {
        std::thread::sleep(Duration::from_millis(self.millis));
        Ok(())
    }

    fn requires_isolation() -> bool {
        true
    }
}

/// Always fails with `message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fail {
    pub message: String,
}

impl Operation for Fail {
    const KIND: &'static str = "qw.fail";
    type Output = ();

    fn perform(self, _ctx: &OperationContext) -> Result<(), OperationError> {
        Err(OperationError::failed(self.message))
    }
}

/// Registry holding the diagnostic operations.
pub fn builtin_registry() -> OperationRegistry {
    let mut registry = OperationRegistry::new();
    registry
        .register::<Ping>()
        .register::<Sleep>()
        .register::<Fail>();
    registry
}
