//! # Operation Registry
//!
//! Worker-side table from operation kind to a type-erased handler. The
//! registry decodes the request, runs [`Operation::perform`] and encodes the
//! output, so the worker loop only ever handles bytes.

use crate::entities::OperationEnvelope;
use crate::errors::OperationError;
use crate::operation::{Operation, OperationContext};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

type Handler =
    Arc<dyn Fn(&[u8], &OperationContext) -> Result<Vec<u8>, OperationError> + Send + Sync>;

/// Kind → handler table.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    handlers: HashMap<&'static str, Handler>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `O`. A later registration of the same kind replaces the earlier one.
    pub fn register<O: Operation>(&mut self) -> &mut Self {
        let handler: Handler = Arc::new(|request: &[u8], ctx: &OperationContext| {
            let operation: O =
                bincode::deserialize(request).map_err(|e| OperationError::InvalidRequest {
                    kind: O::KIND.to_string(),
                    message: e.to_string(),
                })?;
            let output = operation.perform(ctx)?;
            bincode::serialize(&output).map_err(|e| OperationError::InvalidResult {
                kind: O::KIND.to_string(),
                message: e.to_string(),
            })
        });
        self.handlers.insert(O::KIND, handler);
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Performs the operation in `envelope`, catching panics from the handler.
    pub fn perform(
        &self,
        envelope: &OperationEnvelope,
        ctx: &OperationContext,
    ) -> Result<Vec<u8>, OperationError> {
        let handler = self
            .handlers
            .get(envelope.kind.as_str())
            .ok_or_else(|| OperationError::UnknownKind {
                kind: envelope.kind.clone(),
            })?;

        match catch_unwind(AssertUnwindSafe(|| handler(&envelope.request, ctx))) {
            Ok(result) => result,
            Err(panic) => Err(OperationError::Panicked {
                kind: envelope.kind.clone(),
                message: panic_message(panic.as_ref()),
            }),
        }
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
