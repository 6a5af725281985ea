//! # IPC Wire Messages
//!
//! The five messages exchanged on a worker connection, strictly ordered per
//! slot:
//!
//! ```text
//!  Worker                                   DispatchServer
//!    │ ── Authenticate{worker_number, token} ──►  │
//!    │ ◄── AuthenticateAccepted{accepted} ─────── │   (false ⇒ connection closed)
//!    │ ◄── DoOperation{operation_id, envelope} ── │   (slot IDLE → BUSY)
//!    │ ── AcknowledgeOperation{ok} ───────────►   │
//!    │ ── DoneOperation{result, will_exit} ───►   │   (slot BUSY → IDLE / STARTING)
//! ```
//!
//! Every message travels inside a versioned [`Frame`].

use crate::entities::{OperationEnvelope, OperationId, SlotNumber};
use crate::errors::OperationError;
use serde::{Deserialize, Serialize};

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Largest frame either side will accept (4 MiB).
pub const MAX_FRAME_LENGTH: usize = 4 * 1024 * 1024;

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    Authenticate {
        worker_number: SlotNumber,
        token: String,
    },
    AuthenticateAccepted {
        accepted: bool,
    },
    DoOperation {
        operation_id: OperationId,
        envelope: OperationEnvelope,
    },
    AcknowledgeOperation {
        ok: bool,
    },
    DoneOperation {
        operation_id: OperationId,
        result: Result<Vec<u8>, OperationError>,
        will_exit: bool,
    },
}

impl WireMessage {
    /// Short name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "Authenticate",
            Self::AuthenticateAccepted { .. } => "AuthenticateAccepted",
            Self::DoOperation { .. } => "DoOperation",
            Self::AcknowledgeOperation { .. } => "AcknowledgeOperation",
            Self::DoneOperation { .. } => "DoneOperation",
        }
    }
}

/// Versioned wrapper around a [`WireMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub version: u16,
    pub message: WireMessage,
}

impl Frame {
    pub fn new(message: WireMessage) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message,
        }
    }
}
