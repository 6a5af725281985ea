//! Error types for both ends of a worker connection.

use qw_03_dispatcher::DispatchError;
use shared_types::{OperationId, SlotNumber};
use std::time::Duration;
use thiserror::Error;

/// Framing or decoding failure.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed frame: {0}")]
    Malformed(#[from] bincode::Error),

    #[error("Unsupported protocol version {found}, expected {expected}")]
    UnsupportedVersion { found: u16, expected: u16 },
}

/// Why the server ended a worker connection.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Worker did not authenticate within {0:?}")]
    AuthenticationTimeout(Duration),

    #[error("Worker {worker_number} rejected: {reason}")]
    Rejected {
        worker_number: SlotNumber,
        reason: String,
    },

    #[error("Connection closed by worker")]
    ConnectionClosed,

    #[error("Expected {expected}, received {received}")]
    UnexpectedMessage {
        expected: &'static str,
        received: &'static str,
    },

    #[error("Worker {slot} did not acknowledge {operation_id}")]
    NotAcknowledged {
        slot: SlotNumber,
        operation_id: OperationId,
    },

    #[error("Worker {slot} wedged: no reply after {after:?}")]
    Wedged { slot: SlotNumber, after: Duration },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Why a worker process stopped with an error.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Could not connect to dispatch server after {attempts} attempts: {source}")]
    Connect {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Authentication rejected for worker {worker_number}")]
    Rejected { worker_number: SlotNumber },

    #[error("No authentication reply within {0:?}")]
    AuthenticationTimeout(Duration),

    #[error("Connection closed by server during {0}")]
    ConnectionClosed(&'static str),

    #[error("Expected {expected}, received {received}")]
    UnexpectedMessage {
        expected: &'static str,
        received: &'static str,
    },
}

impl WorkerError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Rejected { .. } => 2,
            _ => 1,
        }
    }
}
