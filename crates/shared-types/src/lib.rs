//! # Shared Types Crate
//!
//! Types shared by every component of the worker dispatch system:
//!
//! - [`Operation`]: the pluggable unit of work and its thread-local worker flag
//! - [`OperationRegistry`]: kind → handler table used inside worker processes
//! - [`Policy`]: immutable startup configuration for the dispatcher
//! - [`Outcome`]: the single terminal result delivered for every operation
//! - [`WireMessage`]: the five-message protocol between server and worker
//! - [`WorkerTokenIssuer`]: HMAC tokens proving a worker was started by us
//!
//! ## Design Principles
//!
//! - **Opaque payloads**: requests and results cross the process boundary as
//!   bincode bytes; only the worker-side registry knows their concrete types.
//! - **Errors survive the boundary**: [`OperationError`] is serializable so the
//!   caller sees the worker's own failure, not a transport wrapper.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod entities;
pub mod errors;
pub mod ipc;
pub mod operation;
pub mod policy;
pub mod registry;
pub mod security;

pub use entities::*;
pub use errors::*;
pub use ipc::*;
pub use operation::*;
pub use policy::*;
pub use registry::OperationRegistry;
pub use security::*;
