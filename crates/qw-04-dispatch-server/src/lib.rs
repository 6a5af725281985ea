//! # Dispatch Server
//!
//! Both ends of a worker connection.
//!
//! ## Server Side
//!
//! [`DispatchServer`] listens on loopback (default port 1888), authenticates
//! each worker with an HMAC token, and serves one slot per connection using
//! the [`Dispatcher`](qw_03_dispatcher::Dispatcher).
//!
//! ## Worker Side
//!
//! [`WorkerProcess`] connects through a [`WorkerConnector`] (TCP for real
//! worker processes, an in-memory duplex for in-process workers), performs
//! operations from its [`OperationRegistry`](shared_types::OperationRegistry)
//! on a blocking thread marked as a worker, and asks to be recycled when its
//! memory use grows.
//!
//! ## Timeouts
//!
//! | Wait | Side | Default |
//! |------|------|---------|
//! | `Authenticate` after accept | server | 2 s |
//! | `AcknowledgeOperation` after `DoOperation` | server | 500 ms |
//! | `DoneOperation` after acknowledgement | server | 5 min |
//! | `AuthenticateAccepted` after `Authenticate` | worker | 1 s |
//! | Connect attempts | worker | 20 × 1 s |

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod codec;
pub mod connector;
pub mod errors;
pub mod memory;
pub mod server;
pub mod worker;

pub use codec::WireCodec;
pub use connector::{BoxedStream, DuplexConnector, TcpConnector, WorkerConnector, WorkerStream};
pub use errors::{CodecError, ServerError, WorkerError};
pub use memory::{ProcessMemoryProbe, RecyclePolicy, ResourceProbe};
pub use server::{default_listen_addr, DispatchServer, DEFAULT_PORT};
pub use worker::{WorkerConfig, WorkerExit, WorkerProcess};
