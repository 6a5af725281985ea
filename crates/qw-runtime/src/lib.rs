//! # QW Runtime
//!
//! Wires the workspace crates into one [`OperationRuntime`] and provides the
//! configuration both executables share.
//!
//! ## Components
//!
//! | Component | Crate | Role |
//! |-----------|-------|------|
//! | Admission | `qw-01-admission` | Permit pools and per-application gates |
//! | Notify | `qw-02-notify` | Outcome delivery and waiter coalescing |
//! | Dispatcher | `qw-03-dispatcher` | Queue, slot table, timeouts |
//! | Dispatch server | `qw-04-dispatch-server` | Worker protocol, both ends |
//! | Supervisor | `qw-05-supervisor` | Starting and replacing workers |
//!
//! ## Usage
//!
//! ```rust,ignore
//! let config = RuntimeConfig::from_env()?;
//! let runtime = OperationRuntime::start(config, builtin_registry(), host).await?;
//! let pong = runtime.queuer().perform(&Ping { payload: "hi".into() }).await?;
//! runtime.shutdown().await;
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod context;
pub mod ops;

pub use config::{ConfigError, RuntimeConfig, SupervisionMode};
pub use context::{HealthReport, OperationRuntime, RuntimeError, WORKER_FAILED_PREFIX};
pub use ops::{builtin_registry, Fail, Ping, Pong, Sleep};
