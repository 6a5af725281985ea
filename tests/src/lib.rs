//! # Quarantine-Workers Test Suite
//!
//! Cross-crate flows that need more than one crate wired together.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/integration/
//! │   ├── harness.rs            # Shared operations, supervisors, worker spawning
//! │   ├── protocol_flows.rs     # Full protocol over in-memory duplex connections
//! │   ├── tcp_flows.rs          # Real loopback TCP, dropped workers, bad tokens
//! │   ├── supervision_flows.rs  # Recycling and replacement through a supervisor
//! │   └── runtime_flows.rs      # OperationRuntime end to end
//! └── benches/
//!     └── dispatch_benchmarks.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p qw-tests
//! cargo test -p qw-tests integration::tcp_flows::
//! cargo bench -p qw-tests
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod integration;
