//! # QW-01 Admission Control
//!
//! Bounds how much work the process accepts at once.
//!
//! ```text
//!   request ──► ApplicationGate(app) ──► script permit ──► action
//!                 │ fair permits            │ fair permits
//!                 │ spin × wait while       │
//!                 │ another request for     │
//!                 │ the app is running      │
//!                 ▼                         ▼
//!          CONCURRENCY_APP_<id>     CONCURRENCY_RUNTIME     (health names)
//! ```
//!
//! The worker-activity pool is consumed by the dispatcher when it assigns an
//! operation to a slot; it is exposed here so every component shares one
//! [`ConcurrencyLimits`].

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod controller;
pub mod gate;
pub mod limits;

pub use controller::AdmissionController;
pub use gate::{ApplicationGate, ApplicationPass};
pub use limits::{ConcurrencyLimits, LimitsConfig};
