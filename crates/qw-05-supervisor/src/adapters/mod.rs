//! Adapters for outbound ports.

pub mod supervisorctl;

pub use supervisorctl::{SupervisorctlManager, DEFAULT_GROUP};
