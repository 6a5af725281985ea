//! # Dispatch Policy
//!
//! Immutable startup configuration. Defaults mirror the values the system has
//! always run with in production.

use crate::errors::PolicyError;
use std::time::Duration;

/// Bounded retry loop: `spins` attempts, each waiting at most `wait`.
///
/// Used wherever a caller may wait for a scarce resource but must fall back
/// instead of blocking indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinBudget {
    pub spins: u32,
    pub wait: Duration,
}

impl SpinBudget {
    pub const fn new(spins: u32, wait: Duration) -> Self {
        Self { spins, wait }
    }

    /// Total time the budget may spend waiting.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.wait * self.spins
    }
}

impl Default for SpinBudget {
    fn default() -> Self {
        Self::new(4, Duration::from_millis(5))
    }
}

/// Dispatcher policy, fixed for the lifetime of a runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Number of worker slots (and worker processes).
    pub number_of_workers: usize,
    /// Maximum operations in flight at once for a single application.
    pub max_ops_per_application: usize,
    /// Maximum queued operations before `submit` fails fast.
    pub max_queue_length: usize,
    /// Budget for `submit_with_admission`.
    pub admission: SpinBudget,
    /// Dispatcher-side deadline, measured from assignment.
    pub operation_timeout: Duration,
    /// How long a worker has to acknowledge a `DoOperation`.
    pub acknowledge_timeout: Duration,
    /// How long a fresh connection has to send `Authenticate`.
    pub authenticate_timeout: Duration,
    /// Time after which a worker with no `DoneOperation` is considered wedged.
    pub wedged_worker_timeout: Duration,
    /// How long a slot may sit FAILED before the health check reports it.
    pub failed_slot_grace: Duration,
    /// Interval of the timeout monitor.
    pub timeout_check_interval: Duration,
}

impl Policy {
    pub const DEFAULT_WORKERS: usize = 4;
    pub const MAX_OPS_PER_APPLICATION: usize = 2;
    pub const MAX_QUEUE_LENGTH: usize = 512;

    /// Policy with `n` workers and default everything else.
    #[must_use]
    pub fn with_workers(n: usize) -> Self {
        Self {
            number_of_workers: n,
            ..Self::default()
        }
    }

    /// Rejects policies the dispatcher cannot honour.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.number_of_workers == 0 {
            return Err(PolicyError::Invalid {
                field: "number_of_workers",
                reason: "must be at least 1",
            });
        }
        if self.max_ops_per_application == 0 {
            return Err(PolicyError::Invalid {
                field: "max_ops_per_application",
                reason: "must be at least 1",
            });
        }
        if self.max_queue_length == 0 {
            return Err(PolicyError::Invalid {
                field: "max_queue_length",
                reason: "must be at least 1",
            });
        }
        if self.operation_timeout.is_zero() || self.acknowledge_timeout.is_zero() {
            return Err(PolicyError::Invalid {
                field: "operation_timeout",
                reason: "timeouts must be non-zero",
            });
        }
        if self.wedged_worker_timeout < self.operation_timeout {
            return Err(PolicyError::Invalid {
                field: "wedged_worker_timeout",
                reason: "must not be shorter than operation_timeout",
            });
        }
        Ok(())
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            number_of_workers: Self::DEFAULT_WORKERS,
            max_ops_per_application: Self::MAX_OPS_PER_APPLICATION,
            max_queue_length: Self::MAX_QUEUE_LENGTH,
            admission: SpinBudget::default(),
            operation_timeout: Duration::from_secs(60),
            acknowledge_timeout: Duration::from_millis(500),
            authenticate_timeout: Duration::from_secs(2),
            wedged_worker_timeout: Duration::from_secs(300),
            failed_slot_grace: Duration::from_secs(30),
            timeout_check_interval: Duration::from_millis(250),
        }
    }
}
