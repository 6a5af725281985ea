//! Coalescing of identical in-flight work.
//!
//! Callers asking for the same `(application, key)` while an operation for it
//! is still running join that operation's target instead of submitting a
//! second one. Completed entries are pruned lazily.

use crate::errors::NotifyError;
use crate::waiting::WaitingNotifyTarget;
use parking_lot::Mutex;
use shared_types::ApplicationId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Target to wait on, and whether this caller started the operation.
#[derive(Debug, Clone)]
pub struct Joined {
    pub target: Arc<WaitingNotifyTarget>,
    pub started: bool,
}

/// In-flight targets keyed by application and work key.
#[derive(Debug)]
pub struct InFlightRegistry {
    entries: Mutex<HashMap<(ApplicationId, String), Arc<WaitingNotifyTarget>>>,
    max_entries: usize,
    stagger: Duration,
}

impl InFlightRegistry {
    pub const MAX_IN_FLIGHT: usize = 64;

    pub fn new() -> Self {
        Self::with_stagger(WaitingNotifyTarget::DEFAULT_STAGGER)
    }

    pub fn with_stagger(stagger: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: Self::MAX_IN_FLIGHT,
            stagger,
        }
    }

    /// Joins the in-flight target for `(app, key)`, or creates one and calls
    /// `start` with it. `start` runs under the registry lock, so at most one
    /// caller starts a given piece of work; it must not block.
    ///
    /// If `start` fails the entry is discarded and the error returned.
    pub fn join_or_start<F, E>(&self, app: ApplicationId, key: &str, start: F) -> Result<Joined, E>
    where
        F: FnOnce(Arc<WaitingNotifyTarget>) -> Result<(), E>,
        E: From<NotifyError>,
    {
        let mut entries = self.entries.lock();
        entries.retain(|_, target| !target.is_complete());

        let entry_key = (app, key.to_string());
        if let Some(target) = entries.get(&entry_key) {
            debug!(application = %app, key, "[coalesce] joining in-flight operation");
            return Ok(Joined {
                target: Arc::clone(target),
                started: false,
            });
        }

        if entries.len() >= self.max_entries {
            return Err(NotifyError::TooManyInFlight {
                limit: self.max_entries,
            }
            .into());
        }

        let target = Arc::new(WaitingNotifyTarget::with_stagger(self.stagger));
        start(Arc::clone(&target))?;
        entries.insert(entry_key, Arc::clone(&target));
        Ok(Joined {
            target,
            started: true,
        })
    }

    /// Number of tracked entries, including completed ones not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every completed entry.
    pub fn prune(&self) {
        self.entries.lock().retain(|_, target| !target.is_complete());
    }
}

impl Default for InFlightRegistry {
    fn default() -> Self {
        Self::new()
    }
}
