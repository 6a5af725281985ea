//! # Waiter Fan-out
//!
//! A [`WaitingNotifyTarget`] lets any number of callers suspend on one
//! in-flight operation. All state lives under a single lock:
//!
//! ```text
//!   add_waiter ──lock──► complete? ──yes──► Ok(None)   (use outcome())
//!                            │no
//!                            └──► push sender ──► Ok(Some(id))
//!
//!   notify ─────lock──► complete = true, store outcome, take waiters
//!                unlock ──► release w1, pause, w2, pause, …, wN (no pause)
//! ```
//!
//! Because `add_waiter` and `notify` check-then-act under the same lock, a
//! waiter is either in the list taken by `notify` or sees `complete == true`.

use crate::errors::NotifyError;
use crate::target::NotifyTarget;
use parking_lot::Mutex;
use shared_types::{OperationError, Outcome};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Identifies a registered waiter, for removal on caller abandonment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

/// Result of [`WaitingNotifyTarget::register`].
#[derive(Debug)]
pub enum Registration {
    Waiting {
        id: WaiterId,
        receiver: oneshot::Receiver<Outcome>,
    },
    Complete(Outcome),
}

#[derive(Default)]
struct State {
    complete: bool,
    outcome: Option<Outcome>,
    waiters: Vec<(WaiterId, oneshot::Sender<Outcome>)>,
    next_waiter: u64,
}

/// Completion hook shared by every caller waiting on one operation.
pub struct WaitingNotifyTarget {
    state: Mutex<State>,
    stagger: Duration,
    max_waiters: usize,
}

impl WaitingNotifyTarget {
    /// Pause between consecutive waiter releases.
    pub const DEFAULT_STAGGER: Duration = Duration::from_millis(5);
    /// Waiters allowed on one target.
    pub const MAX_WAITERS: usize = 64;

    pub fn new() -> Self {
        Self::with_stagger(Self::DEFAULT_STAGGER)
    }

    pub fn with_stagger(stagger: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            stagger,
            max_waiters: Self::MAX_WAITERS,
        }
    }

    /// Adds a waiter. `Ok(None)` means the target is already complete and the
    /// caller must read [`outcome`](Self::outcome) instead of waiting.
    pub fn add_waiter(
        &self,
        sender: oneshot::Sender<Outcome>,
    ) -> Result<Option<WaiterId>, NotifyError> {
        let mut state = self.state.lock();
        if state.complete {
            return Ok(None);
        }
        if state.waiters.len() >= self.max_waiters {
            return Err(NotifyError::TooManyWaiters {
                limit: self.max_waiters,
            });
        }
        let id = WaiterId(state.next_waiter);
        state.next_waiter += 1;
        state.waiters.push((id, sender));
        Ok(Some(id))
    }

    /// Registers a waiter, or returns the outcome if already complete.
    pub fn register(&self) -> Result<Registration, NotifyError> {
        let (sender, receiver) = oneshot::channel();
        match self.add_waiter(sender)? {
            Some(id) => Ok(Registration::Waiting { id, receiver }),
            None => Ok(Registration::Complete(self.completed_outcome())),
        }
    }

    /// Suspends until the operation completes.
    pub async fn wait(&self) -> Result<Outcome, NotifyError> {
        match self.register()? {
            Registration::Complete(outcome) => Ok(outcome),
            Registration::Waiting { receiver, .. } => match receiver.await {
                Ok(outcome) => Ok(outcome),
                // The release task was torn down with its runtime.
                Err(_) => Ok(self.completed_outcome()),
            },
        }
    }

    /// Removes a waiter that lost interest. Returns false if it was already
    /// released (or never registered).
    pub fn remove_waiter(&self, id: WaiterId) -> bool {
        let mut state = self.state.lock();
        let before = state.waiters.len();
        state.waiters.retain(|(waiter, _)| *waiter != id);
        state.waiters.len() != before
    }

    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().complete
    }

    /// `None` until complete.
    pub fn was_successful(&self) -> Option<bool> {
        self.state.lock().outcome.as_ref().map(Outcome::is_success)
    }

    /// The operation's own error, if it failed with one.
    pub fn exception(&self) -> Option<OperationError> {
        match &self.state.lock().outcome {
            Some(Outcome::Failed(error)) => Some(error.clone()),
            _ => None,
        }
    }

    /// Result payload, if completed successfully.
    pub fn result(&self) -> Option<Vec<u8>> {
        match &self.state.lock().outcome {
            Some(Outcome::Completed(bytes)) => Some(bytes.clone()),
            _ => None,
        }
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.state.lock().outcome.clone()
    }

    fn completed_outcome(&self) -> Outcome {
        self.outcome()
            .unwrap_or(Outcome::Failed(OperationError::DispatcherShutdown))
    }
}

impl Default for WaitingNotifyTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WaitingNotifyTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WaitingNotifyTarget")
            .field("complete", &state.complete)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

impl NotifyTarget for WaitingNotifyTarget {
    fn notify(&self, outcome: Outcome) {
        let waiters = {
            let mut state = self.state.lock();
            if state.complete {
                warn!(outcome = outcome.kind().as_str(), "[notify] target already complete, outcome dropped");
                return;
            }
            state.complete = true;
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.waiters)
        };
        debug!(waiters = waiters.len(), outcome = outcome.kind().as_str(), "[notify] releasing waiters");
        release(waiters, outcome, self.stagger);
    }
}

/// Releases waiters in registration order with a pause after each but the last.
fn release(waiters: Vec<(WaiterId, oneshot::Sender<Outcome>)>, outcome: Outcome, stagger: Duration) {
    if waiters.len() <= 1 || stagger.is_zero() {
        for (_, sender) in waiters {
            let _ = sender.send(outcome.clone());
        }
        return;
    }

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                let last = waiters.len() - 1;
                for (i, (_, sender)) in waiters.into_iter().enumerate() {
                    let _ = sender.send(outcome.clone());
                    if i < last {
                        tokio::time::sleep(stagger).await;
                    }
                }
            });
        }
        Err(_) => {
            std::thread::spawn(move || {
                let last = waiters.len() - 1;
                for (i, (_, sender)) in waiters.into_iter().enumerate() {
                    let _ = sender.send(outcome.clone());
                    if i < last {
                        std::thread::sleep(stagger);
                    }
                }
            });
        }
    }
}
