//! # Queuer
//!
//! Caller-facing entry point. Tags each operation with the application the
//! host says is current and hands it to the [`Dispatcher`] without blocking.
//!
//! The typed helpers wrap the byte-level API:
//!
//! - [`DefaultQueuer::perform`]: submit and await the decoded output
//! - [`DefaultQueuer::perform_in_background`]: submit, log the outcome
//! - [`DefaultQueuer::perform_or_inline`]: admission-checked submit that runs
//!   the operation on a blocking thread when no worker is free
//! - [`DefaultQueuer::perform_coalesced`]: identical concurrent requests share
//!   one in-flight operation

use crate::service::Dispatcher;
use qw_02_notify::{CallbackNotifyTarget, InFlightRegistry, NotifyError, NotifyTarget, WaitingNotifyTarget};
use shared_types::{
    decode_output, encode_request, perform_locally, AdmissionError, ApplicationId, Operation,
    OperationEnvelope, OperationError, OperationId, Outcome, SlotNumber, SubmitError,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Supplied by the embedding application.
pub trait HostContext: Send + Sync {
    /// The application on whose behalf the current caller is working.
    fn current_application_id(&self) -> ApplicationId;
}

/// [`HostContext`] that always answers with one application.
#[derive(Debug, Clone, Copy)]
pub struct FixedApplication(pub ApplicationId);

impl HostContext for FixedApplication {
    fn current_application_id(&self) -> ApplicationId {
        self.0
    }
}

/// Non-blocking submission of opaque envelopes.
pub trait Queuer: Send + Sync {
    fn queue(
        &self,
        envelope: OperationEnvelope,
        target: Arc<dyn NotifyTarget>,
    ) -> Result<OperationId, SubmitError>;
}

/// Failure of a typed `perform` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PerformError {
    /// The operation ran and its own logic failed.
    #[error(transparent)]
    Failed(OperationError),

    #[error("Worker {slot} was lost while performing the operation")]
    Lost { slot: SlotNumber },

    #[error("Operation timed out after {after:?}")]
    TimedOut { after: Duration },

    #[error("Submit failed: {0}")]
    Submit(#[from] SubmitError),

    #[error("Admission failed: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Notification failed: {0}")]
    Notify(#[from] NotifyError),

    #[error("Could not encode request: {0}")]
    Encode(OperationError),

    #[error("Could not decode result: {0}")]
    Decode(OperationError),
}

impl PerformError {
    /// Maps a non-successful outcome. `Completed` is not an error and yields `None`.
    pub fn from_outcome(outcome: Outcome) -> Option<Self> {
        match outcome {
            Outcome::Completed(_) => None,
            Outcome::Failed(error) => Some(Self::Failed(error)),
            Outcome::Lost { slot } => Some(Self::Lost { slot }),
            Outcome::TimedOut { after } => Some(Self::TimedOut { after }),
        }
    }
}

fn output_of<O: Operation>(outcome: Outcome) -> Result<O::Output, PerformError> {
    match outcome {
        Outcome::Completed(bytes) => decode_output::<O>(&bytes).map_err(PerformError::Decode),
        other => Err(PerformError::from_outcome(other)
            .unwrap_or(PerformError::Failed(OperationError::DispatcherShutdown))),
    }
}

/// [`Queuer`] backed by a [`Dispatcher`] and the host's [`HostContext`].
#[derive(Clone)]
pub struct DefaultQueuer {
    dispatcher: Arc<Dispatcher>,
    host: Arc<dyn HostContext>,
}

impl DefaultQueuer {
    pub fn new(dispatcher: Arc<Dispatcher>, host: Arc<dyn HostContext>) -> Self {
        Self { dispatcher, host }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Submits `operation` and waits for its output.
    pub async fn perform<O: Operation>(&self, operation: &O) -> Result<O::Output, PerformError> {
        let envelope = encode_request(operation).map_err(PerformError::Encode)?;
        let target = Arc::new(WaitingNotifyTarget::new());
        self.queue(envelope, target.clone())?;
        let outcome = target.wait().await?;
        output_of::<O>(outcome)
    }

    /// Submits `operation` without waiting. Failures are logged.
    pub fn perform_in_background<O: Operation>(&self, operation: &O) -> Result<OperationId, PerformError> {
        let envelope = encode_request(operation).map_err(PerformError::Encode)?;
        let target = Arc::new(CallbackNotifyTarget::new(|outcome: Outcome| {
            match PerformError::from_outcome(outcome) {
                None => debug!(kind = O::KIND, "[queuer] Background operation completed"),
                Some(error) => warn!(kind = O::KIND, error = %error, "[queuer] Background operation failed"),
            }
        }));
        Ok(self.queue(envelope, target)?)
    }

    /// Submits through admission control. When no worker frees up within the
    /// admission budget the operation runs locally on a blocking thread, which
    /// operations requiring isolation refuse.
    pub async fn perform_or_inline<O: Operation>(&self, operation: O) -> Result<O::Output, PerformError> {
        let envelope = encode_request(&operation).map_err(PerformError::Encode)?;
        let application = self.host.current_application_id();
        let target = Arc::new(WaitingNotifyTarget::new());

        match self
            .dispatcher
            .submit_with_admission(envelope, application, target.clone())
            .await
        {
            Ok(_) => output_of::<O>(target.wait().await?),
            Err(AdmissionError::NoWorkerAvailable { .. }) => {
                info!(application = %application, kind = O::KIND, "[queuer] No worker available, performing inline");
                let joined = tokio::task::spawn_blocking(move || perform_locally(operation)).await;
                match joined {
                    Ok(result) => result.map_err(PerformError::Failed),
                    Err(e) => Err(PerformError::Failed(OperationError::Panicked {
                        kind: O::KIND.to_string(),
                        message: e.to_string(),
                    })),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Joins an identical in-flight operation for the current application, or
    /// submits `operation` if none is running under `key`.
    pub async fn perform_coalesced<O: Operation>(
        &self,
        registry: &InFlightRegistry,
        key: &str,
        operation: &O,
    ) -> Result<O::Output, PerformError> {
        let application = self.host.current_application_id();
        let joined = registry.join_or_start(application, key, |target| {
            let envelope = encode_request(operation).map_err(PerformError::Encode)?;
            self.dispatcher.submit(envelope, application, target)?;
            Ok::<(), PerformError>(())
        })?;
        if !joined.started {
            debug!(application = %application, key, "[queuer] Joined in-flight operation");
        }
        output_of::<O>(joined.target.wait().await?)
    }
}

impl Queuer for DefaultQueuer {
    fn queue(
        &self,
        envelope: OperationEnvelope,
        target: Arc<dyn NotifyTarget>,
    ) -> Result<OperationId, SubmitError> {
        let application = self.host.current_application_id();
        self.dispatcher.submit(envelope, application, target)
    }
}

impl std::fmt::Debug for DefaultQueuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultQueuer")
            .field("application", &self.host.current_application_id())
            .finish()
    }
}
