//! # Worker Process Loop
//!
//! The worker side of the protocol. One `WorkerProcess` runs one slot:
//!
//! ```text
//! connect ──► Authenticate ──► AuthenticateAccepted{true}
//!                                   │
//!        ┌──────────────────────────┘
//!        ▼
//!   DoOperation ──► AcknowledgeOperation{true} ──► perform (blocking thread)
//!        ▲                                               │
//!        └─────────── DoneOperation{will_exit: false} ◄──┤
//!                                                        └─► DoneOperation{will_exit: true} ──► exit
//! ```

use crate::codec::WireCodec;
use crate::connector::WorkerConnector;
use crate::errors::WorkerError;
use crate::memory::{RecyclePolicy, ResourceProbe};
use futures::{SinkExt, StreamExt};
use shared_types::{
    OperationContext, OperationError, OperationRegistry, SlotNumber, WireMessage, WorkerThreadMark,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Settings for one worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_number: SlotNumber,
    pub token: String,
    /// How long to wait for `AuthenticateAccepted`.
    pub authenticate_timeout: Duration,
    /// Pause between the final `DoneOperation` and exiting.
    pub exit_delay: Duration,
    pub recycle: RecyclePolicy,
}

impl WorkerConfig {
    pub const DEFAULT_AUTHENTICATE_TIMEOUT: Duration = Duration::from_secs(1);
    pub const DEFAULT_EXIT_DELAY: Duration = Duration::from_millis(250);

    pub fn new(worker_number: SlotNumber, token: impl Into<String>) -> Self {
        Self {
            worker_number,
            token: token.into(),
            authenticate_timeout: Self::DEFAULT_AUTHENTICATE_TIMEOUT,
            exit_delay: Self::DEFAULT_EXIT_DELAY,
            recycle: RecyclePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_recycle(mut self, recycle: RecyclePolicy) -> Self {
        self.recycle = recycle;
        self
    }
}

/// How a worker ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Sent `will_exit` and is making way for a replacement.
    Recycled,
    /// The server closed the connection.
    ServerClosed,
}

impl WorkerExit {
    pub fn exit_code(self) -> i32 {
        0
    }
}

/// One worker slot's connection and operation loop.
pub struct WorkerProcess {
    config: WorkerConfig,
    registry: Arc<OperationRegistry>,
    connector: Arc<dyn WorkerConnector>,
    probe: Arc<dyn ResourceProbe>,
    accepted: Option<Arc<AtomicBool>>,
    operations_performed: u64,
}

impl WorkerProcess {
    pub fn new(
        config: WorkerConfig,
        registry: Arc<OperationRegistry>,
        connector: Arc<dyn WorkerConnector>,
        probe: Arc<dyn ResourceProbe>,
    ) -> Self {
        Self {
            config,
            registry,
            connector,
            probe,
            accepted: None,
            operations_performed: 0,
        }
    }

    /// Sets `flag` once the server has accepted this worker's token.
    #[must_use]
    pub fn with_accepted_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.accepted = Some(flag);
        self
    }

    pub fn operations_performed(&self) -> u64 {
        self.operations_performed
    }

    /// Connects, authenticates, and serves operations until told to stop.
    pub async fn run(&mut self) -> Result<WorkerExit, WorkerError> {
        let number = self.config.worker_number;
        let (stream, attempts) = self
            .connector
            .connect()
            .await
            .map_err(|(source, attempts)| WorkerError::Connect { attempts, source })?;
        debug!(worker = number, attempts, "[worker-{number}] Connected");
        let mut framed = Framed::new(stream, WireCodec::new());

        framed
            .send(WireMessage::Authenticate {
                worker_number: number,
                token: self.config.token.clone(),
            })
            .await?;

        let limit = self.config.authenticate_timeout;
        match timeout(limit, framed.next()).await {
            Err(_) => return Err(WorkerError::AuthenticationTimeout(limit)),
            Ok(None) => return Err(WorkerError::ConnectionClosed("authentication")),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(Some(Ok(WireMessage::AuthenticateAccepted { accepted: true }))) => {}
            Ok(Some(Ok(WireMessage::AuthenticateAccepted { accepted: false }))) => {
                return Err(WorkerError::Rejected {
                    worker_number: number,
                })
            }
            Ok(Some(Ok(other))) => {
                return Err(WorkerError::UnexpectedMessage {
                    expected: "AuthenticateAccepted",
                    received: other.name(),
                })
            }
        }

        if let Some(flag) = &self.accepted {
            flag.store(true, Ordering::SeqCst);
        }
        let baseline = self.probe.usage_percent();
        info!(worker = number, memory_percent = ?baseline, "[worker-{number}] Authenticated, waiting for operations");

        loop {
            let message = match framed.next().await {
                None => {
                    info!(worker = number, "[worker-{number}] Server closed connection");
                    return Ok(WorkerExit::ServerClosed);
                }
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(message)) => message,
            };
            let (operation_id, envelope) = match message {
                WireMessage::DoOperation {
                    operation_id,
                    envelope,
                } => (operation_id, envelope),
                other => {
                    return Err(WorkerError::UnexpectedMessage {
                        expected: "DoOperation",
                        received: other.name(),
                    })
                }
            };

            framed
                .send(WireMessage::AcknowledgeOperation { ok: true })
                .await?;
            debug!(worker = number, operation_id = %operation_id, kind = %envelope.kind, "[worker-{number}] Performing");

            let kind = envelope.kind.clone();
            let registry = Arc::clone(&self.registry);
            let result = tokio::task::spawn_blocking(move || {
                let _mark = WorkerThreadMark::enter();
                registry.perform(&envelope, &OperationContext::for_worker(number))
            })
            .await
            .unwrap_or_else(|e| {
                Err(OperationError::Panicked {
                    kind: kind.clone(),
                    message: e.to_string(),
                })
            });
            self.operations_performed += 1;
            if let Err(e) = &result {
                warn!(worker = number, operation_id = %operation_id, kind = %kind, error = %e, "[worker-{number}] Operation failed");
            }

            let current = self.probe.usage_percent();
            let will_exit = self.config.recycle.should_recycle(baseline, current);
            if will_exit {
                info!(worker = number, baseline = ?baseline, current = ?current, "[worker-{number}] Memory grew, will exit after reply");
            }

            framed
                .send(WireMessage::DoneOperation {
                    operation_id,
                    result,
                    will_exit,
                })
                .await?;

            if will_exit {
                tokio::time::sleep(self.config.exit_delay).await;
                info!(worker = number, performed = self.operations_performed, "[worker-{number}] Exiting for recycle");
                return Ok(WorkerExit::Recycled);
            }
        }
    }
}

impl std::fmt::Debug for WorkerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerProcess")
            .field("worker_number", &self.config.worker_number)
            .field("operations_performed", &self.operations_performed)
            .finish()
    }
}
