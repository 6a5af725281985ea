//! # Dispatch Server
//!
//! Accepts worker connections and drives each one through the protocol:
//!
//! ```text
//! accept ──► Authenticate (≤ authenticate_timeout)
//!              │ bad token / bad number / slot taken ──► AuthenticateAccepted{false}, close
//!              ▼
//!          AuthenticateAccepted{true} ──► worker_ready
//!              ▼
//!   ┌──► wait: work signal │ socket │ idle recheck
//!   │          ▼
//!   │      DoOperation ──► AcknowledgeOperation (≤ acknowledge_timeout)
//!   │          │ missing/false ──► return_work, close
//!   │          ▼
//!   └───── DoneOperation (≤ wedged_worker_timeout)
//!              │ will_exit ──► close
//! ```
//!
//! Whatever ends the connection, the slot is released through
//! `connection_closed`, which is a no-op once the slot has moved on.

use crate::codec::WireCodec;
use crate::errors::ServerError;
use futures::{SinkExt, StreamExt};
use qw_03_dispatcher::{Assignment, Dispatcher, SlotHandle};
use qw_telemetry::metrics;
use shared_types::{SlotNumber, WireMessage, WorkerTokenIssuer};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// Default port for worker connections.
pub const DEFAULT_PORT: u16 = 1888;

/// Loopback address on [`DEFAULT_PORT`].
pub fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT))
}

type WorkerFramed<S> = Framed<S, WireCodec>;

/// How a served assignment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterOperation {
    Continue,
    WorkerExiting,
}

/// Server side of the worker protocol.
pub struct DispatchServer {
    dispatcher: Arc<Dispatcher>,
    issuer: Arc<WorkerTokenIssuer>,
}

impl DispatchServer {
    pub fn new(dispatcher: Arc<Dispatcher>, issuer: Arc<WorkerTokenIssuer>) -> Self {
        Self { dispatcher, issuer }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "[server] Listening for workers");
        Ok(listener)
    }

    /// Accepts connections until `shutdown` becomes true.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ServerError> {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%peer, error = %e, "[server] Could not set TCP_NODELAY");
                        }
                        debug!(%peer, "[server] Worker connection accepted");
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            let _ = server.handle_connection(stream).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "[server] Accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("[server] Stopped accepting workers");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Runs one worker connection to completion.
    pub async fn handle_connection<S>(&self, stream: S) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut framed = Framed::new(stream, WireCodec::new());

        let handle = match self.authenticate(&mut framed).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "[server] Authentication failed");
                return Err(e);
            }
        };

        let result = self.serve_slot(&mut framed, handle).await;
        match &result {
            Ok(()) => info!(slot = handle.number, "[server] Worker connection finished"),
            Err(e) => warn!(slot = handle.number, error = %e, "[server] Worker connection ended"),
        }
        self.dispatcher.connection_closed(handle);
        result
    }

    async fn authenticate<S>(&self, framed: &mut WorkerFramed<S>) -> Result<SlotHandle, ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let limit = self.dispatcher.policy().authenticate_timeout;
        let first = timeout(limit, framed.next())
            .await
            .map_err(|_| ServerError::AuthenticationTimeout(limit))?;

        let (worker_number, token) = match first {
            Some(Ok(WireMessage::Authenticate {
                worker_number,
                token,
            })) => (worker_number, token),
            Some(Ok(other)) => {
                return Err(ServerError::UnexpectedMessage {
                    expected: "Authenticate",
                    received: other.name(),
                })
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Err(ServerError::ConnectionClosed),
        };

        if !self.issuer.verify(worker_number, &token) {
            return Err(self.reject(framed, worker_number, "invalid token").await);
        }

        match self.dispatcher.worker_authenticated(worker_number) {
            Ok(handle) => Ok(handle),
            Err(e) => Err(self.reject(framed, worker_number, &e.to_string()).await),
        }
    }

    async fn reject<S>(
        &self,
        framed: &mut WorkerFramed<S>,
        worker_number: SlotNumber,
        reason: &str,
    ) -> ServerError
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        metrics::WORKER_AUTH_FAILURES.inc();
        let _ = framed
            .send(WireMessage::AuthenticateAccepted { accepted: false })
            .await;
        ServerError::Rejected {
            worker_number,
            reason: reason.to_string(),
        }
    }

    async fn serve_slot<S>(&self, framed: &mut WorkerFramed<S>, handle: SlotHandle) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        framed
            .send(WireMessage::AuthenticateAccepted { accepted: true })
            .await?;
        self.dispatcher.worker_ready(handle)?;
        info!(slot = handle.number, generation = handle.generation, "[server] Worker ready");

        // Stagger polling across slots.
        let idle_recheck = Duration::from_secs((10 + handle.number as u64) * 2);

        loop {
            let Some(signal) = self.dispatcher.work_signal(handle.number) else {
                return Err(ServerError::ConnectionClosed);
            };
            if let Some(assignment) = self.dispatcher.next_work(handle)? {
                drop(signal);
                if self.run_operation(framed, handle, assignment).await? == AfterOperation::WorkerExiting {
                    return Ok(());
                }
                continue;
            }
            if self.dispatcher.is_shut_down() {
                return Ok(());
            }

            tokio::select! {
                _ = signal => {}
                incoming = framed.next() => {
                    return match incoming {
                        None => Err(ServerError::ConnectionClosed),
                        Some(Err(e)) => Err(e.into()),
                        Some(Ok(message)) => Err(ServerError::UnexpectedMessage {
                            expected: "nothing while idle",
                            received: message.name(),
                        }),
                    };
                }
                _ = tokio::time::sleep(idle_recheck) => {
                    debug!(slot = handle.number, "[server] Idle recheck");
                }
            }
        }
    }

    async fn run_operation<S>(
        &self,
        framed: &mut WorkerFramed<S>,
        handle: SlotHandle,
        assignment: Assignment,
    ) -> Result<AfterOperation, ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let policy = self.dispatcher.policy();
        let operation_id = assignment.operation_id;

        let sent = framed
            .send(WireMessage::DoOperation {
                operation_id,
                envelope: assignment.envelope,
            })
            .await;
        if let Err(e) = sent {
            self.dispatcher.return_work(handle, operation_id)?;
            return Err(e.into());
        }

        let acknowledged = matches!(
            timeout(policy.acknowledge_timeout, framed.next()).await,
            Ok(Some(Ok(WireMessage::AcknowledgeOperation { ok: true })))
        );
        if !acknowledged {
            self.dispatcher.return_work(handle, operation_id)?;
            return Err(ServerError::NotAcknowledged {
                slot: handle.number,
                operation_id,
            });
        }
        debug!(slot = handle.number, operation_id = %operation_id, "[server] Operation acknowledged");

        let wedged_after = policy.wedged_worker_timeout;
        let reply = timeout(wedged_after, framed.next()).await.map_err(|_| {
            error!(slot = handle.number, operation_id = %operation_id, "[server] Worker wedged, closing connection");
            ServerError::Wedged {
                slot: handle.number,
                after: wedged_after,
            }
        })?;

        match reply {
            Some(Ok(WireMessage::DoneOperation {
                operation_id: reported,
                result,
                will_exit,
            })) => {
                self.dispatcher
                    .finished_work(handle, reported, result, will_exit)?;
                if will_exit {
                    info!(slot = handle.number, "[server] Worker will exit after this operation");
                    Ok(AfterOperation::WorkerExiting)
                } else {
                    Ok(AfterOperation::Continue)
                }
            }
            Some(Ok(other)) => Err(ServerError::UnexpectedMessage {
                expected: "DoneOperation",
                received: other.name(),
            }),
            Some(Err(e)) => Err(e.into()),
            None => Err(ServerError::ConnectionClosed),
        }
    }
}

impl std::fmt::Debug for DispatchServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchServer")
            .field("workers", &self.dispatcher.policy().number_of_workers)
            .finish()
    }
}
