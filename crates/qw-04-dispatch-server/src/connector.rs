//! How a worker reaches the dispatch server.

use crate::server::DispatchServer;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// A bidirectional byte stream to the server.
pub trait WorkerStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> WorkerStream for T {}

pub type BoxedStream = Box<dyn WorkerStream>;

/// Opens a worker's connection.
#[async_trait]
pub trait WorkerConnector: Send + Sync {
    /// Returns the stream and the number of attempts it took.
    async fn connect(&self) -> Result<(BoxedStream, u32), (io::Error, u32)>;
}

/// TCP connection with a fixed number of attempts.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
    attempts: u32,
    retry_delay: Duration,
}

impl TcpConnector {
    pub const DEFAULT_ATTEMPTS: u32 = 20;
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            attempts: Self::DEFAULT_ATTEMPTS,
            retry_delay: Self::DEFAULT_RETRY_DELAY,
        }
    }

    #[must_use]
    pub fn with_retries(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }
}

#[async_trait]
impl WorkerConnector for TcpConnector {
    async fn connect(&self) -> Result<(BoxedStream, u32), (io::Error, u32)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match TcpStream::connect(self.addr).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    debug!(addr = %self.addr, attempt, "Connected to dispatch server");
                    return Ok((Box::new(stream), attempt));
                }
                Err(e) if attempt >= self.attempts => return Err((e, attempt)),
                Err(e) => {
                    warn!(addr = %self.addr, attempt, error = %e, "Dispatch server not reachable, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

/// In-memory connection served directly by a [`DispatchServer`] in the same
/// process.
#[derive(Debug, Clone)]
pub struct DuplexConnector {
    server: Arc<DispatchServer>,
    buffer: usize,
}

impl DuplexConnector {
    pub const DEFAULT_BUFFER: usize = 256 * 1024;

    pub fn new(server: Arc<DispatchServer>) -> Self {
        Self {
            server,
            buffer: Self::DEFAULT_BUFFER,
        }
    }
}

#[async_trait]
impl WorkerConnector for DuplexConnector {
    async fn connect(&self) -> Result<(BoxedStream, u32), (io::Error, u32)> {
        let (worker_side, server_side) = tokio::io::duplex(self.buffer);
        let server = Arc::clone(&self.server);
        tokio::spawn(async move {
            let _ = server.handle_connection(server_side).await;
        });
        Ok((Box::new(worker_side), 1))
    }
}
