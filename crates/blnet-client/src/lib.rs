use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::debug;

pub use types::Command;

mod mock;
mod retry;

pub use mock::{MockReply, MockTransport};
pub use retry::RetryingFetcher;

/// Settling time the bridge needs between two commands.
pub const DEFAULT_QUIET_PERIOD_MS: u64 = 2_000;
/// Attempts per block read before giving up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;
/// Largest response the bridge sends in one chunk is well below this.
const RESPONSE_BUFFER_SIZE: usize = 1_024;

/// Connection settings for a BL-NET bridge.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Delay paid before every command, success or not.
    pub quiet_period_ms: u64,
    /// Bound on connect, on the opcode write and on the single response read,
    /// in milliseconds.
    pub timeout_ms: u64,
    /// Total attempts for a block read, including the first one.
    pub max_attempts: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 40_000,
            quiet_period_ms: DEFAULT_QUIET_PERIOD_MS,
            timeout_ms: 10_000,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{command} timed out after {timeout_ms}ms")]
    Timeout { command: Command, timeout_ms: u64 },
    #[error("connection closed before {command} returned any data")]
    Closed { command: Command },
    #[error("{command} failed after {attempts} attempts, last: {last}")]
    ExhaustedRetries {
        command: Command,
        attempts: usize,
        /// Why the final attempt was rejected.
        last: String,
    },
}

impl ClientError {
    /// Errors raised by a single exchange; the retry layer may try again.
    pub fn is_transport(&self) -> bool {
        !matches!(self, ClientError::ExhaustedRetries { .. })
    }
}

/// A single request/response exchange with the bridge.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, command: Command) -> Result<Vec<u8>, ClientError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, command: Command) -> Result<Vec<u8>, ClientError> {
        (**self).send(command).await
    }
}

/// Opens one TCP connection per command and treats the first chunk read as
/// the whole response.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    config: ClientConfig,
}

impl TcpTransport {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    async fn exchange(&self, command: Command) -> Result<Vec<u8>, ClientError> {
        let limit = Duration::from_millis(self.config.timeout_ms);
        let timed_out = || ClientError::Timeout {
            command,
            timeout_ms: self.config.timeout_ms,
        };

        let connect = TcpStream::connect((self.config.host.as_str(), self.config.port));
        let mut stream = timeout(limit, connect).await.map_err(|_| timed_out())??;
        timeout(limit, stream.write_all(&[command.opcode()]))
            .await
            .map_err(|_| timed_out())??;

        let mut buf = vec![0u8; RESPONSE_BUFFER_SIZE];
        let read = timeout(limit, stream.read(&mut buf))
            .await
            .map_err(|_| timed_out())??;
        if read == 0 {
            return Err(ClientError::Closed { command });
        }
        buf.truncate(read);
        Ok(buf)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, command: Command) -> Result<Vec<u8>, ClientError> {
        sleep(Duration::from_millis(self.config.quiet_period_ms)).await;

        // The stream lives inside `exchange` and is dropped, closing the
        // socket, before we get here.
        let result = self.exchange(command).await;
        match &result {
            Ok(bytes) => debug!(
                host = %self.config.host,
                port = self.config.port,
                %command,
                len = bytes.len(),
                "blnet exchange ok"
            ),
            Err(err) => debug!(
                host = %self.config.host,
                port = self.config.port,
                %command,
                error = %err,
                "blnet exchange failed"
            ),
        }
        result
    }
}
