use tracing::{debug, warn};

use crate::{ClientError, Command, Transport};

/// Responses of this length or shorter are runt frames, not data.
const RUNT_FRAME_MAX_LEN: usize = 1;

/// Bounded retry around a [`Transport`] for multi-byte block reads.
///
/// A failed attempt is either a transport error or a runt frame. Retries run
/// back to back; the transport's own quiet period is the only delay.
#[derive(Debug)]
pub struct RetryingFetcher<T> {
    transport: T,
    max_attempts: usize,
}

impl<T: Transport> RetryingFetcher<T> {
    pub fn new(transport: T, max_attempts: usize) -> Self {
        Self {
            transport,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub async fn fetch_block(&self, command: Command) -> Result<Vec<u8>, ClientError> {
        let mut last = String::new();
        for attempt in 1..=self.max_attempts {
            match self.transport.send(command).await {
                Ok(bytes) if bytes.len() > RUNT_FRAME_MAX_LEN => {
                    debug!(%command, attempt, len = bytes.len(), "block read ok");
                    record_attempt("ok");
                    return Ok(bytes);
                }
                Ok(bytes) => {
                    warn!(%command, attempt, len = bytes.len(), "short response");
                    record_attempt("short");
                    last = format!("short response ({} bytes)", bytes.len());
                }
                Err(err) => {
                    warn!(%command, attempt, error = %err, "block read failed");
                    record_attempt("error");
                    last = err.to_string();
                }
            }
        }

        Err(ClientError::ExhaustedRetries {
            command,
            attempts: self.max_attempts,
            last,
        })
    }
}

fn record_attempt(outcome: &'static str) {
    metrics::counter!("uvr_fetch_attempts_total", "outcome" => outcome).increment(1);
}
