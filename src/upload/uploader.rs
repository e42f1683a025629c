use super::client::{Collector, CollectorClientError};
use crate::config::types::UploadConfig;
use crate::pipeline::RunContext;
use crate::record::LogRecord;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        last: CollectorClientError,
    },

    #[error("uploads are disabled for this session")]
    CircuitOpen,
}

/// Shared "backend disabled" flag. Once open it stays open for the session.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    open: Arc<AtomicBool>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Open the circuit. Returns true only for the call that opened it.
    pub fn trip(&self) -> bool {
        !self.open.swap(true, Ordering::AcqRel)
    }
}

/// Sends batches with a fixed number of attempts and a constant delay
/// between them, opening the circuit when every attempt failed.
pub struct BatchUploader {
    collector: Arc<dyn Collector>,
    circuit: CircuitBreaker,
    ctx: Arc<RunContext>,
    max_retries: usize,
    retry_delay: Duration,
}

impl BatchUploader {
    pub fn new(
        collector: Arc<dyn Collector>,
        circuit: CircuitBreaker,
        ctx: Arc<RunContext>,
        config: &UploadConfig,
    ) -> Self {
        Self {
            collector,
            circuit,
            ctx,
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay,
        }
    }

    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    pub async fn upload(&self, batch: &[LogRecord]) -> Result<(), UploadError> {
        if batch.is_empty() {
            return Ok(());
        }
        if self.circuit.is_open() {
            return Err(UploadError::CircuitOpen);
        }

        let session_id = self.ctx.session_id.as_str();
        let tag = self.ctx.tag.as_deref();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.collector.upload_batch(session_id, tag, batch).await {
                Ok(()) => {
                    debug!(session_id, records = batch.len(), attempt, "Batch uploaded");
                    return Ok(());
                }
                Err(e) if attempt >= self.max_retries => {
                    if self.circuit.trip() {
                        error!(
                            session_id,
                            attempts = attempt,
                            error = %e,
                            "Collector unreachable, disabling uploads for this session"
                        );
                    }
                    return Err(UploadError::RetriesExhausted { attempts: attempt, last: e });
                }
                Err(e) => {
                    warn!(
                        session_id,
                        attempt,
                        delay_ms = self.retry_delay.as_millis() as u64,
                        error = %e,
                        "Upload failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}
