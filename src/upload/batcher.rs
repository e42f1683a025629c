use super::uploader::{BatchUploader, UploadError};
use crate::record::LogRecord;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Records acknowledged by the collector
    pub delivered: u64,
    /// Records given up on (failed batch or open circuit)
    pub abandoned: u64,
    /// Successful upload calls
    pub batches: u64,
}

/// Accumulates records and hands them to the uploader in bounded batches.
pub struct Batcher {
    uploader: BatchUploader,
    pending: Vec<LogRecord>,
    limit: usize,
    stats: BatchStats,
}

impl Batcher {
    pub fn new(uploader: BatchUploader, batch_size: usize) -> Self {
        let limit = batch_size.max(1);
        Self {
            uploader,
            pending: Vec::with_capacity(limit),
            limit,
            stats: BatchStats::default(),
        }
    }

    /// Add a record, flushing when the batch is full.
    pub async fn push(&mut self, record: LogRecord) {
        self.pending.push(record);
        if self.pending.len() >= self.limit {
            self.flush().await;
        }
    }

    /// Ship whatever is pending, even a partial batch.
    pub async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        let count = batch.len() as u64;

        if self.uploader.circuit().is_open() {
            debug!(records = count, "Circuit open, abandoning batch");
            self.stats.abandoned += count;
            return;
        }

        match self.uploader.upload(&batch).await {
            Ok(()) => {
                self.stats.delivered += count;
                self.stats.batches += 1;
            }
            Err(UploadError::CircuitOpen) => self.stats.abandoned += count,
            Err(e) => {
                warn!(records = count, error = %e, "Batch abandoned");
                self.stats.abandoned += count;
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    pub fn circuit_open(&self) -> bool {
        self.uploader.circuit().is_open()
    }
}
