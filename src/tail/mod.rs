//! Following the buffer file and feeding new records to the uploader.

pub mod tailer;
pub mod watch;
pub mod worker;

use thiserror::Error;

pub use tailer::OffsetTailer;
pub use watch::BufferWatch;
pub use worker::{TailOptions, TailSummary, TailWorker};

#[derive(Debug, Error)]
pub enum TailError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("filesystem watch error: {0}")]
    Watch(#[from] notify::Error),
}
