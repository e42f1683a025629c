//! The durable local buffer between capture and upload.
//!
//! An append-only JSON-lines file: one encoded [`LogRecord`] per line, closed
//! by a single [`END_MARKER`] line once capture has finished.
//!
//! [`LogRecord`]: crate::record::LogRecord

pub mod codec;
pub mod writer;

use std::path::PathBuf;
use thiserror::Error;

pub use codec::{decode_complete, CodecError, Decoded, Frame, END_MARKER};
pub use writer::BufferWriter;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("cannot open buffer file '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("buffer already closed")]
    Closed,
}
