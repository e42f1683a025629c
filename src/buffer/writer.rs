use super::codec::{encode, encode_end};
use super::BufferError;
use crate::record::LogRecord;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// Single writer of a session's buffer file.
///
/// Appends from concurrent capture channels are serialized through the file
/// lock; each record goes out as one write followed by flush and sync, so a
/// reader only ever sees whole records plus at most one partial tail. A write
/// that fails partway is cut back to the last whole record.
#[derive(Debug)]
pub struct BufferWriter {
    path: PathBuf,
    file: Mutex<Option<OpenBuffer>>,
}

#[derive(Debug)]
struct OpenBuffer {
    file: File,
    /// Length of the file up to the end of the last whole record.
    committed: u64,
}

impl OpenBuffer {
    async fn write_synced(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.file.write_all(bytes).await?;
        self.file.flush().await?;
        self.file.sync_data().await
    }

    /// Drop anything written past the last whole record.
    async fn rollback(&mut self) -> std::io::Result<()> {
        self.file.set_len(self.committed).await?;
        self.file.sync_data().await
    }
}

impl BufferWriter {
    /// Create (or open for append) the buffer file.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, BufferError> {
        let path = path.as_ref().to_path_buf();

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);

        let open_err = |source| BufferError::Open {
            path: path.clone(),
            source,
        };
        let file = options.open(&path).await.map_err(open_err)?;
        let committed = file.metadata().await.map_err(open_err)?.len();

        Ok(Self {
            path,
            file: Mutex::new(Some(OpenBuffer { file, committed })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Returns the number of bytes written.
    pub async fn append(&self, record: &LogRecord) -> Result<u64, BufferError> {
        let line = encode(record)?;
        self.write_synced(&line).await?;
        Ok(line.len() as u64)
    }

    /// Write the end marker and close the file. Later appends fail.
    pub async fn finish(&self) -> Result<(), BufferError> {
        self.write_synced(&encode_end()).await?;
        self.file.lock().await.take();
        Ok(())
    }

    async fn write_synced(&self, bytes: &[u8]) -> Result<(), BufferError> {
        let mut guard = self.file.lock().await;
        let buffer = guard.as_mut().ok_or(BufferError::Closed)?;
        match buffer.write_synced(bytes).await {
            Ok(()) => {
                buffer.committed += bytes.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = buffer.rollback().await {
                    warn!(
                        path = %self.path.display(),
                        error = %rollback,
                        "Failed to cut back partial record"
                    );
                }
                Err(e.into())
            }
        }
    }

    /// Discard bytes past the last whole record, as a failed write does.
    #[cfg(test)]
    async fn rollback(&self) -> Result<(), BufferError> {
        let mut guard = self.file.lock().await;
        let buffer = guard.as_mut().ok_or(BufferError::Closed)?;
        buffer.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::codec::{decode_complete, Frame};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_then_finish() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.log");
        let writer = BufferWriter::create(&path).await.unwrap();

        let written = writer.append(&LogRecord::capture("hello")).await.unwrap();
        writer.finish().await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len() as u64, written + 4);

        let decoded = decode_complete(&bytes);
        assert_eq!(decoded.frames.len(), 2);
        assert_eq!(decoded.frames[1], Frame::End);
    }

    #[tokio::test]
    async fn test_append_after_finish_fails() {
        let dir = TempDir::new().unwrap();
        let writer = BufferWriter::create(dir.path().join("s.log")).await.unwrap();
        writer.finish().await.unwrap();

        let err = writer.append(&LogRecord::capture("late")).await.unwrap_err();
        assert!(matches!(err, BufferError::Closed));
    }

    #[tokio::test]
    async fn test_concurrent_appends_never_interleave_within_a_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("concurrent.log");
        let writer = Arc::new(BufferWriter::create(&path).await.unwrap());

        let mut handles = Vec::new();
        for channel in 0..4 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let msg = format!("channel-{} line-{} {}", channel, i, "x".repeat(512));
                    writer.append(&LogRecord::capture(msg)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let bytes = std::fs::read(&path).unwrap();
        let decoded = decode_complete(&bytes);
        assert_eq!(decoded.malformed, 0);
        assert_eq!(decoded.frames.len(), 200);

        // Order within each channel is preserved
        for channel in 0..4 {
            let prefix = format!("channel-{} ", channel);
            let seen: Vec<usize> = decoded
                .frames
                .iter()
                .filter_map(|f| match f {
                    Frame::Record(r) if r.message.starts_with(&prefix) => Some(r),
                    _ => None,
                })
                .map(|r| {
                    let idx = r.message.split_whitespace().nth(1).unwrap();
                    idx.trim_start_matches("line-").parse().unwrap()
                })
                .collect();
            assert_eq!(seen, (0..50).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_torn_write_is_cut_back_to_last_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("torn.log");
        let writer = BufferWriter::create(&path).await.unwrap();
        writer.append(&LogRecord::capture("before")).await.unwrap();

        // Half a record left behind by a write that failed partway.
        let torn = encode(&LogRecord::capture("never finished")).unwrap();
        {
            use std::io::Write;
            let mut raw = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            raw.write_all(&torn[..torn.len() / 2]).unwrap();
        }
        writer.rollback().await.unwrap();

        writer.append(&LogRecord::capture("after")).await.unwrap();
        writer.finish().await.unwrap();

        let decoded = decode_complete(&std::fs::read(&path).unwrap());
        assert_eq!(decoded.malformed, 0);
        let messages: Vec<&str> = decoded
            .frames
            .iter()
            .filter_map(|f| match f {
                Frame::Record(r) => Some(r.message.as_str()),
                Frame::End => None,
            })
            .collect();
        assert_eq!(messages, vec!["before", "after"]);
    }

    #[tokio::test]
    async fn test_reopen_keeps_existing_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reopen.log");
        let first = BufferWriter::create(&path).await.unwrap();
        first.append(&LogRecord::capture("one")).await.unwrap();
        drop(first);

        let second = BufferWriter::create(&path).await.unwrap();
        second.rollback().await.unwrap();
        second.append(&LogRecord::capture("two")).await.unwrap();

        let decoded = decode_complete(&std::fs::read(&path).unwrap());
        assert_eq!(decoded.frames.len(), 2);
        assert_eq!(decoded.malformed, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_buffer_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("private.log");
        let _writer = BufferWriter::create(&path).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
