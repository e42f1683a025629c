use super::TailError;
use crate::buffer::{decode_complete, Frame};
use crate::record::LogRecord;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::warn;

/// Incremental reader of a buffer file.
///
/// The offset only moves past complete lines, so a record that is still being
/// written is picked up whole on a later poll and never read twice.
#[derive(Debug)]
pub struct OffsetTailer {
    path: PathBuf,
    offset: u64,
    ended: bool,
    records_read: u64,
    malformed: u64,
}

impl OffsetTailer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            ended: false,
            records_read: 0,
            malformed: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether the end marker has been read.
    pub fn ended(&self) -> bool {
        self.ended
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Read every complete record appended since the previous poll.
    ///
    /// A missing file yields nothing. After the end marker nothing more is read.
    pub async fn poll(&mut self) -> Result<Vec<LogRecord>, TailError> {
        if self.ended {
            return Ok(Vec::new());
        }

        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut chunk = Vec::new();
        file.read_to_end(&mut chunk).await?;

        let decoded = decode_complete(&chunk);
        self.offset += decoded.consumed as u64;

        if decoded.malformed > 0 {
            warn!(
                path = %self.path.display(),
                lines = decoded.malformed,
                "Skipping malformed buffer lines"
            );
            self.malformed += decoded.malformed as u64;
        }

        let mut records = Vec::with_capacity(decoded.frames.len());
        for frame in decoded.frames {
            match frame {
                Frame::Record(record) => records.push(record),
                Frame::End => self.ended = true,
            }
        }
        self.records_read += records.len() as u64;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::codec::{encode, encode_end};
    use std::io::Write;
    use tempfile::TempDir;

    fn append(path: &Path, bytes: &[u8]) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(bytes).unwrap();
    }

    fn line(msg: &str) -> Vec<u8> {
        encode(&LogRecord::capture(msg)).unwrap()
    }

    fn messages(records: &[LogRecord]) -> Vec<&str> {
        records.iter().map(|r| r.message.as_str()).collect()
    }

    #[tokio::test]
    async fn test_missing_file_is_nothing_new() {
        let dir = TempDir::new().unwrap();
        let mut tailer = OffsetTailer::new(dir.path().join("absent.log"));
        assert!(tailer.poll().await.unwrap().is_empty());
        assert_eq!(tailer.offset(), 0);
    }

    #[tokio::test]
    async fn test_reads_only_new_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.log");
        let mut tailer = OffsetTailer::new(&path);

        append(&path, &line("one"));
        append(&path, &line("two"));
        assert_eq!(messages(&tailer.poll().await.unwrap()), vec!["one", "two"]);
        let after_two = tailer.offset();

        assert!(tailer.poll().await.unwrap().is_empty());
        assert_eq!(tailer.offset(), after_two);

        append(&path, &line("three"));
        assert_eq!(messages(&tailer.poll().await.unwrap()), vec!["three"]);
        assert!(tailer.offset() > after_two);
        assert_eq!(tailer.records_read(), 3);
    }

    #[tokio::test]
    async fn test_partial_line_waits_for_completion() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.log");
        let mut tailer = OffsetTailer::new(&path);

        let third = line("three");
        let (head, tail) = third.split_at(third.len() / 2);
        append(&path, &line("one"));
        append(&path, &line("two"));
        append(&path, head);

        assert_eq!(messages(&tailer.poll().await.unwrap()), vec!["one", "two"]);
        let offset = tailer.offset();
        assert_eq!(offset, (line("one").len() + line("two").len()) as u64);

        append(&path, tail);
        assert_eq!(messages(&tailer.poll().await.unwrap()), vec!["three"]);
        assert_eq!(tailer.offset(), offset + third.len() as u64);
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped_and_consumed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.log");
        let mut tailer = OffsetTailer::new(&path);

        append(&path, &line("good"));
        append(&path, b"{not json}\n");
        append(&path, &line("also good"));

        assert_eq!(messages(&tailer.poll().await.unwrap()), vec!["good", "also good"]);
        assert_eq!(tailer.malformed(), 1);
        assert!(tailer.poll().await.unwrap().is_empty());
        assert_eq!(tailer.malformed(), 1);
    }

    #[tokio::test]
    async fn test_stops_reading_after_end_marker() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.log");
        let mut tailer = OffsetTailer::new(&path);

        append(&path, &line("last"));
        append(&path, &encode_end());
        append(&path, &line("stray"));

        assert_eq!(messages(&tailer.poll().await.unwrap()), vec!["last"]);
        assert!(tailer.ended());
        let offset = tailer.offset();

        append(&path, &line("more"));
        assert!(tailer.poll().await.unwrap().is_empty());
        assert_eq!(tailer.offset(), offset);
    }
}
