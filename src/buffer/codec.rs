use crate::record::LogRecord;
use thiserror::Error;

/// Sentinel line appended once capture has completed.
pub const END_MARKER: &str = "EOF";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One complete line of the buffer file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Record(LogRecord),
    End,
}

/// Result of decoding the complete lines of a chunk read from the buffer.
#[derive(Debug, Default)]
pub struct Decoded {
    pub frames: Vec<Frame>,
    /// Bytes of the chunk that belong to complete lines. Anything past this
    /// is a partially written record and must be read again later.
    pub consumed: usize,
    /// Complete lines that were not valid records
    pub malformed: usize,
}

/// Encode a record as a single newline-terminated JSON line.
pub fn encode(record: &LogRecord) -> Result<Vec<u8>, CodecError> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    Ok(line)
}

pub fn encode_end() -> Vec<u8> {
    format!("{}\n", END_MARKER).into_bytes()
}

/// Decode every complete line in `chunk`.
///
/// The trailing segment after the last `\n` is left unconsumed. Decoding
/// stops after the end marker; bytes behind it are consumed but ignored.
pub fn decode_complete(chunk: &[u8]) -> Decoded {
    let mut decoded = Decoded::default();

    let complete_len = match chunk.iter().rposition(|&b| b == b'\n') {
        Some(pos) => pos + 1,
        None => return decoded,
    };

    let mut start = 0;
    while start < complete_len {
        let end = chunk[start..complete_len]
            .iter()
            .position(|&b| b == b'\n')
            .map(|pos| start + pos)
            .unwrap_or(complete_len - 1);
        let line = trim_cr(&chunk[start..end]);
        start = end + 1;

        if line.is_empty() {
            continue;
        }

        if line == END_MARKER.as_bytes() {
            decoded.frames.push(Frame::End);
            start = complete_len;
            break;
        }

        match serde_json::from_slice::<LogRecord>(line) {
            Ok(record) => decoded.frames.push(Frame::Record(record)),
            Err(_) => decoded.malformed += 1,
        }
    }

    decoded.consumed = start;
    decoded
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Level;

    fn record(msg: &str) -> LogRecord {
        LogRecord::capture(msg)
    }

    fn messages(decoded: &Decoded) -> Vec<String> {
        decoded
            .frames
            .iter()
            .filter_map(|f| match f {
                Frame::Record(r) => Some(r.message.clone()),
                Frame::End => None,
            })
            .collect()
    }

    #[test]
    fn test_encode_is_one_line() {
        let bytes = encode(&record("multi\nline message")).unwrap();
        assert_eq!(bytes.iter().filter(|&&b| b == b'\n').count(), 1);
        assert_eq!(bytes.last(), Some(&b'\n'));
    }

    #[test]
    fn test_decode_complete_lines() {
        let mut chunk = encode(&record("first")).unwrap();
        chunk.extend(encode(&record("error second")).unwrap());

        let decoded = decode_complete(&chunk);
        assert_eq!(messages(&decoded), vec!["first", "error second"]);
        assert_eq!(decoded.consumed, chunk.len());
        assert_eq!(decoded.malformed, 0);
        match &decoded.frames[1] {
            Frame::Record(r) => assert_eq!(r.level, Level::Error),
            Frame::End => panic!("unexpected end marker"),
        }
    }

    #[test]
    fn test_partial_trailing_record_is_not_consumed() {
        let first = encode(&record("complete")).unwrap();
        let second = encode(&record("partial")).unwrap();
        let mut chunk = first.clone();
        chunk.extend(&second[..second.len() / 2]);

        let decoded = decode_complete(&chunk);
        assert_eq!(messages(&decoded), vec!["complete"]);
        assert_eq!(decoded.consumed, first.len());
    }

    #[test]
    fn test_no_newline_consumes_nothing() {
        let line = encode(&record("pending")).unwrap();
        let decoded = decode_complete(&line[..line.len() - 1]);
        assert!(decoded.frames.is_empty());
        assert_eq!(decoded.consumed, 0);
    }

    #[test]
    fn test_malformed_complete_line_is_skipped() {
        let mut chunk = b"not json at all\n".to_vec();
        chunk.extend(encode(&record("after garbage")).unwrap());

        let decoded = decode_complete(&chunk);
        assert_eq!(messages(&decoded), vec!["after garbage"]);
        assert_eq!(decoded.malformed, 1);
        assert_eq!(decoded.consumed, chunk.len());
    }

    #[test]
    fn test_end_marker_stops_decoding() {
        let mut chunk = encode(&record("last")).unwrap();
        chunk.extend(encode_end());
        chunk.extend(encode(&record("ignored")).unwrap());

        let decoded = decode_complete(&chunk);
        assert_eq!(decoded.frames.len(), 2);
        assert_eq!(decoded.frames[1], Frame::End);
        assert_eq!(messages(&decoded), vec!["last"]);
        assert_eq!(decoded.consumed, chunk.len());
    }

    #[test]
    fn test_message_equal_to_marker_is_still_a_record() {
        // The message is JSON-encoded, so it never collides with the sentinel line
        let chunk = encode(&record(END_MARKER)).unwrap();
        let decoded = decode_complete(&chunk);
        assert_eq!(messages(&decoded), vec![END_MARKER]);
    }
}
