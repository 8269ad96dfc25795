//! Line-level protocol I/O
//!
//! This module provides:
//! - `parse_line` for classifying one stdout line
//! - `LineReader` for streaming line reads with a reused buffer

use std::io::{BufRead, BufReader, Read};

use super::envelope::Envelope;

/// Result of classifying one line from the child's stdout
#[derive(Debug)]
pub enum ParseResult {
    /// A well-formed envelope (the payload is not inspected yet)
    Ok(Envelope),
    /// Valid JSON, but not `{seq, type, data}`
    NotEnvelope { error: String },
    /// Not JSON at all (plain text the script printed directly)
    ParseError(serde_json::Error),
}

/// Classify a line.
///
/// Parses to `serde_json::Value` once, then converts, so plain text and
/// foreign JSON are told apart without a second parse.
pub fn parse_line(line: &str) -> ParseResult {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return ParseResult::ParseError(e),
    };
    match serde_json::from_value::<Envelope>(value) {
        Ok(envelope) => ParseResult::Ok(envelope),
        Err(e) => ParseResult::NotEnvelope {
            error: e.to_string(),
        },
    }
}

/// Reads non-empty lines, reusing one buffer
pub struct LineReader<R: Read> {
    reader: BufReader<R>,
    buffer: Vec<u8>,
}

impl<R: Read> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buffer: Vec::with_capacity(1024),
        }
    }

    /// Next line with its line ending removed; `Ok(None)` at end of stream.
    /// Blank lines are skipped. Invalid UTF-8 is replaced, not an error.
    pub fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            self.buffer.clear();
            if self.reader.read_until(b'\n', &mut self.buffer)? == 0 {
                return Ok(None);
            }
            let text = String::from_utf8_lossy(&self.buffer);
            let line = text.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(line.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_envelope() {
        match parse_line(r#"{"seq":1,"type":"output","data":"{}"}"#) {
            ParseResult::Ok(envelope) => assert_eq!(envelope.message_type, "output"),
            other => panic!("expected envelope, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_text_is_parse_error() {
        assert!(matches!(
            parse_line("Unhandled exception. System.Exception"),
            ParseResult::ParseError(_)
        ));
    }

    #[test]
    fn test_foreign_json_is_not_envelope() {
        assert!(matches!(
            parse_line(r#"{"type":"output"}"#),
            ParseResult::NotEnvelope { .. }
        ));
        // data must be a string
        assert!(matches!(
            parse_line(r#"{"seq":1,"type":"output","data":{"body":"x"}}"#),
            ParseResult::NotEnvelope { .. }
        ));
    }

    #[test]
    fn test_line_reader_skips_blanks_and_strips_endings() {
        let mut reader = LineReader::new(Cursor::new("first\r\n\n  \nsecond\nlast"));
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("first"));
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("second"));
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("last"));
        assert_eq!(reader.next_line().unwrap(), None);
    }

    #[test]
    fn test_line_reader_tolerates_invalid_utf8() {
        let mut reader = LineReader::new(Cursor::new(b"ok\xff\n".to_vec()));
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("ok\u{fffd}"));
    }
}
