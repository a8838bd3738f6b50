//! Logical response line assembly
//!
//! IMAP responses are CRLF-terminated lines, except that a literal
//! marker `{N}` immediately before the CRLF means the next N bytes are
//! raw payload and the line continues after them. This reader turns a
//! byte stream into logical lines with the literal payloads embedded
//! at their wire positions.

use crate::error::{Error, Result};
use std::io::Read;
use std::ops::Range;

/// One assembled logical response line.
///
/// `bytes` holds the full line (embedded `{N}\r\n<payload>` sequences
/// included) without the terminating CRLF; `literals` are the byte
/// ranges of each literal payload within `bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub bytes: Vec<u8>,
    pub literals: Vec<Range<usize>>,
}

/// Incremental line reader over a byte stream.
#[derive(Debug, Default)]
pub struct LineReader {
    buffer: Vec<u8>,
    /// Offset of unconsumed data within `buffer`.
    start: usize,
    /// Maximum accepted literal length; `None` means unbounded.
    max_literal: Option<usize>,
}

impl LineReader {
    #[must_use]
    pub fn new(max_literal: Option<usize>) -> Self {
        Self {
            buffer: Vec::new(),
            start: 0,
            max_literal,
        }
    }

    /// Read one logical line from `stream`.
    pub fn read_line(&mut self, stream: &mut impl Read) -> Result<ResponseLine> {
        let mut line = Vec::new();
        let mut literals = Vec::new();

        loop {
            let eol = self.read_physical_line(stream, &mut line)?;
            match literal_length(&line[..eol]) {
                None => {
                    line.truncate(eol);
                    return Ok(ResponseLine {
                        bytes: line,
                        literals,
                    });
                }
                Some(length) => {
                    let length = length?;
                    if self.max_literal.is_some_and(|max| length > max) {
                        return Err(Error::Protocol(format!(
                            "literal of {length} bytes exceeds configured maximum"
                        )));
                    }
                    let payload_start = line.len();
                    self.read_exact_into(stream, length, &mut line)?;
                    literals.push(payload_start..payload_start + length);
                }
            }
        }
    }

    /// Append one physical line (including its CRLF) to `out` and
    /// return the offset of the CR.
    fn read_physical_line(&mut self, stream: &mut impl Read, out: &mut Vec<u8>) -> Result<usize> {
        let mut scanned = 0;
        loop {
            let pending = &self.buffer[self.start + scanned..];
            if let Some(pos) = memchr::memchr(b'\n', pending) {
                let absolute = scanned + pos;
                if absolute == 0 || self.buffer[self.start + absolute - 1] != b'\r' {
                    return Err(Error::Protocol("bare LF in response stream".into()));
                }
                let eol = out.len() + absolute - 1;
                out.extend_from_slice(&self.buffer[self.start..=self.start + absolute]);
                self.consume(absolute + 1);
                return Ok(eol);
            }
            scanned = self.buffer.len() - self.start;
            self.fill(stream)?;
        }
    }

    /// Move exactly `length` bytes from the stream into `out`.
    fn read_exact_into(
        &mut self,
        stream: &mut impl Read,
        length: usize,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        while self.buffer.len() - self.start < length {
            self.fill(stream)?;
        }
        out.extend_from_slice(&self.buffer[self.start..self.start + length]);
        self.consume(length);
        Ok(())
    }

    fn fill(&mut self, stream: &mut impl Read) -> Result<()> {
        // Reclaim consumed space before growing.
        if self.start > 0 {
            self.buffer.drain(..self.start);
            self.start = 0;
        }
        let mut chunk = [0u8; 8192];
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(Error::Protocol("connection closed mid-response".into()));
        }
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    fn consume(&mut self, n: usize) {
        self.start += n;
        if self.start == self.buffer.len() {
            self.buffer.clear();
            self.start = 0;
        }
    }
}

/// If the physical line ends with `{N}`, the parsed N.
///
/// Returns `None` when the line carries no literal marker, and
/// `Some(Err(..))` when a marker is present but malformed.
fn literal_length(line: &[u8]) -> Option<Result<usize>> {
    if line.last() != Some(&b'}') {
        return None;
    }
    let open = memchr::memrchr(b'{', line)?;
    let digits = &line[open + 1..line.len() - 1];
    if digits.is_empty() {
        return Some(Err(Error::Protocol("empty literal length".into())));
    }
    match std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
    {
        Some(n) => Some(Ok(n)),
        None => Some(Err(Error::Protocol(format!(
            "malformed literal length {:?}",
            String::from_utf8_lossy(digits)
        )))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_one(input: &[u8]) -> Result<ResponseLine> {
        LineReader::new(None).read_line(&mut Cursor::new(input.to_vec()))
    }

    #[test]
    fn simple_line() {
        let line = read_one(b"* OK IMAP ready\r\n").unwrap();
        assert_eq!(line.bytes, b"* OK IMAP ready");
        assert!(line.literals.is_empty());
    }

    #[test]
    fn line_with_literal() {
        let line = read_one(b"* 1 FETCH (BODY[] {5}\r\nhello)\r\n").unwrap();
        assert_eq!(line.bytes, b"* 1 FETCH (BODY[] {5}\r\nhello)");
        assert_eq!(line.literals, vec![23..28]);
        assert_eq!(&line.bytes[line.literals[0].clone()], b"hello");
    }

    #[test]
    fn literal_may_contain_crlf_and_braces() {
        let line = read_one(b"* 2 FETCH (BODY[] {9}\r\na\r\nb{3}\r. done)\r\n").unwrap();
        assert_eq!(&line.bytes[line.literals[0].clone()], b"a\r\nb{3}\r.");
    }

    #[test]
    fn multiple_literals_on_one_line() {
        let line = read_one(b"* LIST () {1}\r\n/ {3}\r\nBox\r\n").unwrap();
        assert_eq!(line.literals.len(), 2);
        assert_eq!(&line.bytes[line.literals[1].clone()], b"Box");
    }

    #[test]
    fn successive_lines_from_one_stream() {
        let mut reader = LineReader::new(None);
        let mut stream = Cursor::new(b"* 1 EXISTS\r\n* 2 RECENT\r\n".to_vec());
        assert_eq!(reader.read_line(&mut stream).unwrap().bytes, b"* 1 EXISTS");
        assert_eq!(reader.read_line(&mut stream).unwrap().bytes, b"* 2 RECENT");
    }

    #[test]
    fn eof_mid_line_is_protocol_error() {
        let err = read_one(b"* OK truncated").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn eof_mid_literal_is_protocol_error() {
        let err = read_one(b"* 1 FETCH (BODY[] {100}\r\nshort\r\n").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn oversized_literal_is_rejected() {
        let mut reader = LineReader::new(Some(4));
        let err = reader
            .read_line(&mut Cursor::new(b"* 1 FETCH {10}\r\n0123456789\r\n".to_vec()))
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn malformed_literal_length_is_rejected() {
        assert!(read_one(b"* 1 FETCH {1x}\r\n").is_err());
    }
}
