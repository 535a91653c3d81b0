//! Framed I/O: CRLF lines with `{n}` literals.

#![allow(clippy::missing_errors_doc)]

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Error, Result};

const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Longest accepted line.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Largest literal buffered in memory. Streamed literals are not bounded.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024;

/// Buffered IMAP connection.
pub struct FramedStream<S> {
    reader: BufReader<S>,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
        }
    }

    /// Reads one complete response, literals included.
    pub async fn read_response(&mut self) -> Result<Vec<u8>> {
        let mut response = Vec::new();
        loop {
            let line = self.read_line().await?;
            response.extend_from_slice(&line);

            match parse_literal_length(&line) {
                Some(len) => {
                    let literal = self.read_literal(len).await?;
                    response.extend_from_slice(&literal);
                }
                None => break,
            }
        }
        Ok(response)
    }

    /// Reads one CRLF-terminated line, CRLF included.
    ///
    /// A bare LF does not end the line.
    pub async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            let budget = (MAX_LINE_LENGTH + 1).saturating_sub(line.len()) as u64;
            let n = (&mut self.reader)
                .take(budget)
                .read_until(b'\n', &mut line)
                .await?;
            if n == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }
            if line.ends_with(b"\r\n") {
                return Ok(line);
            }
            if line.len() > MAX_LINE_LENGTH {
                return Err(Error::Protocol("line too long".to_string()));
            }
        }
    }

    /// Reads exactly `len` literal bytes into memory.
    pub async fn read_literal(&mut self, len: usize) -> Result<Vec<u8>> {
        if len > MAX_LITERAL_SIZE {
            return Err(Error::Protocol(format!(
                "literal too large: {len} bytes (max {MAX_LITERAL_SIZE})"
            )));
        }
        let mut literal = vec![0u8; len];
        self.reader.read_exact(&mut literal).await?;
        Ok(literal)
    }

    /// Copies exactly `len` literal bytes into `sink` without buffering them.
    ///
    /// A slow sink throttles reads from the socket.
    pub async fn stream_literal<W>(&mut self, len: usize, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let expected = len as u64;
        let mut limited = (&mut self.reader).take(expected);
        let copied = tokio::io::copy(&mut limited, sink).await?;
        if copied != expected {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("literal truncated after {copied} of {expected} bytes"),
            )));
        }
        Ok(copied)
    }

    /// Writes a serialized command and flushes.
    pub async fn write_command(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Returns the inner stream. Buffered input is lost.
    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }
}

/// Returns `n` when `line` ends with a literal prefix `{n}` or `{n+}`.
pub(crate) fn parse_literal_length(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n")?;
    let line = line.strip_suffix(b"}")?;
    let line = line.strip_suffix(b"+").unwrap_or(line);
    let open = line.iter().rposition(|&b| b == b'{')?;
    let digits = &line[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// True when `line` is the tagged completion for `tag`.
pub(crate) fn is_tagged_line(line: &[u8], tag: &str) -> bool {
    line.strip_prefix(tag.as_bytes())
        .is_some_and(|rest| rest.first() == Some(&b' '))
}

/// Collects responses up to the tagged completion of one command.
pub struct ResponseAccumulator {
    tag: String,
}

impl ResponseAccumulator {
    /// Creates an accumulator for `tag`.
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }

    /// Reads responses until the tagged one, which is included last.
    pub async fn read_until_tagged<S>(
        &self,
        framed: &mut FramedStream<S>,
    ) -> Result<Vec<Vec<u8>>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut responses = Vec::new();
        loop {
            let response = framed.read_response().await?;
            let done = is_tagged_line(&response, &self.tag);
            responses.push(response);
            if done {
                return Ok(responses);
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use tokio_test::io::Builder;

    use super::*;

    #[test]
    fn test_parse_literal_length() {
        assert_eq!(parse_literal_length(b"BODY[2] {123}\r\n"), Some(123));
        assert_eq!(parse_literal_length(b"BODY {123+}\r\n"), Some(123));
        assert_eq!(parse_literal_length(b"{0}\r\n"), Some(0));
        assert_eq!(parse_literal_length(b"no literal\r\n"), None);
        assert_eq!(parse_literal_length(b"incomplete {123"), None);
        assert_eq!(parse_literal_length(b"wrong {abc}\r\n"), None);
        assert_eq!(parse_literal_length(b"empty {}\r\n"), None);
    }

    #[test]
    fn test_is_tagged_line() {
        assert!(is_tagged_line(b"A0003 OK done\r\n", "A0003"));
        assert!(!is_tagged_line(b"A00031 OK done\r\n", "A0003"));
        assert!(!is_tagged_line(b"* OK\r\n", "A0003"));
    }

    #[tokio::test]
    async fn test_read_line_split_crlf() {
        let mock = Builder::new().read(b"* OK ready\r").read(b"\n").build();
        let mut framed = FramedStream::new(mock);
        assert_eq!(framed.read_line().await.unwrap(), b"* OK ready\r\n");
    }

    #[tokio::test]
    async fn test_read_response_with_literal() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (BODY[TEXT] {5}\r\n")
            .read(b"hel")
            .read(b"lo)\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let response = framed.read_response().await.unwrap();
        assert_eq!(response, b"* 1 FETCH (BODY[TEXT] {5}\r\nhello)\r\n");
    }

    #[tokio::test]
    async fn test_stream_literal_into_sink() {
        let mock = Builder::new()
            .read(b"abc")
            .read(b"defg)\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let mut sink = Vec::new();
        let copied = framed.stream_literal(7, &mut sink).await.unwrap();
        assert_eq!(copied, 7);
        assert_eq!(sink, b"abcdefg");
        assert_eq!(framed.read_line().await.unwrap(), b")\r\n");
    }

    #[tokio::test]
    async fn test_stream_literal_truncated() {
        let mock = Builder::new().read(b"abc").build();
        let mut framed = FramedStream::new(mock);
        let mut sink = Vec::new();
        assert!(framed.stream_literal(10, &mut sink).await.is_err());
    }

    #[tokio::test]
    async fn test_eof_is_error() {
        let mock = Builder::new().read(b"* OK").build();
        let mut framed = FramedStream::new(mock);
        assert!(framed.read_line().await.is_err());
    }

    #[tokio::test]
    async fn test_response_accumulator() {
        let mock = Builder::new()
            .read(b"* 2 EXISTS\r\n")
            .read(b"* OK [UIDNEXT 9] next\r\n")
            .read(b"A0001 OK Success\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let responses = ResponseAccumulator::new("A0001")
            .read_until_tagged(&mut framed)
            .await
            .unwrap();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[2], b"A0001 OK Success\r\n");
    }
}
