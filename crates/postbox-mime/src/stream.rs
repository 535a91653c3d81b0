//! Streaming transfer decoding.
//!
//! [`Base64Decoder`] sits in front of any [`AsyncWrite`] sink and decodes
//! Base64 text as it is written, so a large attachment never has to be held
//! in memory. Whitespace and line breaks in the input are skipped, and input
//! may be split anywhere, including inside a four-character group.
//!
//! The decoder only knows the input has ended when it is shut down:
//! leftover characters are decoded then, and the inner sink is flushed and
//! shut down after them. Treat the data as complete only once
//! `shutdown()` has returned.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::AsyncWrite;

/// Decodes Base64 written to it and forwards the bytes to `W`.
#[derive(Debug)]
pub struct Base64Decoder<W> {
    inner: W,
    /// Up to three characters of an incomplete group.
    carry: Vec<u8>,
    /// Decoded bytes not yet accepted by `inner`.
    out: Vec<u8>,
    out_pos: usize,
    finished: bool,
    decoded: u64,
}

impl<W> Base64Decoder<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wraps `inner`.
    pub const fn new(inner: W) -> Self {
        Self {
            inner,
            carry: Vec::new(),
            out: Vec::new(),
            out_pos: 0,
            finished: false,
            decoded: 0,
        }
    }

    /// Number of decoded bytes produced so far.
    #[must_use]
    pub const fn decoded_len(&self) -> u64 {
        self.decoded
    }

    /// Returns the inner sink.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Writes buffered output to `inner` until it is all accepted.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.out_pos < self.out.len() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.out[self.out_pos..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.out_pos += n;
        }
        self.out.clear();
        self.out_pos = 0;
        Poll::Ready(Ok(()))
    }

    /// Decodes every complete group in `carry` plus `input`.
    fn decode_input(&mut self, input: &[u8]) -> io::Result<()> {
        for &byte in input {
            if byte.is_ascii_whitespace() {
                continue;
            }
            self.carry.push(byte);
            if self.carry.len() == 4 {
                self.decode_group()?;
            }
        }
        Ok(())
    }

    fn decode_group(&mut self) -> io::Result<()> {
        let mut buf = [0u8; 3];
        let n = STANDARD
            .decode_slice(&self.carry, &mut buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.out.extend_from_slice(&buf[..n]);
        self.decoded += n as u64;
        self.carry.clear();
        Ok(())
    }

    /// Decodes an unpadded trailing group.
    fn decode_tail(&mut self) -> io::Result<()> {
        match self.carry.len() {
            0 => Ok(()),
            1 => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "truncated base64 input",
            )),
            _ => {
                self.carry.resize(4, b'=');
                self.decode_group()
            }
        }
    }
}

impl<W> AsyncWrite for Base64Decoder<W>
where
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write after shutdown",
            )));
        }
        // Output from the previous write must be accepted before taking more.
        ready!(this.poll_drain(cx))?;
        this.decode_input(buf)?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.finished {
            ready!(this.poll_drain(cx))?;
            this.decode_tail()?;
            this.finished = true;
        }
        ready!(this.poll_drain(cx))?;
        ready!(Pin::new(&mut this.inner).poll_flush(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
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
    use proptest::prelude::*;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::encoding::{encode_base64, encode_base64_wrapped};

    async fn decode_in_chunks(encoded: &[u8], chunk: usize) -> io::Result<Vec<u8>> {
        let mut decoder = Base64Decoder::new(Vec::new());
        for piece in encoded.chunks(chunk.max(1)) {
            decoder.write_all(piece).await?;
        }
        decoder.shutdown().await?;
        Ok(decoder.into_inner())
    }

    #[tokio::test]
    async fn test_decodes_split_groups() {
        let decoded = decode_in_chunks(b"SGVs\r\nbG8s IFdv\ncmxkIQ==", 3).await.unwrap();
        assert_eq!(decoded, b"Hello, World!");
    }

    #[tokio::test]
    async fn test_unpadded_tail() {
        let decoded = decode_in_chunks(b"aGk", 2).await.unwrap();
        assert_eq!(decoded, b"hi");
    }

    #[tokio::test]
    async fn test_concatenated_padded_groups() {
        let decoded = decode_in_chunks(b"aA==aQ==", 8).await.unwrap();
        assert_eq!(decoded, b"hi");
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let err = decode_in_chunks(b"ab$d", 4).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let err = decode_in_chunks(b"aGVsb", 5).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_slow_sink_receives_everything() {
        let mock = tokio_test::io::Builder::new()
            .write(b"He")
            .write(b"llo")
            .build();
        let mut decoder = Base64Decoder::new(mock);
        decoder.write_all(b"SGVs").await.unwrap();
        decoder.write_all(b"bG8=").await.unwrap();
        decoder.shutdown().await.unwrap();
        assert_eq!(decoder.decoded_len(), 5);
    }

    #[tokio::test]
    async fn test_write_after_shutdown() {
        let mut decoder = Base64Decoder::new(Vec::new());
        decoder.shutdown().await.unwrap();
        assert!(decoder.write_all(b"aGk=").await.is_err());
    }

    proptest! {
        #[test]
        fn prop_round_trip(data in proptest::collection::vec(any::<u8>(), 0..2048), chunk in 1usize..97, wrapped in any::<bool>()) {
            let encoded = if wrapped { encode_base64_wrapped(&data) } else { encode_base64(&data) };
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let decoded = rt.block_on(decode_in_chunks(encoded.as_bytes(), chunk)).unwrap();
            prop_assert_eq!(decoded, data);
        }
    }
}
