//! Buffered line I/O for the worker IPC channel.
//!
//! Both ends of the channel (master side in [`CommandSpawner`](super::CommandSpawner),
//! child side in [`WorkerChannel`](crate::WorkerChannel)) speak newline-delimited
//! JSON over a Unix socket; these wrappers handle framing only.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

/// Default buffer size for IPC (64KB).
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Longest accepted line (1 MiB). Longer lines are dropped, never buffered whole.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Buffered line reader with a length cap.
///
/// Over-long lines and lines that are not UTF-8 are logged and skipped; the
/// channel stays open.
pub struct LineReader<R> {
    inner: R,
    codec: LinesCodec,
    buf: BytesMut,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_length(inner, MAX_LINE_LENGTH)
    }

    pub fn with_max_length(inner: R, max_length: usize) -> Self {
        Self {
            inner,
            codec: LinesCodec::new_with_max_length(max_length),
            buf: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE.min(max_length.saturating_add(1))),
            eof: false,
        }
    }

    /// Reads the next non-blank line, without its terminator.
    /// Returns `None` on EOF.
    ///
    /// Cancel safe.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let decoded = if self.eof {
                self.codec.decode_eof(&mut self.buf)
            } else {
                self.codec.decode(&mut self.buf)
            };
            match decoded {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Ok(Some(line)),
                Ok(None) if self.eof => return Ok(None),
                Ok(None) => {}
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    tracing::warn!(max = self.codec.max_length(), "dropping over-long line");
                    continue;
                }
                Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    tracing::warn!(error = %e, "dropping line that is not valid UTF-8");
                    continue;
                }
                Err(LinesCodecError::Io(e)) => return Err(e),
            }

            self.buf.reserve(DEFAULT_BUFFER_SIZE);
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                self.eof = true;
            }
        }
    }
}

/// Line writer; every write is flushed.
pub struct LineWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write a line (appends newline if not present) and flush.
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.inner.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            self.inner.write_all(b"\n").await?;
        }
        self.inner.flush().await
    }

    /// Shuts down the write direction; the peer observes EOF.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}
