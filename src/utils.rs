//! Byte accounting for pack transfers.

use std::{
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use tokio::io::AsyncWrite;

/// Outcome of one streamed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStatus {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TransferStatus {
    /// Average throughput in bytes per second.
    pub fn rate(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return self.bytes;
        }
        (self.bytes as f64 / secs) as u64
    }
}

/// A lightweight wrapper that counts bytes written to the underlying writer.
pub struct CountingWriter<W> {
    pub inner: W,
    pub bytes_written: u64,
    started: Instant,
}

impl<W> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            bytes_written: 0,
            started: Instant::now(),
        }
    }

    pub fn status(&self) -> TransferStatus {
        TransferStatus {
            bytes: self.bytes_written,
            elapsed: self.started.elapsed(),
        }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CountingWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            self.bytes_written += n as u64;
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
