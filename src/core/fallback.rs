//! Byte-replay wrapper for the fallback path
//!
//! When a handshake is rejected, the bytes already consumed must reach the
//! fallback handler as if they were never read. `ReplayStream` serves the
//! consumed prefix first and then reads from the live stream; the handler
//! cannot distinguish it from a freshly accepted connection.

use bytes::Bytes;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pin_project! {
    /// Stream wrapper that replays a prefix of already-consumed bytes.
    pub struct ReplayStream<S> {
        #[pin]
        inner: S,
        head: Bytes,
    }
}

impl<S> ReplayStream<S> {
    pub fn new(inner: S, head: Bytes) -> Self {
        Self { inner, head }
    }

    /// Bytes still pending replay.
    pub fn remaining_head(&self) -> usize {
        self.head.len()
    }
}

impl<S: AsyncRead> AsyncRead for ReplayStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.project();
        if !this.head.is_empty() {
            let n = this.head.len().min(buf.remaining());
            buf.put_slice(&this.head.split_to(n));
            return Poll::Ready(Ok(()));
        }
        this.inner.poll_read(cx, buf)
    }
}

impl<S: AsyncWrite> AsyncWrite for ReplayStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
