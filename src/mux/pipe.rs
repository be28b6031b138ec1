//! Adapter making a (reader, writer) pair look like one connection
// (c) 2026 Dolt Authors

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Glues an independent reader and writer (a subprocess's stdout/stdin, or
/// the server's own stdio) into the single bidirectional connection the mux
/// expects.
///
/// Shutdown is deliberately a flush-only no-op: actually closing either
/// underlying pipe tears down the ssh session immediately, before the mux
/// has drained. Termination is driven by process exit upstream, never by
/// this adapter.
#[derive(Debug)]
pub struct PipeConn<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> PipeConn<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl<R, W> AsyncRead for PipeConn<R, W>
where
    R: AsyncRead + Unpin,
    W: Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl<R, W> AsyncWrite for PipeConn<R, W>
where
    R: Unpin,
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        // Flush, but leave the pipe open. See the type-level comment.
        Pin::new(&mut self.writer).poll_flush(cx)
    }
}
