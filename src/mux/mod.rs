//! Stream multiplexing over one bidirectional byte pipe
// (c) 2026 Dolt Authors
//!
//! A [`MuxSession`] frames a single byte pipe (in practice: an ssh
//! subprocess's stdin/stdout) into many independent, ordered substreams with
//! per-stream flow control. A slow reader on one substream cannot stall its
//! siblings. The framing itself is yamux; this module owns the session
//! lifecycle contract the transport depends on:
//!
//! * `open_stream` / `accept_stream` — one substream per RPC call or HTTP
//!   request, created by one side and accepted by the other;
//! * both the session receive window and the per-stream buffer are enlarged
//!   to [`MAX_RPC_MESSAGE_SIZE`] — default-sized buffers deadlock under
//!   large chunk-batch messages;
//! * any I/O error on the underlying pipe fails the session and every
//!   in-flight substream with [`SessionClosed`]; this is how subprocess
//!   death propagates to blocked callers;
//! * a closed-signal that fires exactly once when the session terminates.
//!
//! The connection is driven by a single task; that task doubles as the EOF
//! detector, so the pipe is continuously read even when no caller is
//! waiting on a substream.

use std::collections::VecDeque;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use yamux::{Config, Connection, ConnectionError, Mode};

use crate::protocol::MAX_RPC_MESSAGE_SIZE;

mod pipe;
pub use pipe::PipeConn;

/// One multiplexed substream: a reliable, ordered, bidirectional byte
/// channel. Owned by exactly one request at a time; closing it does not
/// affect the session or any sibling stream.
pub type MuxStream = Compat<yamux::Stream>;

/// The session (or the pipe under it) is gone. Every operation on a dead
/// session returns this; it is the signal the client's error triage keys on.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("mux session closed")]
pub struct SessionClosed;

fn session_config() -> Config {
    let mut config = Config::default();
    // Both limits must admit the largest RPC message the chunk-store
    // protocol emits.
    #[allow(clippy::cast_possible_truncation)]
    config.set_receive_window(MAX_RPC_MESSAGE_SIZE as u32);
    config.set_max_buffer_size(MAX_RPC_MESSAGE_SIZE);
    config
}

enum Command {
    Open(oneshot::Sender<Result<yamux::Stream, ConnectionError>>),
    Close,
}

/// A multiplexed session over one bidirectional byte pipe.
///
/// Construct with [`client`](MuxSession::client) on the side that opens
/// substreams and [`server`](MuxSession::server) on the side that accepts
/// them. The session spawns its own driver task; dropping the session (or
/// calling [`close`](MuxSession::close)) terminates it.
pub struct MuxSession {
    cmds: mpsc::UnboundedSender<Command>,
    incoming: Mutex<mpsc::UnboundedReceiver<yamux::Stream>>,
    closed: CancellationToken,
}

impl MuxSession {
    /// Starts a client-side session over `conn`.
    pub fn client<C>(conn: C) -> Self
    where
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::start(conn, Mode::Client)
    }

    /// Starts a server-side session over `conn`.
    pub fn server<C>(conn: C) -> Self
    where
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::start(conn, Mode::Server)
    }

    fn start<C>(conn: C, mode: Mode) -> Self
    where
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let connection = Connection::new(conn.compat(), session_config(), mode);
        let (cmds, cmd_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        drop(tokio::spawn(drive(
            connection,
            cmd_rx,
            inbound_tx,
            closed.clone(),
        )));
        Self {
            cmds,
            incoming: Mutex::new(inbound_rx),
            closed,
        }
    }

    /// Opens a new substream towards the peer.
    pub async fn open_stream(&self) -> Result<MuxStream, SessionClosed> {
        let (reply, response) = oneshot::channel();
        self.cmds
            .send(Command::Open(reply))
            .map_err(|_| SessionClosed)?;
        match response.await {
            Ok(Ok(stream)) => Ok(stream.compat()),
            Ok(Err(error)) => {
                trace!("open_stream failed: {error}");
                Err(SessionClosed)
            }
            Err(_) => Err(SessionClosed),
        }
    }

    /// Returns the next substream the peer opened.
    ///
    /// Blocks until one arrives or the session terminates. On the opening
    /// side of the tunnel this never yields a stream; it unblocks with
    /// [`SessionClosed`] the moment the session dies, which makes it a
    /// serviceable remote-exit monitor.
    pub async fn accept_stream(&self) -> Result<MuxStream, SessionClosed> {
        let mut incoming = self.incoming.lock().await;
        incoming
            .recv()
            .await
            .map(FuturesAsyncReadCompatExt::compat)
            .ok_or(SessionClosed)
    }

    /// Closes the session and waits for the driver to wind down.
    ///
    /// Terminal: subsequent opens and accepts return [`SessionClosed`], and
    /// every in-flight substream fails. Dropping the session's pipe writer
    /// happens here too, which is the peer's EOF cue.
    pub async fn close(&self) {
        let _ = self.cmds.send(Command::Close);
        self.closed.cancelled().await;
    }

    /// A signal that fires exactly once, when the session terminates for
    /// any reason (explicit close, peer close, pipe EOF or error).
    #[must_use]
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Single driver for a yamux connection.
///
/// yamux only makes progress while polled, so one task owns the connection
/// and everything else talks to it through channels: open requests arrive on
/// `cmds`, accepted streams leave through `inbound`. When this returns, the
/// session is dead; the channels closing behind it is what unblocks every
/// waiting caller.
async fn drive<T>(
    mut connection: Connection<T>,
    mut cmds: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::UnboundedSender<yamux::Stream>,
    closed: CancellationToken,
) where
    T: futures_util::io::AsyncRead + futures_util::io::AsyncWrite + Unpin + Send,
{
    let mut pending_open: VecDeque<oneshot::Sender<Result<yamux::Stream, ConnectionError>>> =
        VecDeque::new();
    let mut closing = false;

    std::future::poll_fn(|cx: &mut Context<'_>| {
        loop {
            match cmds.poll_recv(cx) {
                Poll::Ready(Some(Command::Open(reply))) => pending_open.push_back(reply),
                // A dropped session handle counts as a close request.
                Poll::Ready(Some(Command::Close) | None) => closing = true,
                Poll::Pending => break,
            }
        }

        if closing {
            return match connection.poll_close(cx) {
                Poll::Ready(Ok(())) => Poll::Ready(()),
                Poll::Ready(Err(error)) => {
                    trace!("mux close: {error}");
                    Poll::Ready(())
                }
                Poll::Pending => Poll::Pending,
            };
        }

        while !pending_open.is_empty() {
            match connection.poll_new_outbound(cx) {
                Poll::Ready(Ok(stream)) => {
                    if let Some(reply) = pending_open.pop_front() {
                        let _ = reply.send(Ok(stream));
                    }
                }
                Poll::Ready(Err(error)) => {
                    debug!("mux outbound failed: {error}");
                    if let Some(reply) = pending_open.pop_front() {
                        let _ = reply.send(Err(error));
                    }
                    return Poll::Ready(());
                }
                Poll::Pending => break,
            }
        }

        // Accepting inbound frames is also what drives all connection I/O,
        // including reads that only ever see EOF.
        loop {
            match connection.poll_next_inbound(cx) {
                Poll::Ready(Some(Ok(stream))) => {
                    // The receiver may already be gone; the substream then
                    // closes on drop, which the peer observes as a reset.
                    let _ = inbound.send(stream);
                }
                Poll::Ready(Some(Err(error))) => {
                    debug!("mux session failed: {error}");
                    return Poll::Ready(());
                }
                Poll::Ready(None) => {
                    trace!("mux session ended");
                    return Poll::Ready(());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    })
    .await;

    // Fail everything that was still waiting, then signal termination.
    // Dropping `inbound` closes the accept queue.
    pending_open.clear();
    closed.cancel();
}

/// Passive listener facade over the accepting side of a [`MuxSession`],
/// feeding inbound substreams to the server stacks.
///
/// There is deliberately no `close` here: session teardown is driven by the
/// pipe (process exit), never by the listener.
pub struct StreamListener {
    session: Arc<MuxSession>,
}

impl StreamListener {
    #[must_use]
    pub fn new(session: Arc<MuxSession>) -> Self {
        Self { session }
    }

    /// Returns the next inbound substream as a connection.
    pub async fn accept(&self) -> Result<MuxStream, SessionClosed> {
        self.session.accept_stream().await
    }
}
