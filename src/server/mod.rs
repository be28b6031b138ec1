//! server-side _(remote)_ event loop
// (c) 2026 Dolt Authors
//!
//! The hidden `transfer` subcommand lands here after the CLI dispatcher has
//! loaded the repository. Its stdin/stdout are the ssh tunnel; its stderr is
//! the client's diagnostic channel. Both the RPC service and the HTTP file
//! endpoint are served from the same multiplexed session: every accepted
//! substream announces its protocol with one scheme byte and is handled on
//! its own task.
//!
//! Broken pipes are data, not death: the runtime ignores `SIGPIPE` at
//! startup, so a write after the client hangs up surfaces as a `BrokenPipe`
//! error which ends that substream (or the session) cleanly.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::mux::{MuxSession, MuxStream, PipeConn, StreamListener};
use crate::protocol::StreamScheme;
use crate::rpc;
use crate::store::TransferStore;

mod files;
pub(crate) use files::FileHandler;

/// Serves `store` over the process's stdin/stdout until the client hangs up
/// or the process is interrupted. Returning `Ok` means a clean session
/// close (exit 0); an error is printed by the CLI and exits 1.
pub async fn transfer_main(store: Arc<dyn TransferStore>) -> Result<()> {
    let shutdown = CancellationToken::new();
    drop(tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        }
    }));

    let conn = PipeConn::new(tokio::io::stdin(), tokio::io::stdout());
    serve(conn, store, shutdown).await
}

/// The transfer event loop over an arbitrary byte pipe.
///
/// Accepts substreams until the session's close-signal fires, a fatal
/// session error occurs, or `shutdown` is cancelled. Each substream is
/// dispatched by its scheme byte; handler failures end that substream only.
pub async fn serve<C>(
    conn: C,
    store: Arc<dyn TransferStore>,
    shutdown: CancellationToken,
) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let session = Arc::new(MuxSession::server(conn));
    let listener = StreamListener::new(Arc::clone(&session));
    let handler = FileHandler::new(Arc::clone(&store));
    let closed = session.closed();
    let mut tasks = JoinSet::new();

    info!("serving repository over multiplexed session");
    loop {
        tokio::select! {
            () = closed.cancelled() => {
                debug!("session closed");
                break;
            }
            () = shutdown.cancelled() => {
                debug!("shutdown requested");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok(stream) => {
                        let _task = tasks.spawn(dispatch_stream(
                            stream,
                            Arc::clone(&store),
                            handler.clone(),
                        ));
                    }
                    Err(_) => break,
                }
            }
        }
    }

    // Substreams cannot outlive the session; don't wait on handlers that
    // can no longer make progress.
    tasks.shutdown().await;
    session.close().await;
    trace!("finished");
    Ok(())
}

/// Routes one accepted substream by its scheme byte.
async fn dispatch_stream(
    mut stream: MuxStream,
    store: Arc<dyn TransferStore>,
    handler: FileHandler,
) {
    let byte = match stream.read_u8().await {
        Ok(byte) => byte,
        Err(error) => {
            trace!("substream closed before scheme byte: {error}");
            return;
        }
    };
    let result = match StreamScheme::try_from(byte) {
        Ok(StreamScheme::Rpc) => rpc::serve_stream(&mut stream, store.as_ref()).await,
        Ok(StreamScheme::Http) => files::serve_http(stream, handler).await,
        Err(error) => Err(error),
    };
    if let Err(error) = result {
        debug!("substream handler failed: {error:#}");
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::serve;
    use crate::mux::MuxSession;
    use crate::protocol::StreamScheme;
    use crate::protocol::common::ProtocolMessage as _;
    use crate::protocol::service::{ChunkHash, RpcRequest, RpcResponse};
    use crate::store::FsStore;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tokio::io::{AsyncWriteExt as _, duplex};
    use tokio::time::{Duration, timeout};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn serves_rpc_substreams_and_exits_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsStore::init(dir.path()).await.unwrap());

        let (client_io, server_io) = duplex(256 * 1024);
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(server_io, store, shutdown));

        let session = MuxSession::client(client_io);
        let mut stream = session.open_stream().await.unwrap();
        stream.write_u8(StreamScheme::Rpc as u8).await.unwrap();
        RpcRequest::Root {
            repo_path: "/repo".into(),
        }
        .to_writer_async_framed(&mut stream)
        .await
        .unwrap();
        let response = RpcResponse::from_reader_async_framed(&mut stream).await.unwrap();
        assert_eq!(
            response,
            RpcResponse::Root {
                root: ChunkHash::default()
            }
        );
        drop(stream);

        // Closing the client session is a clean server exit (code 0 path).
        session.close().await;
        let result = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unknown_scheme_byte_only_kills_that_substream() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsStore::init(dir.path()).await.unwrap());

        let (client_io, server_io) = duplex(256 * 1024);
        let server = tokio::spawn(serve(server_io, store, CancellationToken::new()));

        let session = MuxSession::client(client_io);
        let mut bad = session.open_stream().await.unwrap();
        bad.write_u8(b'Z').await.unwrap();
        bad.flush().await.unwrap();
        drop(bad);

        // The session survives; a well-formed call still works.
        let mut stream = session.open_stream().await.unwrap();
        stream.write_u8(StreamScheme::Rpc as u8).await.unwrap();
        RpcRequest::Root {
            repo_path: "/repo".into(),
        }
        .to_writer_async_framed(&mut stream)
        .await
        .unwrap();
        let response = RpcResponse::from_reader_async_framed(&mut stream).await.unwrap();
        assert!(matches!(response, RpcResponse::Root { .. }));

        session.close().await;
        let result = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn outer_cancellation_is_a_clean_exit() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsStore::init(dir.path()).await.unwrap());

        let (client_io, server_io) = duplex(64 * 1024);
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(server_io, store, shutdown.clone()));
        let _session = MuxSession::client(client_io);

        shutdown.cancel();
        let result = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
