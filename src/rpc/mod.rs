//! RPC bindings: one substream per call
// (c) 2026 Dolt Authors
//!
//! The client half opens a fresh substream for every call, writes the scheme
//! byte and one framed request, and reads one framed response. The server
//! half is [`serve_stream`], invoked by the transfer command's dispatcher
//! once it has consumed the scheme byte.
//!
//! Server-side failures travel as [`RpcResponse::Failure`] and surface to
//! the caller as plain errors carrying the server's text verbatim.

use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use tokio::io::AsyncWriteExt as _;
use tracing::trace;

use crate::client::SessionContext;
use crate::mux::MuxSession;
use crate::protocol::StreamScheme;
use crate::protocol::common::{ProtocolMessage as _, ReceivingStream, SendingStream};
use crate::protocol::service::{RpcRequest, RpcResponse};
use crate::store::TransferStore;

/// Client-side binding. Cheap to clone; all clones share the session.
#[derive(Clone)]
pub struct RpcClient {
    session: Arc<MuxSession>,
    ctx: SessionContext,
}

impl RpcClient {
    #[must_use]
    pub fn new(session: Arc<MuxSession>, ctx: SessionContext) -> Self {
        Self { session, ctx }
    }

    /// Performs one RPC call on a fresh substream.
    ///
    /// Fails immediately with the session's cancellation cause once the
    /// session has been cancelled — including calls already in flight when
    /// the remote process exits.
    pub async fn call(&self, request: &RpcRequest) -> Result<RpcResponse> {
        tokio::select! {
            biased;
            () = self.ctx.cancelled() => Err(self.ctx.cause_error()),
            result = self.call_inner(request) => result,
        }
    }

    async fn call_inner(&self, request: &RpcRequest) -> Result<RpcResponse> {
        let mut stream = self
            .session
            .open_stream()
            .await
            .context("opening rpc substream")?;
        stream.write_u8(StreamScheme::Rpc as u8).await?;
        request
            .to_writer_async_framed(&mut stream)
            .await
            .context("sending rpc request")?;
        let response = RpcResponse::from_reader_async_framed(&mut stream)
            .await
            .context("receiving rpc response")?;
        match response {
            // The server's error text, verbatim.
            RpcResponse::Failure { message } => Err(anyhow!(message)),
            other => Ok(other),
        }
    }
}

/// Server-side binding: serves exactly one call on an accepted substream.
pub async fn serve_stream<S>(stream: &mut S, store: &dyn TransferStore) -> Result<()>
where
    S: SendingStream + ReceivingStream,
{
    let request = RpcRequest::from_reader_async_framed(stream)
        .await
        .context("reading rpc request")?;
    trace!("rpc request: {request:?}");
    let response = match dispatch(store, request).await {
        Ok(response) => response,
        Err(error) => RpcResponse::Failure {
            message: format!("{error:#}"),
        },
    };
    response
        .to_writer_async_framed(stream)
        .await
        .context("writing rpc response")
}

async fn dispatch(store: &dyn TransferStore, request: RpcRequest) -> Result<RpcResponse> {
    Ok(match request {
        RpcRequest::RepoMetadata { .. } => RpcResponse::RepoMetadata(store.repo_metadata().await?),
        RpcRequest::Root { .. } => RpcResponse::Root {
            root: store.root().await?,
        },
        RpcRequest::Commit { current, last, .. } => RpcResponse::Commit {
            success: store.commit(current, last).await?,
        },
        RpcRequest::HasChunks { hashes, .. } => RpcResponse::HasChunks {
            absent: store.has_chunks(&hashes).await?,
        },
        RpcRequest::DownloadLocations { repo_path, hashes } => RpcResponse::DownloadLocations {
            locations: store.download_locations(&repo_path, &hashes).await?,
        },
        RpcRequest::UploadLocations {
            repo_path,
            table_files,
        } => RpcResponse::UploadLocations {
            locations: store.upload_locations(&repo_path, &table_files).await?,
        },
        RpcRequest::ListTableFiles { repo_path } => {
            let (root, table_files) = store.list_table_files(&repo_path).await?;
            RpcResponse::ListTableFiles { root, table_files }
        }
        RpcRequest::AddTableFiles { files, .. } => {
            store.add_table_files(&files).await?;
            RpcResponse::AddTableFiles { success: true }
        }
    })
}
