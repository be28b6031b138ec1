//! Client-side chunk-store handle
// (c) 2026 Dolt Authors

use anyhow::{Result, anyhow, bail};
use hyper::{Body, Response, StatusCode};

use crate::client::{MuxHttpTransport, TransferConnection};
use crate::protocol::service::{
    ChunkHash, DownloadLocation, RepoMetadata, RpcRequest, RpcResponse, TableFileDetails,
    TableFileId, TableFileInfo, UploadLocation,
};
use crate::rpc::RpcClient;

/// The chunk store a [`crate::client::connect`] call hands back: every
/// operation is forwarded through the tunnel, metadata and coordination via
/// RPC, bulk bytes via HTTP.
///
/// The handle owns the session. [`close`](RemoteChunkStore::close) runs the
/// coordinated teardown; merely dropping the store still kills the
/// subprocess (nothing leaks) but skips the orderly drain.
pub struct RemoteChunkStore {
    rpc: RpcClient,
    http: MuxHttpTransport,
    repo_path: String,
    connection: Option<TransferConnection>,
}

impl std::fmt::Debug for RemoteChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteChunkStore")
            .field("repo_path", &self.repo_path)
            .finish_non_exhaustive()
    }
}

impl RemoteChunkStore {
    #[must_use]
    pub fn new(
        rpc: RpcClient,
        http: MuxHttpTransport,
        repo_path: String,
        connection: Option<TransferConnection>,
    ) -> Self {
        Self {
            rpc,
            http,
            repo_path,
            connection,
        }
    }

    /// The repository path this store is scoped to.
    #[must_use]
    pub fn repo_path(&self) -> &str {
        &self.repo_path
    }

    pub async fn repo_metadata(&self) -> Result<RepoMetadata> {
        match self
            .rpc
            .call(&RpcRequest::RepoMetadata {
                repo_path: self.repo_path.clone(),
            })
            .await?
        {
            RpcResponse::RepoMetadata(metadata) => Ok(metadata),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn root(&self) -> Result<ChunkHash> {
        match self
            .rpc
            .call(&RpcRequest::Root {
                repo_path: self.repo_path.clone(),
            })
            .await?
        {
            RpcResponse::Root { root } => Ok(root),
            other => Err(unexpected(&other)),
        }
    }

    /// Compare-and-swap the remote root. False means the remote moved on
    /// and the caller must rebase; errors mean the attempt never landed.
    pub async fn commit(&self, current: ChunkHash, last: ChunkHash) -> Result<bool> {
        match self
            .rpc
            .call(&RpcRequest::Commit {
                repo_path: self.repo_path.clone(),
                current,
                last,
            })
            .await?
        {
            RpcResponse::Commit { success } => Ok(success),
            other => Err(unexpected(&other)),
        }
    }

    /// Indices into `hashes` that the remote is missing.
    pub async fn has_chunks(&self, hashes: Vec<ChunkHash>) -> Result<Vec<u32>> {
        match self
            .rpc
            .call(&RpcRequest::HasChunks {
                repo_path: self.repo_path.clone(),
                hashes,
            })
            .await?
        {
            RpcResponse::HasChunks { absent } => Ok(absent),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn download_locations(
        &self,
        hashes: Vec<ChunkHash>,
    ) -> Result<Vec<DownloadLocation>> {
        match self
            .rpc
            .call(&RpcRequest::DownloadLocations {
                repo_path: self.repo_path.clone(),
                hashes,
            })
            .await?
        {
            RpcResponse::DownloadLocations { locations } => Ok(locations),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn upload_locations(
        &self,
        table_files: Vec<TableFileDetails>,
    ) -> Result<Vec<UploadLocation>> {
        match self
            .rpc
            .call(&RpcRequest::UploadLocations {
                repo_path: self.repo_path.clone(),
                table_files,
            })
            .await?
        {
            RpcResponse::UploadLocations { locations } => Ok(locations),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn list_table_files(&self) -> Result<(ChunkHash, Vec<TableFileInfo>)> {
        match self
            .rpc
            .call(&RpcRequest::ListTableFiles {
                repo_path: self.repo_path.clone(),
            })
            .await?
        {
            RpcResponse::ListTableFiles { root, table_files } => Ok((root, table_files)),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn add_table_files(&self, files: Vec<TableFileId>) -> Result<()> {
        match self
            .rpc
            .call(&RpcRequest::AddTableFiles {
                repo_path: self.repo_path.clone(),
                files,
            })
            .await?
        {
            RpcResponse::AddTableFiles { success: true } => Ok(()),
            RpcResponse::AddTableFiles { success: false } => {
                Err(anyhow!("remote refused to register table files"))
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Fetches a whole table file.
    pub async fn fetch_table_file(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(url, None).await?;
        let response = ok_or_response_error("GET", url, response, StatusCode::OK).await?;
        Ok(hyper::body::to_bytes(response.into_body()).await?.to_vec())
    }

    /// Fetches `length` bytes of a table file starting at `offset` — how
    /// individual chunks are pulled out of large files.
    pub async fn fetch_table_file_range(
        &self,
        url: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>> {
        let response = self.http.get(url, Some((offset, length))).await?;
        let response =
            ok_or_response_error("GET", url, response, StatusCode::PARTIAL_CONTENT).await?;
        Ok(hyper::body::to_bytes(response.into_body()).await?.to_vec())
    }

    /// Uploads one table file to a location obtained from
    /// [`upload_locations`](RemoteChunkStore::upload_locations).
    pub async fn upload_table_file(
        &self,
        location: &UploadLocation,
        content: Vec<u8>,
    ) -> Result<()> {
        let response = self.http.post(&location.url, content).await?;
        let _ = ok_or_response_error("POST", &location.url, response, StatusCode::OK).await?;
        Ok(())
    }

    /// Releases every resource behind this store: HTTP transport, session
    /// context, mux, pipes and the ssh subprocess, in that order.
    pub async fn close(mut self) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        Ok(())
    }
}

fn unexpected(response: &RpcResponse) -> anyhow::Error {
    anyhow!("remote sent an unexpected response: {response:?}")
}

/// Checks the response status, surfacing the body text (the server's error
/// message, e.g. `database is read only`) on anything unexpected.
async fn ok_or_response_error(
    method: &str,
    url: &str,
    response: Response<Body>,
    expected: StatusCode,
) -> Result<Response<Body>> {
    let status = response.status();
    if status == expected {
        return Ok(response);
    }
    let body = hyper::body::to_bytes(response.into_body())
        .await
        .unwrap_or_default();
    let text = String::from_utf8_lossy(&body);
    let text = text.trim();
    if text.is_empty() {
        bail!("{method} {url}: {status}");
    }
    bail!("{method} {url}: {status}: {text}");
}
