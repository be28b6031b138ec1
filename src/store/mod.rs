//! Chunk-store seams on either end of the transport
// (c) 2026 Dolt Authors
//!
//! The transport itself never interprets repository data; it moves opaque
//! chunks and table files between two stores:
//!
//! * [`TransferStore`] — the server-side seam. The `transfer` subcommand
//!   adapts whatever store backs the repository into this shape and serves
//!   it over the mux. [`FsStore`] is the filesystem-backed implementation.
//! * [`RemoteChunkStore`] — the client-side handle returned by
//!   [`crate::client::connect`], which forwards every operation through the
//!   tunnel and owns the session's coordinated teardown.

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncSeek};

use crate::protocol::service::{
    ChunkHash, DownloadLocation, RepoMetadata, TableFileDetails, TableFileId, TableFileInfo,
    UploadLocation,
};

mod fs;
pub use fs::FsStore;
mod remote;
pub use remote::RemoteChunkStore;

/// Readable, seekable handle onto one table file (seekable so byte-range
/// requests can be served without reading from the start).
pub trait TableFileReader: AsyncRead + AsyncSeek + Send + Unpin + std::fmt::Debug {}
impl<T: AsyncRead + AsyncSeek + Send + Unpin + std::fmt::Debug> TableFileReader for T {}

/// Server-side store interface: everything the transfer command needs from
/// the repository it serves.
///
/// `repo_path` arguments carry the path component of the client's URL. One
/// session serves exactly one repository, so implementations use the path
/// only to construct response URLs, never to select a database.
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Repository-level facts: format version, approximate storage size.
    async fn repo_metadata(&self) -> Result<RepoMetadata>;

    /// The current root hash.
    async fn root(&self) -> Result<ChunkHash>;

    /// Compare-and-swap the root from `last` to `current`. Returns false
    /// (not an error) when the stored root no longer equals `last`.
    async fn commit(&self, current: ChunkHash, last: ChunkHash) -> Result<bool>;

    /// Indices into `hashes` of the chunks this store does NOT have.
    async fn has_chunks(&self, hashes: &[ChunkHash]) -> Result<Vec<u32>>;

    /// Where each requested chunk can be fetched from.
    async fn download_locations(
        &self,
        repo_path: &str,
        hashes: &[ChunkHash],
    ) -> Result<Vec<DownloadLocation>>;

    /// Pre-sealed upload targets for the given table files.
    async fn upload_locations(
        &self,
        repo_path: &str,
        table_files: &[TableFileDetails],
    ) -> Result<Vec<UploadLocation>>;

    /// The current root plus every table file in the repository.
    async fn list_table_files(
        &self,
        repo_path: &str,
    ) -> Result<(ChunkHash, Vec<TableFileInfo>)>;

    /// Registers previously-uploaded table files in the manifest.
    async fn add_table_files(&self, files: &[TableFileId]) -> Result<()>;

    /// Accepts the body of one table-file upload. `content_hash` is the MD5
    /// digest of the uploaded bytes and `split_offset` is where they start
    /// within the logical file.
    async fn write_table_file(
        &self,
        file_id: &str,
        num_chunks: u32,
        content_hash: &[u8],
        split_offset: u64,
        content_length: u64,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()>;

    /// Opens one table file for reading, returning the handle and its size.
    async fn open_table_file(&self, file_id: &str) -> Result<(Box<dyn TableFileReader>, u64)>;
}
