// (c) 2026 Dolt Authors

//! Chunk-store RPC service messages
//!
//! The service is a strict request/response protocol: the client opens a
//! fresh substream per call, writes one framed [`RpcRequest`] and reads one
//! framed [`RpcResponse`], then discards the stream. There is no pipelining
//! within a stream and no ordering across streams.
//!
//! The transport layer treats the payloads as opaque; their semantics belong
//! to the chunk store on either end. Failures travel as
//! [`RpcResponse::Failure`] carrying the server's error text verbatim.
//!
//! On the wire these are [BARE] messages; enums encode as uint
//! discriminants, so the ordering of existing variants cannot change
//! without breaking compatibility.
//!
//! [BARE]: https://www.ietf.org/archive/id/draft-devault-bare-11.html

use serde::{Deserialize, Serialize};
use std::fmt::Display;

use super::common::ProtocolMessage;

/// Content address of a single chunk.
#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Default)]
pub struct ChunkHash(pub [u8; 20]);

impl ChunkHash {
    /// Parses the canonical lowercase-hex form.
    pub fn from_hex(s: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("chunk hash must be 20 bytes"))?;
        Ok(Self(arr))
    }
}

impl Display for ChunkHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Repository-level facts reported by the remote before any data moves.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct RepoMetadata {
    /// Storage format version of the remote repository.
    pub format_version: String,
    /// Approximate total size of the stored table files, in bytes.
    pub storage_size: u64,
}

/// One table file as reported by `ListTableFiles`.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct TableFileInfo {
    /// Identifier of the table file (also its filename on the remote).
    pub file_id: String,
    /// Number of logical chunks within the file.
    pub num_chunks: u32,
    /// Download URL. Hosted at the session's virtual hostname.
    pub url: String,
}

/// Byte range of one chunk within a table file.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub struct ChunkRange {
    /// Which chunk this range holds.
    pub hash: ChunkHash,
    /// Offset of the chunk within the file.
    pub offset: u64,
    /// Length of the chunk in bytes.
    pub length: u32,
}

/// Where to fetch a set of requested chunks: one URL plus the byte ranges
/// that cover them.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct DownloadLocation {
    /// GET URL for the containing table file.
    pub url: String,
    /// Ranges of the requested chunks within that file.
    pub ranges: Vec<ChunkRange>,
}

/// Everything the server needs to admit an upload of one table file.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct TableFileDetails {
    /// Identifier (and remote filename) of the table file.
    pub file_id: String,
    /// Number of logical chunks in the file.
    pub num_chunks: u32,
    /// Declared byte length.
    pub content_length: u64,
    /// MD5 digest of the file content.
    pub content_hash: Vec<u8>,
}

/// Pre-sealed upload target for one table file.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct UploadLocation {
    /// Which table file this location admits.
    pub file_id: String,
    /// POST URL, query parameters included.
    pub url: String,
}

/// A chunk-store RPC call.
///
/// Every variant carries the repository path from the client's URL; the
/// server currently serves exactly one repository per session and uses the
/// path only to build response URLs.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub enum RpcRequest {
    /// Fetch [`RepoMetadata`]. Doubles as the connection health probe.
    RepoMetadata { repo_path: String },
    /// Fetch the current root hash.
    Root { repo_path: String },
    /// Compare-and-swap the root hash from `last` to `current`.
    Commit {
        repo_path: String,
        current: ChunkHash,
        last: ChunkHash,
    },
    /// Which of these chunks is the remote missing?
    HasChunks {
        repo_path: String,
        hashes: Vec<ChunkHash>,
    },
    /// Where can these chunks be fetched from?
    DownloadLocations {
        repo_path: String,
        hashes: Vec<ChunkHash>,
    },
    /// Where should these table files be uploaded to?
    UploadLocations {
        repo_path: String,
        table_files: Vec<TableFileDetails>,
    },
    /// List every table file in the repository.
    ListTableFiles { repo_path: String },
    /// Register previously-uploaded table files in the manifest.
    AddTableFiles {
        repo_path: String,
        files: Vec<TableFileId>,
    },
}

/// Identity of an uploaded table file being registered.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct TableFileId {
    pub file_id: String,
    pub num_chunks: u32,
}

/// Reply to an [`RpcRequest`]. Variants correspond one-to-one with requests,
/// plus [`Failure`](RpcResponse::Failure) for any server-side error.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub enum RpcResponse {
    RepoMetadata(RepoMetadata),
    Root { root: ChunkHash },
    Commit { success: bool },
    /// Indices into the request's hash list that the remote does NOT have.
    HasChunks { absent: Vec<u32> },
    DownloadLocations { locations: Vec<DownloadLocation> },
    UploadLocations { locations: Vec<UploadLocation> },
    ListTableFiles {
        root: ChunkHash,
        table_files: Vec<TableFileInfo>,
    },
    AddTableFiles { success: bool },
    /// The server could not serve the call. The message is the server's
    /// error text, propagated to the caller verbatim.
    Failure { message: String },
}

impl ProtocolMessage for RpcRequest {}
impl ProtocolMessage for RpcResponse {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hash_hex_round_trip() {
        let h = ChunkHash([0xab; 20]);
        let s = h.to_string();
        assert_eq!(s.len(), 40);
        assert_eq!(ChunkHash::from_hex(&s).unwrap(), h);
        let _ = ChunkHash::from_hex("abcd").expect_err("an error was expected");
        let _ = ChunkHash::from_hex("not hex at all!").expect_err("an error was expected");
    }

    #[test]
    fn request_round_trip() {
        let req = RpcRequest::DownloadLocations {
            repo_path: "/srv/repo".into(),
            hashes: vec![ChunkHash([1; 20]), ChunkHash([2; 20])],
        };
        let vec = req.to_vec().unwrap();
        assert_eq!(RpcRequest::from_slice(&vec).unwrap(), req);
    }

    #[test]
    fn response_round_trip() {
        let resp = RpcResponse::ListTableFiles {
            root: ChunkHash([9; 20]),
            table_files: vec![TableFileInfo {
                file_id: "abc123".into(),
                num_chunks: 42,
                url: "http://transfer.local/srv/repo/abc123".into(),
            }],
        };
        let vec = resp.to_vec().unwrap();
        assert_eq!(RpcResponse::from_slice(&vec).unwrap(), resp);
    }

    #[test]
    fn failure_text_survives_encoding() {
        let resp = RpcResponse::Failure {
            message: "database is read only".into(),
        };
        let vec = resp.to_vec().unwrap();
        let RpcResponse::Failure { message } = RpcResponse::from_slice(&vec).unwrap() else {
            panic!("expected a failure response");
        };
        assert_eq!(message, "database is read only");
    }
}
