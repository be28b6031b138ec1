//! Filesystem-backed repository store
// (c) 2026 Dolt Authors
//!
//! A deliberately small store: table files live as flat files under
//! `<data-dir>/.dolt/`, alongside a line-oriented `manifest` (format
//! version, root hash, table list), a `manifest.lock` held by at most one
//! writer, and one `<file>.idx` chunk index per table file. The manifest
//! format is not a compatibility surface.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use md5::{Digest as _, Md5};
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncSeekExt as _, AsyncWriteExt as _};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::protocol::TRANSFER_HOST;
use crate::protocol::service::{
    ChunkHash, ChunkRange, DownloadLocation, RepoMetadata, TableFileDetails, TableFileId,
    TableFileInfo, UploadLocation,
};
use crate::store::{TableFileReader, TransferStore};

const REPO_DIR: &str = ".dolt";
const MANIFEST_FILE: &str = "manifest";
const LOCK_FILE: &str = "manifest.lock";
const FORMAT_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Manifest {
    format_version: String,
    root: ChunkHash,
    /// file id -> chunk count
    tables: BTreeMap<String, u32>,
}

impl Manifest {
    fn parse(text: &str) -> Result<Self> {
        let mut format_version = None;
        let mut root = None;
        let mut tables = BTreeMap::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let context = || format!("manifest line {}", number + 1);
            match fields.next() {
                Some("format") => {
                    format_version = Some(fields.next().with_context(context)?.to_string());
                }
                Some("root") => {
                    root = Some(ChunkHash::from_hex(fields.next().with_context(context)?)?);
                }
                Some("table") => {
                    let file_id = fields.next().with_context(context)?.to_string();
                    let num_chunks = fields.next().with_context(context)?.parse()?;
                    let _ = tables.insert(file_id, num_chunks);
                }
                Some(other) => bail!("manifest line {}: unknown entry {other:?}", number + 1),
                None => unreachable!(),
            }
        }
        Ok(Self {
            format_version: format_version.context("manifest has no format line")?,
            root: root.context("manifest has no root line")?,
            tables,
        })
    }

    fn render(&self) -> String {
        let mut out = format!("format {}\nroot {}\n", self.format_version, self.root);
        for (file_id, num_chunks) in &self.tables {
            out.push_str(&format!("table {file_id} {num_chunks}\n"));
        }
        out
    }
}

/// Filesystem-backed [`TransferStore`].
#[derive(Debug)]
pub struct FsStore {
    root_dir: PathBuf,
    manifest: Mutex<Manifest>,
}

impl FsStore {
    /// Opens the repository at `data_dir`, which must contain a `.dolt`
    /// directory with a readable manifest.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let root_dir = data_dir.join(REPO_DIR);
        let manifest_path = root_dir.join(MANIFEST_FILE);
        let text = tokio::fs::read_to_string(&manifest_path)
            .await
            .with_context(|| format!("reading {}", manifest_path.display()))?;
        let manifest = Manifest::parse(&text)
            .with_context(|| format!("parsing {}", manifest_path.display()))?;
        Ok(Self {
            root_dir,
            manifest: Mutex::new(manifest),
        })
    }

    /// Creates a fresh, empty repository at `data_dir`.
    pub async fn init(data_dir: &Path) -> Result<Self> {
        let root_dir = data_dir.join(REPO_DIR);
        tokio::fs::create_dir_all(&root_dir)
            .await
            .with_context(|| format!("creating {}", root_dir.display()))?;
        let manifest = Manifest {
            format_version: FORMAT_VERSION.to_string(),
            root: ChunkHash::default(),
            tables: BTreeMap::new(),
        };
        let store = Self {
            root_dir,
            manifest: Mutex::new(manifest),
        };
        store.persist(&*store.manifest.lock().await).await?;
        Ok(store)
    }

    async fn persist(&self, manifest: &Manifest) -> Result<()> {
        let path = self.root_dir.join(MANIFEST_FILE);
        tokio::fs::write(&path, manifest.render())
            .await
            .with_context(|| format!("writing {}", path.display()))
    }

    /// A held lock means another writer owns the manifest; every mutation
    /// must fail with this exact text, which clients propagate verbatim.
    fn check_writable(&self) -> Result<()> {
        if self.root_dir.join(LOCK_FILE).exists() {
            bail!("database is read only");
        }
        Ok(())
    }

    fn file_path(&self, file_id: &str) -> Result<PathBuf> {
        if file_id.is_empty()
            || file_id == MANIFEST_FILE
            || file_id == LOCK_FILE
            || file_id.contains(['/', '\\'])
            || file_id.contains("..")
        {
            bail!("invalid table file name {file_id:?}");
        }
        Ok(self.root_dir.join(file_id))
    }

    fn table_url(repo_path: &str, file_id: &str) -> String {
        format!("http://{TRANSFER_HOST}{repo_path}/{file_id}")
    }

    /// Records where each chunk of `file_id` lives. Written by the tooling
    /// that builds table files; the transport only ever reads it back.
    pub async fn put_chunk_index(&self, file_id: &str, ranges: &[ChunkRange]) -> Result<()> {
        let mut text = String::new();
        for range in ranges {
            text.push_str(&format!("{} {} {}\n", range.hash, range.offset, range.length));
        }
        let path = self.file_path(file_id)?.with_extension("idx");
        tokio::fs::write(&path, text)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }

    async fn chunk_index(&self, file_id: &str) -> Result<Vec<ChunkRange>> {
        let path = self.file_path(file_id)?.with_extension("idx");
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let mut ranges = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let mut fields = line.split_whitespace();
            let context = || format!("chunk index {}", path.display());
            ranges.push(ChunkRange {
                hash: ChunkHash::from_hex(fields.next().with_context(context)?)?,
                offset: fields.next().with_context(context)?.parse()?,
                length: fields.next().with_context(context)?.parse()?,
            });
        }
        Ok(ranges)
    }

    /// hash -> (file id, range) for every indexed chunk.
    async fn chunk_map(&self) -> Result<BTreeMap<ChunkHash, (String, ChunkRange)>> {
        let tables: Vec<String> = self.manifest.lock().await.tables.keys().cloned().collect();
        let mut map = BTreeMap::new();
        for file_id in tables {
            for range in self.chunk_index(&file_id).await? {
                let _ = map.insert(range.hash, (file_id.clone(), range));
            }
        }
        Ok(map)
    }
}

#[async_trait]
impl TransferStore for FsStore {
    async fn repo_metadata(&self) -> Result<RepoMetadata> {
        let manifest = self.manifest.lock().await;
        let mut storage_size = 0;
        for file_id in manifest.tables.keys() {
            let path = self.file_path(file_id)?;
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                storage_size += meta.len();
            }
        }
        Ok(RepoMetadata {
            format_version: manifest.format_version.clone(),
            storage_size,
        })
    }

    async fn root(&self) -> Result<ChunkHash> {
        Ok(self.manifest.lock().await.root)
    }

    async fn commit(&self, current: ChunkHash, last: ChunkHash) -> Result<bool> {
        self.check_writable()?;
        let mut manifest = self.manifest.lock().await;
        if manifest.root != last {
            debug!(
                "commit refused: stored root {} != expected {last}",
                manifest.root
            );
            return Ok(false);
        }
        manifest.root = current;
        self.persist(&manifest).await?;
        Ok(true)
    }

    async fn has_chunks(&self, hashes: &[ChunkHash]) -> Result<Vec<u32>> {
        let map = self.chunk_map().await?;
        let mut absent = Vec::new();
        for (index, hash) in hashes.iter().enumerate() {
            if !map.contains_key(hash) {
                absent.push(u32::try_from(index)?);
            }
        }
        Ok(absent)
    }

    async fn download_locations(
        &self,
        repo_path: &str,
        hashes: &[ChunkHash],
    ) -> Result<Vec<DownloadLocation>> {
        let map = self.chunk_map().await?;
        // Group the requested ranges by containing file, one location each.
        let mut by_file: BTreeMap<String, Vec<ChunkRange>> = BTreeMap::new();
        for hash in hashes {
            let Some((file_id, range)) = map.get(hash) else {
                bail!("chunk {hash} not found");
            };
            by_file.entry(file_id.clone()).or_default().push(*range);
        }
        Ok(by_file
            .into_iter()
            .map(|(file_id, ranges)| DownloadLocation {
                url: Self::table_url(repo_path, &file_id),
                ranges,
            })
            .collect())
    }

    async fn upload_locations(
        &self,
        repo_path: &str,
        table_files: &[TableFileDetails],
    ) -> Result<Vec<UploadLocation>> {
        use base64::Engine as _;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        table_files
            .iter()
            .map(|details| {
                let _ = self.file_path(&details.file_id)?;
                let url = format!(
                    "{}?num_chunks={}&content_length={}&content_hash={}",
                    Self::table_url(repo_path, &details.file_id),
                    details.num_chunks,
                    details.content_length,
                    URL_SAFE_NO_PAD.encode(&details.content_hash),
                );
                Ok(UploadLocation {
                    file_id: details.file_id.clone(),
                    url,
                })
            })
            .collect()
    }

    async fn list_table_files(
        &self,
        repo_path: &str,
    ) -> Result<(ChunkHash, Vec<TableFileInfo>)> {
        let manifest = self.manifest.lock().await;
        let table_files = manifest
            .tables
            .iter()
            .map(|(file_id, num_chunks)| TableFileInfo {
                file_id: file_id.clone(),
                num_chunks: *num_chunks,
                url: Self::table_url(repo_path, file_id),
            })
            .collect();
        Ok((manifest.root, table_files))
    }

    async fn add_table_files(&self, files: &[TableFileId]) -> Result<()> {
        self.check_writable()?;
        let mut manifest = self.manifest.lock().await;
        for file in files {
            let path = self.file_path(&file.file_id)?;
            if !path.exists() {
                bail!("table file {} has not been uploaded", file.file_id);
            }
            let _ = manifest.tables.insert(file.file_id.clone(), file.num_chunks);
        }
        self.persist(&manifest).await
    }

    async fn write_table_file(
        &self,
        file_id: &str,
        num_chunks: u32,
        content_hash: &[u8],
        split_offset: u64,
        content_length: u64,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()> {
        self.check_writable()?;
        trace!("receiving table file {file_id} ({num_chunks} chunks, {content_length} bytes)");
        let path = self.file_path(file_id)?;
        // A full upload replaces whatever is on disk (a retry after a failed
        // upload must not inherit a stale tail); only a split continuation
        // writes into the existing file.
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(split_offset == 0)
            .open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        let _ = file.seek(std::io::SeekFrom::Start(split_offset)).await?;

        let mut hasher = Md5::new();
        let mut received: u64 = 0;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = body.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await?;
            received += n as u64;
        }
        file.flush().await?;

        if received != content_length {
            bail!("content length mismatch: declared {content_length}, received {received}");
        }
        if hasher.finalize().as_slice() != content_hash {
            bail!("content hash mismatch for {file_id}");
        }
        Ok(())
    }

    async fn open_table_file(&self, file_id: &str) -> Result<(Box<dyn TableFileReader>, u64)> {
        let path = self.file_path(file_id)?;
        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        let size = file.metadata().await?.len();
        Ok((Box::new(file), size))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    async fn fixture() -> (tempfile::TempDir, FsStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::init(dir.path()).await.unwrap();
        (dir, store)
    }

    fn md5_of(data: &[u8]) -> Vec<u8> {
        Md5::digest(data).to_vec()
    }

    async fn upload(store: &FsStore, file_id: &str, data: &[u8]) {
        store
            .write_table_file(file_id, 1, &md5_of(data), 0, data.len() as u64, &mut Cursor::new(data.to_vec()))
            .await
            .unwrap();
        store
            .add_table_files(&[TableFileId {
                file_id: file_id.into(),
                num_chunks: 1,
            }])
            .await
            .unwrap();
    }

    #[test]
    fn manifest_round_trip() {
        let manifest = Manifest {
            format_version: "1".into(),
            root: ChunkHash([7; 20]),
            tables: BTreeMap::from([("aaa".into(), 3), ("bbb".into(), 9)]),
        };
        let parsed = Manifest::parse(&manifest.render()).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn manifest_rejects_junk() {
        let _ = Manifest::parse("format 1\nroot zzzz\n").expect_err("an error was expected");
        let _ = Manifest::parse("nonsense line\n").expect_err("an error was expected");
        let _ = Manifest::parse("format 1\n").expect_err("an error was expected");
    }

    #[tokio::test]
    async fn init_then_load() {
        let (dir, store) = fixture().await;
        upload(&store, "table1", b"contents").await;
        drop(store);

        let reloaded = FsStore::load(dir.path()).await.unwrap();
        let (_, files) = reloaded.list_table_files("/repo").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_id, "table1");
        assert_eq!(files[0].url, "http://transfer.local/repo/table1");
    }

    #[tokio::test]
    async fn load_missing_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        let _ = FsStore::load(dir.path()).await.expect_err("an error was expected");
    }

    #[tokio::test]
    async fn commit_is_compare_and_swap() {
        let (_dir, store) = fixture().await;
        let zero = ChunkHash::default();
        let one = ChunkHash([1; 20]);
        let two = ChunkHash([2; 20]);

        assert!(store.commit(one, zero).await.unwrap());
        assert_eq!(store.root().await.unwrap(), one);
        // Stale expectation: refused, not an error.
        assert!(!store.commit(two, zero).await.unwrap());
        assert_eq!(store.root().await.unwrap(), one);
    }

    #[tokio::test]
    async fn lock_makes_database_read_only() {
        let (dir, store) = fixture().await;
        std::fs::write(dir.path().join(".dolt").join("manifest.lock"), b"").unwrap();

        let err = store
            .commit(ChunkHash([1; 20]), ChunkHash::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("database is read only"));

        let err = store
            .write_table_file("t", 1, &[], 0, 0, &mut Cursor::new(Vec::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("database is read only"));
    }

    #[tokio::test]
    async fn upload_verifies_length_and_hash() {
        let (_dir, store) = fixture().await;
        let data = b"table file bytes";

        let err = store
            .write_table_file("t", 1, &md5_of(data), 0, 99, &mut Cursor::new(data.to_vec()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("content length mismatch"));

        let err = store
            .write_table_file("t", 1, &md5_of(b"other"), 0, data.len() as u64, &mut Cursor::new(data.to_vec()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("content hash mismatch"));
    }

    #[tokio::test]
    async fn full_upload_replaces_stale_content() {
        let (_dir, store) = fixture().await;
        // A failed upload leaves its partial bytes behind.
        let leftover = b"leftover bytes from a failed upload";
        let err = store
            .write_table_file(
                "t",
                1,
                &md5_of(b"something else"),
                0,
                leftover.len() as u64,
                &mut Cursor::new(leftover.to_vec()),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("content hash mismatch"));

        // The retry is shorter; none of the stale tail may survive it.
        let retry = b"short retry";
        store
            .write_table_file("t", 1, &md5_of(retry), 0, retry.len() as u64, &mut Cursor::new(retry.to_vec()))
            .await
            .unwrap();

        let (mut reader, size) = store.open_table_file("t").await.unwrap();
        assert_eq!(size, retry.len() as u64);
        let mut content = Vec::new();
        let _ = reader.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, retry);
    }

    #[tokio::test]
    async fn split_upload_lands_at_offset() {
        let (_dir, store) = fixture().await;
        upload(&store, "t", b"0123").await;
        store
            .write_table_file("t", 1, &md5_of(b"4567"), 4, 4, &mut Cursor::new(b"4567".to_vec()))
            .await
            .unwrap();

        let (mut reader, size) = store.open_table_file("t").await.unwrap();
        assert_eq!(size, 8);
        let mut content = Vec::new();
        let _ = reader.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"01234567");
    }

    #[tokio::test]
    async fn chunk_queries_use_the_index() {
        let (_dir, store) = fixture().await;
        upload(&store, "t", b"aaaabbbb").await;
        let ha = ChunkHash([0xaa; 20]);
        let hb = ChunkHash([0xbb; 20]);
        let missing = ChunkHash([0xcc; 20]);
        store
            .put_chunk_index(
                "t",
                &[
                    ChunkRange { hash: ha, offset: 0, length: 4 },
                    ChunkRange { hash: hb, offset: 4, length: 4 },
                ],
            )
            .await
            .unwrap();

        assert_eq!(store.has_chunks(&[ha, missing, hb]).await.unwrap(), vec![1]);

        let locations = store.download_locations("/repo", &[ha, hb]).await.unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].url, "http://transfer.local/repo/t");
        assert_eq!(locations[0].ranges.len(), 2);

        let err = store
            .download_locations("/repo", &[missing])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn rejects_path_escapes() {
        let (_dir, store) = fixture().await;
        for bad in ["../evil", "a/b", "", "manifest", "manifest.lock"] {
            let _ = store
                .open_table_file(bad)
                .await
                .expect_err("an error was expected");
        }
    }

    #[tokio::test]
    async fn upload_locations_carry_sealed_parameters() {
        let (_dir, store) = fixture().await;
        let details = TableFileDetails {
            file_id: "newtable".into(),
            num_chunks: 7,
            content_length: 1234,
            content_hash: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let locations = store.upload_locations("/repo", &[details]).await.unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(
            locations[0].url,
            "http://transfer.local/repo/newtable?num_chunks=7&content_length=1234&content_hash=3q2-7w"
        );
    }
}
