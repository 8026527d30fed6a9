//! Fixtures shared by the operation tests.

use crate::error::{KarstError, Result};
use crate::merkle::{build_tree, compute_hash, MerkleNode};
use crate::operations::PutFileOperation;
use crate::seal::{SealOutcome, Sealer};
use crate::storage::{ChunkStore, DynMetadataStore, MetadataStore, SqliteMetadataStore};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub(crate) const SEALED_PREFIX: &[u8] = b"sealed:";

pub(crate) struct NodeFixture {
    pub dir: TempDir,
    pub files: Arc<ChunkStore>,
    pub temp_files: Arc<ChunkStore>,
    pub metadata: Arc<DynMetadataStore>,
    pub sealed_area: PathBuf,
}

impl NodeFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = Arc::new(ChunkStore::new(dir.path().join("files")).expect("files"));
        let temp_files = Arc::new(ChunkStore::new(dir.path().join("temp_files")).expect("temp"));
        let metadata: Arc<DynMetadataStore> = Arc::new(
            SqliteMetadataStore::open(dir.path().join("db").join("karst.sqlite3")).expect("db"),
        );
        let sealed_area = dir.path().join("sealed");
        std::fs::create_dir_all(&sealed_area).expect("sealed area");

        Self {
            dir,
            files,
            temp_files,
            metadata,
            sealed_area,
        }
    }

    pub fn put_operation(&self, metadata: Arc<DynMetadataStore>) -> PutFileOperation {
        let sealer: Arc<dyn Sealer> = Arc::new(FakeSealer::new(self.sealed_area.clone()));
        PutFileOperation::new(
            self.files.clone(),
            self.temp_files.clone(),
            metadata,
            Some(sealer),
            None,
        )
    }

    pub fn content(&self, len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 31 + i / 7) % 251) as u8).collect()
    }

    pub fn source_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).expect("write source");
        path
    }

    pub fn entries(&self, path: &Path) -> usize {
        match std::fs::read_dir(path) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

/// Seals by rewriting every part with a fixed prefix into its own
/// content-addressed area.
pub(crate) struct FakeSealer {
    sealed: ChunkStore,
    reject: bool,
    pub unsealed: Mutex<Vec<PathBuf>>,
    pub deleted: Mutex<Vec<String>>,
}

impl FakeSealer {
    pub fn new(sealed_area: PathBuf) -> Self {
        Self {
            sealed: ChunkStore::new(sealed_area).expect("sealed store"),
            reject: false,
            unsealed: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(sealed_area: PathBuf) -> Self {
        Self {
            reject: true,
            ..Self::new(sealed_area)
        }
    }
}

#[async_trait]
impl Sealer for FakeSealer {
    async fn seal(&self, path: &Path, tree: &MerkleNode) -> Result<SealOutcome> {
        if self.reject {
            return Err(KarstError::SealRejected {
                status: 500,
                detail: "enclave busy".to_string(),
            });
        }

        let staging = self.sealed.create_staging_dir("seal").await?;
        let mut hashes = Vec::new();
        let mut sizes = Vec::new();
        for (index, child) in tree.children.iter().enumerate() {
            let part = self
                .sealed
                .read_chunk(path, index as u64, &child.hash, child.size)
                .await?;
            let mut sealed = SEALED_PREFIX.to_vec();
            sealed.extend_from_slice(&part);

            let hash = compute_hash(&sealed);
            tokio::fs::write(
                staging.join(ChunkStore::chunk_file_name(index as u64, &hash)),
                &sealed,
            )
            .await?;
            hashes.push(hash);
            sizes.push(sealed.len() as u64);
        }

        let sealed_tree = build_tree(&hashes, &sizes);
        let committed = self.sealed.commit(&staging, &sealed_tree.hash).await?;
        Ok(SealOutcome {
            sealed_tree,
            sealed_path: committed.path,
        })
    }

    async fn unseal(&self, path: &Path) -> Result<PathBuf> {
        self.unsealed.lock().unwrap().push(path.to_path_buf());
        Ok(self.sealed.base_path().join("unsealed"))
    }

    async fn confirm(&self, _sealed_hash: &str) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, sealed_hash: &str) -> Result<()> {
        if self.reject {
            return Err(KarstError::SealRejected {
                status: 404,
                detail: "unknown file".to_string(),
            });
        }
        self.deleted.lock().unwrap().push(sealed_hash.to_string());
        Ok(())
    }
}

/// Passes everything through to `inner` except the `fail_on_put`-th put.
pub(crate) struct FailingMetadataStore {
    inner: Arc<DynMetadataStore>,
    fail_on_put: usize,
    puts: AtomicUsize,
}

impl FailingMetadataStore {
    pub fn new(inner: Arc<DynMetadataStore>, fail_on_put: usize) -> Self {
        Self {
            inner,
            fail_on_put,
            puts: AtomicUsize::new(0),
        }
    }
}

impl MetadataStore for FailingMetadataStore {
    fn has(&self, key: &str) -> Result<bool> {
        self.inner.has(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let n = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on_put {
            return Err(KarstError::Storage(format!("injected failure writing {}", key)));
        }
        self.inner.put(key, value)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }
}
