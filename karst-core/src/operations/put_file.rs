use crate::error::{KarstError, Result};
use crate::market::{DeclareReceipt, DynDeclarer};
use crate::merkle::{build_tree, MerkleNode};
use crate::rollback::Rollback;
use crate::seal::DynSealer;
use crate::storage::{put_presence, store_put_record, ChunkStore, DynMetadataStore, PutRecord};
use md5::{Digest, Md5};
use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

const DIGEST_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Clone)]
pub struct PutFileOperation {
    files: Arc<ChunkStore>,
    temp_files: Arc<ChunkStore>,
    metadata: Arc<DynMetadataStore>,
    sealer: Option<Arc<DynSealer>>,
    declarer: Option<Arc<DynDeclarer>>,
    claims: Arc<Mutex<HashSet<String>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutMode {
    /// Keep the file on this node and seal it.
    Local,
    /// Forward the file to `provider` under a storage order of `duration` blocks.
    Remote { provider: String, duration: u64 },
}

#[derive(Debug, Clone)]
pub struct PutFileOperationRequest {
    pub path: PathBuf,
    pub mode: PutMode,
}

#[derive(Debug, Clone)]
pub struct PutFileOperationResult {
    pub content_digest: String,
    pub tree: MerkleNode,
    pub sealed_tree: MerkleNode,
    pub stored_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DeclaredFile {
    pub tree: MerkleNode,
    pub content_path: PathBuf,
    pub receipt: DeclareReceipt,
}

#[derive(Debug, Clone)]
pub enum PutFileOperationOutcome {
    Stored(PutFileOperationResult),
    Declared(DeclaredFile),
}

impl PutFileOperation {
    pub fn new(
        files: Arc<ChunkStore>,
        temp_files: Arc<ChunkStore>,
        metadata: Arc<DynMetadataStore>,
        sealer: Option<Arc<DynSealer>>,
        declarer: Option<Arc<DynDeclarer>>,
    ) -> Self {
        Self {
            files,
            temp_files,
            metadata,
            sealer,
            declarer,
            claims: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn run(&self, request: PutFileOperationRequest) -> Result<PutFileOperationOutcome> {
        let PutFileOperationRequest { path, mode } = request;

        match mode {
            PutMode::Local => self
                .put_local(&path)
                .await
                .map(PutFileOperationOutcome::Stored),
            PutMode::Remote { provider, duration } => self
                .put_remote(&path, &provider, duration)
                .await
                .map(PutFileOperationOutcome::Declared),
        }
    }

    async fn put_local(&self, path: &Path) -> Result<PutFileOperationResult> {
        let sealer = self.sealer.as_ref().ok_or_else(|| {
            KarstError::Input("no sealer is configured, local put is unavailable".to_string())
        })?;

        let mut file = open_source(path).await?;
        let content_digest = file_digest(&mut file).await?;

        if self.metadata.has(&content_digest)? {
            return Err(KarstError::DuplicateContent(format!(
                "'{}' (digest {}) is already stored",
                path.display(),
                content_digest
            )));
        }

        let _claim = DigestClaim::acquire(&self.claims, &content_digest)?;
        file.seek(SeekFrom::Start(0)).await?;

        self.store_local(path, &content_digest, &mut file, sealer.as_ref())
            .await
    }

    async fn store_local<R>(
        &self,
        source_path: &Path,
        content_digest: &str,
        reader: &mut R,
        sealer: &DynSealer,
    ) -> Result<PutFileOperationResult>
    where
        R: AsyncRead + Unpin,
    {
        // Runs under the digest claim; a put that won the claim race may
        // have finished between the caller's check and here.
        if self.metadata.has(content_digest)? {
            return Err(KarstError::DuplicateContent(format!(
                "'{}' (digest {}) is already stored",
                source_path.display(),
                content_digest
            )));
        }

        let mut rollback = Rollback::new(format!("put {}", source_path.display()));
        let result = self
            .stage_local(source_path, content_digest, reader, sealer, &mut rollback)
            .await;
        rollback.finish(result).await
    }

    async fn stage_local<R>(
        &self,
        source_path: &Path,
        content_digest: &str,
        reader: &mut R,
        sealer: &DynSealer,
        rollback: &mut Rollback,
    ) -> Result<PutFileOperationResult>
    where
        R: AsyncRead + Unpin,
    {
        let staging = self.files.create_staging_dir(content_digest).await?;
        rollback.remove_dir_on_failure(staging.clone());

        put_presence(self.metadata.as_ref(), content_digest)?;
        rollback.delete_key_on_failure(self.metadata.clone(), content_digest);

        let split = self.files.split(reader, &staging).await?;
        let tree = build_tree(&split.chunk_hashes, &split.chunk_sizes);

        if self.metadata.has(&tree.hash)? {
            return Err(KarstError::DuplicateContent(format!(
                "content {} of '{}' is already stored",
                tree.hash,
                source_path.display()
            )));
        }

        let committed = self.files.commit(&staging, &tree.hash).await?;
        if !committed.reused {
            rollback.remove_dir_on_failure(committed.path.clone());
        }

        put_presence(self.metadata.as_ref(), &tree.hash)?;
        rollback.delete_key_on_failure(self.metadata.clone(), tree.hash.clone());

        let sealed = sealer.seal(&committed.path, &tree).await?;
        if sealed.sealed_path != committed.path {
            rollback.remove_dir_on_failure(sealed.sealed_path.clone());
        }

        let record = PutRecord {
            source_path: source_path.to_path_buf(),
            content_digest: content_digest.to_string(),
            tree: tree.clone(),
            sealed_tree: Some(sealed.sealed_tree.clone()),
            stored_path: sealed.sealed_path.clone(),
        };
        store_put_record(self.metadata.as_ref(), &sealed.sealed_tree.hash, &record)?;
        rollback.delete_key_on_failure(self.metadata.clone(), sealed.sealed_tree.hash.clone());

        tracing::info!(
            "Stored '{}': tree={} sealed={} parts={} size={}",
            source_path.display(),
            tree.hash,
            sealed.sealed_tree.hash,
            tree.child_count,
            tree.size
        );

        Ok(PutFileOperationResult {
            content_digest: content_digest.to_string(),
            tree,
            sealed_tree: sealed.sealed_tree,
            stored_path: sealed.sealed_path,
        })
    }

    async fn put_remote(&self, path: &Path, provider: &str, duration: u64) -> Result<DeclaredFile> {
        let declarer = self.declarer.as_ref().ok_or_else(|| {
            KarstError::Input("no storage market is configured, remote put is unavailable".to_string())
        })?;

        let mut file = open_source(path).await?;
        let mut rollback = Rollback::new(format!("remote put {}", path.display()));
        let result = self
            .stage_remote(path, &mut file, declarer.as_ref(), provider, duration, &mut rollback)
            .await;
        rollback.finish(result).await
    }

    async fn stage_remote(
        &self,
        path: &Path,
        file: &mut tokio::fs::File,
        declarer: &DynDeclarer,
        provider: &str,
        duration: u64,
        rollback: &mut Rollback,
    ) -> Result<DeclaredFile> {
        let staging = self.temp_files.create_staging_dir("remote").await?;
        rollback.remove_dir_on_failure(staging.clone());

        let split = self.temp_files.split(file, &staging).await?;
        let tree = build_tree(&split.chunk_hashes, &split.chunk_sizes);

        let committed = self.temp_files.commit(&staging, &tree.hash).await?;
        if !committed.reused {
            rollback.remove_dir_on_failure(committed.path.clone());
        }

        tree.validate()
            .map_err(|reason| KarstError::Storage(format!("built an illegal tree: {}", reason)))?;

        let receipt = declarer.declare(&tree, provider, duration).await?;

        tracing::info!(
            "Declared '{}' to {}: tree={} order={}",
            path.display(),
            provider,
            tree.hash,
            receipt.store_order_hash
        );

        Ok(DeclaredFile {
            tree,
            content_path: committed.path,
            receipt,
        })
    }
}

/// Marks a content digest as being stored by this process.
struct DigestClaim {
    claims: Arc<Mutex<HashSet<String>>>,
    digest: String,
}

impl DigestClaim {
    fn acquire(claims: &Arc<Mutex<HashSet<String>>>, digest: &str) -> Result<Self> {
        let mut held = claims
            .lock()
            .map_err(|_| KarstError::Storage("digest claims lock poisoned".to_string()))?;

        if !held.insert(digest.to_string()) {
            return Err(KarstError::DuplicateContent(format!(
                "digest {} is already being stored",
                digest
            )));
        }

        Ok(Self {
            claims: claims.clone(),
            digest: digest.to_string(),
        })
    }
}

impl Drop for DigestClaim {
    fn drop(&mut self) {
        if let Ok(mut held) = self.claims.lock() {
            held.remove(&self.digest);
        }
    }
}

async fn open_source(path: &Path) -> Result<tokio::fs::File> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|error| KarstError::Input(format!("cannot open '{}': {}", path.display(), error)))?;

    let metadata = file
        .metadata()
        .await
        .map_err(|error| KarstError::Input(format!("cannot stat '{}': {}", path.display(), error)))?;

    if !metadata.is_file() {
        return Err(KarstError::Input(format!(
            "'{}' is not a regular file",
            path.display()
        )));
    }

    if metadata.len() == 0 {
        return Err(KarstError::Input(format!("'{}' is empty", path.display())));
    }

    Ok(file)
}

async fn file_digest<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; DIGEST_BUFFER_SIZE];
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
