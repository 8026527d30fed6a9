use crate::error::{KarstError, Result};
use crate::merkle::{compute_hash, PART_SIZE};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Clone)]
pub struct SplitResult {
    pub chunk_hashes: Vec<String>,
    pub chunk_sizes: Vec<u64>,
    pub total_size: u64,
}

#[derive(Debug, Clone)]
pub struct CommitResult {
    pub path: PathBuf,
    pub reused: bool,
}

/// ChunkStore keeps file parts under content-addressed directories:
/// `{base}/{root_hash}/{index}_{sha256}`.
///
/// Parts are first written into a staging directory that is renamed to its
/// final name only once every part is on disk, so readers never observe a
/// partially written content directory.
pub struct ChunkStore {
    base_path: PathBuf,
}

impl ChunkStore {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn content_dir(&self, root_hash: &str) -> PathBuf {
        self.base_path.join(root_hash)
    }

    pub fn chunk_file_name(index: u64, chunk_hash: &str) -> String {
        format!("{}_{}", index, chunk_hash)
    }

    /// Creates a fresh, uniquely named staging directory under the base path.
    pub async fn create_staging_dir(&self, label: &str) -> Result<PathBuf> {
        let staging = self
            .base_path
            .join(format!("{}.{}.staging", label, ulid::Ulid::new()));
        fs::create_dir(&staging).await?;
        tracing::debug!("Created staging directory {}", staging.display());
        Ok(staging)
    }

    /// Reads `reader` in `PART_SIZE` windows and writes every window into
    /// `staging` as `{index}_{sha256}`. There is always at least one part,
    /// even for an empty stream.
    ///
    /// A failure leaves `staging` in place; removing it is up to the caller.
    pub async fn split<R>(&self, reader: &mut R, staging: &Path) -> Result<SplitResult>
    where
        R: AsyncRead + Unpin,
    {
        let mut result = SplitResult {
            chunk_hashes: Vec::new(),
            chunk_sizes: Vec::new(),
            total_size: 0,
        };

        let mut buffer = Vec::with_capacity(PART_SIZE);
        loop {
            buffer.clear();
            read_window(reader, &mut buffer).await?;

            if buffer.is_empty() && !result.chunk_hashes.is_empty() {
                break;
            }

            let index = result.chunk_hashes.len() as u64;
            let chunk_hash = compute_hash(&buffer);
            let chunk_path = staging.join(Self::chunk_file_name(index, &chunk_hash));

            let mut file = fs::File::create(&chunk_path).await?;
            file.write_all(&buffer).await?;
            file.sync_all().await?;

            result.total_size += buffer.len() as u64;
            result.chunk_sizes.push(buffer.len() as u64);
            result.chunk_hashes.push(chunk_hash);

            if buffer.len() < PART_SIZE {
                break;
            }
        }

        tracing::debug!(
            "Split {} bytes into {} parts under {}",
            result.total_size,
            result.chunk_hashes.len(),
            staging.display()
        );
        Ok(result)
    }

    /// Publishes `staging` as `{base}/{root_hash}`. When that directory
    /// already exists the existing copy wins and `staging` is discarded.
    pub async fn commit(&self, staging: &Path, root_hash: &str) -> Result<CommitResult> {
        let target = self.content_dir(root_hash);

        if fs::try_exists(&target).await? {
            fs::remove_dir_all(staging).await?;
            return Ok(CommitResult {
                path: target,
                reused: true,
            });
        }

        if let Err(error) = fs::rename(staging, &target).await {
            // Lost a race against another put of identical content.
            if fs::try_exists(&target).await? {
                fs::remove_dir_all(staging).await?;
                return Ok(CommitResult {
                    path: target,
                    reused: true,
                });
            }
            return Err(KarstError::Storage(format!(
                "failed to rename '{}' to '{}': {}",
                staging.display(),
                target.display(),
                error
            )));
        }

        Ok(CommitResult {
            path: target,
            reused: false,
        })
    }

    /// Returns exactly the bytes of part `index` stored under `dir`.
    pub async fn read_chunk(
        &self,
        dir: &Path,
        index: u64,
        chunk_hash: &str,
        expected_size: u64,
    ) -> Result<Bytes> {
        let chunk_path = dir.join(Self::chunk_file_name(index, chunk_hash));
        let bytes = match fs::read(&chunk_path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(KarstError::NotFound(format!(
                    "part {} of '{}' ({})",
                    index,
                    dir.display(),
                    chunk_hash
                )));
            }
            Err(error) => return Err(error.into()),
        };

        if bytes.len() as u64 != expected_size {
            return Err(KarstError::SizeMismatch {
                expected: expected_size,
                actual: bytes.len() as u64,
            });
        }

        Ok(Bytes::from(bytes))
    }

    pub async fn remove_dir(&self, dir: &Path) -> Result<()> {
        if fs::try_exists(dir).await? {
            fs::remove_dir_all(dir).await?;
        }
        Ok(())
    }
}

async fn read_window<R>(reader: &mut R, buffer: &mut Vec<u8>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut window = reader.take(PART_SIZE as u64);
    window.read_to_end(buffer).await?;
    Ok(())
}
