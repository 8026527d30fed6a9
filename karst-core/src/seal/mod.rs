//! Client side of the attestation service ("sealer").
//!
//! Sealing re-packages committed content under a storage-order-bound
//! identity and hands back a second, independent tree plus the path the
//! sealed copy lives at.

pub mod tee;

use crate::error::Result;
use crate::merkle::MerkleNode;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub use tee::{SealerConfig, TeeSealer};

#[derive(Debug, Clone)]
pub struct SealOutcome {
    pub sealed_tree: MerkleNode,
    pub sealed_path: PathBuf,
}

/// Trait for sealer implementations
#[async_trait]
pub trait Sealer: Send + Sync {
    /// Seal the content stored at `path`, described by `tree`
    async fn seal(&self, path: &Path, tree: &MerkleNode) -> Result<SealOutcome>;

    /// Reverse a seal; returns the path of the unsealed copy
    async fn unseal(&self, path: &Path) -> Result<PathBuf>;

    /// Tell the sealer a sealed file is kept
    async fn confirm(&self, sealed_hash: &str) -> Result<()>;

    /// Tell the sealer a sealed file is gone
    async fn delete(&self, sealed_hash: &str) -> Result<()>;
}

/// Type alias for dynamic sealer
pub type DynSealer = dyn Sealer;
