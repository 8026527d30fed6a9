//! Put records and the three keys derived from each of them.

use super::metadata_store::MetadataStore;
use crate::error::{KarstError, Result};
use crate::merkle::MerkleNode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Persisted metadata for one stored file, keyed by its sealed root hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutRecord {
    pub source_path: PathBuf,
    pub content_digest: String,
    pub tree: MerkleNode,
    pub sealed_tree: Option<MerkleNode>,
    pub stored_path: PathBuf,
}

impl PutRecord {
    pub fn sealed_hash(&self) -> Option<&str> {
        self.sealed_tree.as_ref().map(|tree| tree.hash.as_str())
    }
}

/// Writes an empty presence marker under `key`.
pub fn put_presence(store: &dyn MetadataStore, key: &str) -> Result<()> {
    store.put(key, &[])
}

pub fn store_put_record(store: &dyn MetadataStore, sealed_hash: &str, record: &PutRecord) -> Result<()> {
    let bytes = serde_json::to_vec(record)?;
    store.put(sealed_hash, &bytes)
}

/// Loads the record stored under a sealed root hash.
///
/// Presence markers share the key space, so an empty value means the hash is
/// known but is not a sealed handle.
pub fn load_put_record(store: &dyn MetadataStore, sealed_hash: &str) -> Result<PutRecord> {
    match store.get(sealed_hash)? {
        Some(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(&bytes)?),
        _ => Err(KarstError::NotFound(format!(
            "no sealed file '{}' on this node",
            sealed_hash
        ))),
    }
}
