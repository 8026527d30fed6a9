//! Content-address tree over fixed-size file parts.
//!
//! The tree is flat: one root whose children are the parts of the file in
//! order. A peer can check any single part against the root's child list
//! without intermediate proofs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Size of every part except the last one, which holds the remainder.
pub const PART_SIZE: usize = 1 << 20;

const HASH_HEX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleNode {
    pub hash: String,
    pub size: u64,
    #[serde(rename = "links_num")]
    pub child_count: u64,
    #[serde(rename = "links", default)]
    pub children: Vec<MerkleNode>,
}

impl MerkleNode {
    pub fn leaf(hash: impl Into<String>, size: u64) -> Self {
        Self {
            hash: hash.into(),
            size,
            child_count: 0,
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn child(&self, index: u64) -> Option<&MerkleNode> {
        if index >= self.child_count {
            return None;
        }
        usize::try_from(index)
            .ok()
            .and_then(|index| self.children.get(index))
    }

    /// Recomputes every digest and size sum below this node.
    pub fn is_legal(&self) -> bool {
        self.validate().is_ok()
    }

    /// Like [`MerkleNode::is_legal`] but reports the first violation found.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !is_hex_digest(&self.hash) {
            return Err(format!("node hash '{}' is not a sha256 hex digest", self.hash));
        }

        if self.child_count != self.children.len() as u64 {
            return Err(format!(
                "node {} declares {} links but carries {}",
                self.hash,
                self.child_count,
                self.children.len()
            ));
        }

        if self.children.is_empty() {
            if self.size == 0 {
                return Err(format!("leaf {} has zero size", self.hash));
            }
            return Ok(());
        }

        let mut size_sum = 0u64;
        for child in &self.children {
            child.validate()?;
            size_sum = size_sum
                .checked_add(child.size)
                .ok_or_else(|| format!("size of node {} overflows", self.hash))?;
        }

        if size_sum != self.size {
            return Err(format!(
                "node {} size {} does not match children sum {}",
                self.hash, self.size, size_sum
            ));
        }

        let expected = internal_hash(&self.children);
        if expected != self.hash {
            return Err(format!(
                "node hash mismatch: expected {}, got {}",
                expected, self.hash
            ));
        }

        Ok(())
    }
}

/// Builds the root node from per-part digests and sizes, in part order.
///
/// `chunk_hashes` and `chunk_sizes` are paired positionally.
pub fn build_tree(chunk_hashes: &[String], chunk_sizes: &[u64]) -> MerkleNode {
    let children: Vec<MerkleNode> = chunk_hashes
        .iter()
        .zip(chunk_sizes)
        .map(|(hash, size)| MerkleNode::leaf(hash.clone(), *size))
        .collect();

    MerkleNode {
        hash: internal_hash(&children),
        size: children.iter().map(|child| child.size).sum(),
        child_count: children.len() as u64,
        children,
    }
}

/// Digest over the ordered `(hash, size)` pairs of `children`. Each pair is
/// the child's lowercase hex hash followed by its size as big-endian u64.
pub fn internal_hash(children: &[MerkleNode]) -> String {
    let mut hasher = Sha256::new();
    for child in children {
        hasher.update(child.hash.as_bytes());
        hasher.update(child.size.to_be_bytes());
    }
    hex::encode(hasher.finalize())
}

/// SHA-256 of `data` as lowercase hex.
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

pub fn is_hex_digest(value: &str) -> bool {
    value.len() == HASH_HEX_LEN
        && value
            .bytes()
            .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte))
}
