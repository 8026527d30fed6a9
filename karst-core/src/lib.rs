//! Karst Core - content-addressed storage and sealing for a decentralized storage node

pub mod error;
pub mod market;
pub mod merkle;
pub mod operations;
pub mod rollback;
pub mod seal;
pub mod storage;

pub use error::{ErrorKind, KarstError, Result};
pub use market::{
    DeclareReceipt, Declarer, DynDeclarer, ProviderDeclarer, StorageMarket, MIN_ORDER_DURATION,
};
pub use merkle::{build_tree, compute_hash, MerkleNode, PART_SIZE};
pub use operations::*;
pub use rollback::Rollback;
pub use seal::{DynSealer, SealOutcome, Sealer, SealerConfig, TeeSealer};
pub use storage::{
    load_put_record, put_presence, store_put_record, ChunkStore, CommitResult, DynMetadataStore,
    MetadataStore, PutRecord, SplitResult, SqliteMetadataStore,
};
