//! Storage modules for Karst
//!
//! Provides content-addressed part storage and the metadata index.

pub mod chunk_store;
pub mod metadata_store;
pub mod records;

pub use chunk_store::{ChunkStore, CommitResult, SplitResult};
pub use metadata_store::{DynMetadataStore, MetadataStore, SqliteMetadataStore};
pub use records::{load_put_record, put_presence, store_put_record, PutRecord};
