use crate::error::{KarstError, Result};
use crate::seal::DynSealer;
use crate::storage::{load_put_record, ChunkStore, DynMetadataStore};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct DeleteFileOperation {
    files: Arc<ChunkStore>,
    metadata: Arc<DynMetadataStore>,
    sealer: Arc<DynSealer>,
}

#[derive(Debug, Clone)]
pub struct DeleteFileOperationRequest {
    pub sealed_hash: String,
}

#[derive(Debug, Clone)]
pub struct DeleteFileOperationResult {
    pub tree_hash: String,
    pub removed_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum DeleteFileOperationOutcome {
    Deleted(DeleteFileOperationResult),
    NotFound,
}

impl DeleteFileOperation {
    pub fn new(
        files: Arc<ChunkStore>,
        metadata: Arc<DynMetadataStore>,
        sealer: Arc<DynSealer>,
    ) -> Self {
        Self {
            files,
            metadata,
            sealer,
        }
    }

    pub async fn run(
        &self,
        request: DeleteFileOperationRequest,
    ) -> Result<DeleteFileOperationOutcome> {
        let DeleteFileOperationRequest { sealed_hash } = request;

        let record = match load_put_record(self.metadata.as_ref(), &sealed_hash) {
            Ok(record) => record,
            Err(KarstError::NotFound(_)) => return Ok(DeleteFileOperationOutcome::NotFound),
            Err(error) => return Err(error),
        };

        self.sealer.delete(&sealed_hash).await?;

        // Keys go before the directories they point at.
        let content_dir = self.files.content_dir(&record.tree.hash);
        let mut removed_paths = Vec::new();

        self.metadata.delete(&sealed_hash)?;
        if record.stored_path != content_dir {
            self.files.remove_dir(&record.stored_path).await?;
            removed_paths.push(record.stored_path.clone());
        }

        self.metadata.delete(&record.tree.hash)?;
        self.files.remove_dir(&content_dir).await?;
        removed_paths.push(content_dir);

        self.metadata.delete(&record.content_digest)?;

        tracing::info!(
            "Deleted sealed file {} (tree {}) from '{}'",
            sealed_hash,
            record.tree.hash,
            record.source_path.display()
        );

        Ok(DeleteFileOperationOutcome::Deleted(DeleteFileOperationResult {
            tree_hash: record.tree.hash,
            removed_paths,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::PART_SIZE;
    use crate::operations::testing::{FakeSealer, NodeFixture};
    use crate::operations::{
        PutFileOperation, PutFileOperationOutcome, PutFileOperationRequest, PutFileOperationResult,
        PutMode,
    };
    use crate::storage::MetadataStore;
    use crate::ErrorKind;

    async fn put(fixture: &NodeFixture, sealer: Arc<FakeSealer>) -> PutFileOperationResult {
        let operation = PutFileOperation::new(
            fixture.files.clone(),
            fixture.temp_files.clone(),
            fixture.metadata.clone(),
            Some(sealer),
            None,
        );
        let source = fixture.source_file("delete-me.bin", &fixture.content(PART_SIZE + 1));
        match operation
            .run(PutFileOperationRequest {
                path: source,
                mode: PutMode::Local,
            })
            .await
            .unwrap()
        {
            PutFileOperationOutcome::Stored(result) => result,
            other => panic!("expected a stored file, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn delete_removes_directories_and_keys() {
        let fixture = NodeFixture::new();
        let sealer = Arc::new(FakeSealer::new(fixture.sealed_area.clone()));
        let stored = put(&fixture, sealer.clone()).await;

        let operation =
            DeleteFileOperation::new(fixture.files.clone(), fixture.metadata.clone(), sealer.clone());
        let outcome = operation
            .run(DeleteFileOperationRequest {
                sealed_hash: stored.sealed_tree.hash.clone(),
            })
            .await
            .unwrap();

        let result = match outcome {
            DeleteFileOperationOutcome::Deleted(result) => result,
            other => panic!("expected a deletion, got {:?}", other),
        };
        assert_eq!(result.tree_hash, stored.tree.hash);
        assert_eq!(result.removed_paths.len(), 2);
        assert_eq!(
            sealer.deleted.lock().unwrap().clone(),
            vec![stored.sealed_tree.hash.clone()]
        );

        assert!(!stored.stored_path.exists());
        assert!(!fixture.files.content_dir(&stored.tree.hash).exists());
        for key in [&stored.sealed_tree.hash, &stored.tree.hash, &stored.content_digest] {
            assert!(!fixture.metadata.has(key).unwrap());
        }

        let again = operation
            .run(DeleteFileOperationRequest {
                sealed_hash: stored.sealed_tree.hash.clone(),
            })
            .await
            .unwrap();
        assert!(matches!(again, DeleteFileOperationOutcome::NotFound));
    }

    #[tokio::test]
    async fn sealer_refusal_keeps_everything() {
        let fixture = NodeFixture::new();
        let stored = put(
            &fixture,
            Arc::new(FakeSealer::new(fixture.sealed_area.clone())),
        )
        .await;

        let refusing = Arc::new(FakeSealer::rejecting(fixture.sealed_area.clone()));
        let operation =
            DeleteFileOperation::new(fixture.files.clone(), fixture.metadata.clone(), refusing);
        let err = operation
            .run(DeleteFileOperationRequest {
                sealed_hash: stored.sealed_tree.hash.clone(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SealRejected);
        assert!(stored.stored_path.is_dir());
        assert!(fixture.metadata.has(&stored.sealed_tree.hash).unwrap());
    }
}
