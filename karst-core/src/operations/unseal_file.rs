use crate::error::{KarstError, Result};
use crate::seal::DynSealer;
use crate::storage::{load_put_record, DynMetadataStore};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct UnsealFileOperation {
    metadata: Arc<DynMetadataStore>,
    sealer: Arc<DynSealer>,
}

#[derive(Debug, Clone)]
pub struct UnsealFileOperationRequest {
    pub sealed_hash: String,
}

#[derive(Debug, Clone)]
pub enum UnsealFileOperationOutcome {
    Unsealed(PathBuf),
    NotFound,
}

impl UnsealFileOperation {
    pub fn new(metadata: Arc<DynMetadataStore>, sealer: Arc<DynSealer>) -> Self {
        Self { metadata, sealer }
    }

    pub async fn run(
        &self,
        request: UnsealFileOperationRequest,
    ) -> Result<UnsealFileOperationOutcome> {
        let record = match load_put_record(self.metadata.as_ref(), &request.sealed_hash) {
            Ok(record) => record,
            Err(KarstError::NotFound(_)) => return Ok(UnsealFileOperationOutcome::NotFound),
            Err(error) => return Err(error),
        };

        let unsealed_path = self.sealer.unseal(&record.stored_path).await?;
        tracing::info!(
            "Unsealed {} into '{}'",
            request.sealed_hash,
            unsealed_path.display()
        );

        Ok(UnsealFileOperationOutcome::Unsealed(unsealed_path))
    }
}
