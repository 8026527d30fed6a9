use crate::error::{KarstError, Result};
use crate::storage::{load_put_record, ChunkStore, DynMetadataStore};
use bytes::Bytes;
use std::sync::Arc;

/// Serves single parts of sealed files to peers.
///
/// A request is answered only when it agrees with the sealed tree recorded
/// for the file; the bytes come from the record's stored path.
#[derive(Clone)]
pub struct NodeDataOperation {
    metadata: Arc<DynMetadataStore>,
    chunks: Arc<ChunkStore>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDataOperationRequest {
    pub file_hash: String,
    pub node_index: u64,
    pub node_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeDataOperationOutcome {
    Found(Bytes),
    NotFound,
    BadRequest(String),
}

impl NodeDataOperation {
    pub fn new(metadata: Arc<DynMetadataStore>, chunks: Arc<ChunkStore>) -> Self {
        Self { metadata, chunks }
    }

    pub async fn run(&self, request: NodeDataOperationRequest) -> Result<NodeDataOperationOutcome> {
        let NodeDataOperationRequest {
            file_hash,
            node_index,
            node_hash,
        } = request;

        let record = match load_put_record(self.metadata.as_ref(), &file_hash) {
            Ok(record) => record,
            Err(KarstError::NotFound(_)) => return Ok(NodeDataOperationOutcome::NotFound),
            Err(error) => return Err(error),
        };

        let Some(sealed_tree) = record.sealed_tree else {
            return Ok(NodeDataOperationOutcome::NotFound);
        };

        if let Err(reason) = sealed_tree.validate() {
            tracing::error!(
                "Sealed tree of {} failed validation, refusing to serve it: {}",
                file_hash,
                reason
            );
            return Ok(NodeDataOperationOutcome::NotFound);
        }

        let Some(child) = sealed_tree.child(node_index) else {
            return Ok(NodeDataOperationOutcome::BadRequest(format!(
                "node index {} out of range, file has {} nodes",
                node_index, sealed_tree.child_count
            )));
        };

        if child.hash != node_hash {
            return Ok(NodeDataOperationOutcome::BadRequest(format!(
                "node {} of {} is {}, not {}",
                node_index, file_hash, child.hash, node_hash
            )));
        }

        match self
            .chunks
            .read_chunk(&record.stored_path, node_index, &child.hash, child.size)
            .await
        {
            Ok(bytes) => Ok(NodeDataOperationOutcome::Found(bytes)),
            Err(error) => {
                tracing::warn!(
                    "Failed to read node {} of {} from '{}': {}",
                    node_index,
                    file_hash,
                    record.stored_path.display(),
                    error
                );
                Ok(NodeDataOperationOutcome::NotFound)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::{build_tree, compute_hash, PART_SIZE};
    use crate::operations::testing::{NodeFixture, SEALED_PREFIX};
    use crate::operations::{PutFileOperationOutcome, PutFileOperationRequest, PutMode};
    use crate::storage::{store_put_record, PutRecord};

    async fn sealed_two_part_file(
        fixture: &NodeFixture,
    ) -> (Vec<u8>, crate::operations::PutFileOperationResult) {
        let operation = fixture.put_operation(fixture.metadata.clone());
        let content = fixture.content(PART_SIZE + 4321);
        let source = fixture.source_file("node-data.bin", &content);

        let outcome = operation
            .run(PutFileOperationRequest {
                path: source,
                mode: PutMode::Local,
            })
            .await
            .unwrap();
        match outcome {
            PutFileOperationOutcome::Stored(result) => (content, result),
            other => panic!("expected a stored file, got {:?}", other),
        }
    }

    fn request(file_hash: &str, node_index: u64, node_hash: &str) -> NodeDataOperationRequest {
        NodeDataOperationRequest {
            file_hash: file_hash.to_string(),
            node_index,
            node_hash: node_hash.to_string(),
        }
    }

    #[tokio::test]
    async fn serves_sealed_part_zero() {
        let fixture = NodeFixture::new();
        let (content, stored) = sealed_two_part_file(&fixture).await;
        let operation = NodeDataOperation::new(fixture.metadata.clone(), fixture.files.clone());

        let sealed = &stored.sealed_tree;
        assert!(sealed.is_legal());
        assert_eq!(sealed.child_count, 2);

        let outcome = operation
            .run(request(&sealed.hash, 0, &sealed.children[0].hash))
            .await
            .unwrap();

        let mut expected = SEALED_PREFIX.to_vec();
        expected.extend_from_slice(&content[..PART_SIZE]);
        assert_eq!(outcome, NodeDataOperationOutcome::Found(Bytes::from(expected)));
    }

    #[tokio::test]
    async fn rejects_out_of_range_and_mismatched_nodes() {
        let fixture = NodeFixture::new();
        let (_, stored) = sealed_two_part_file(&fixture).await;
        let operation = NodeDataOperation::new(fixture.metadata.clone(), fixture.files.clone());
        let sealed = &stored.sealed_tree;

        for index in [2, 3, u64::MAX] {
            let outcome = operation
                .run(request(&sealed.hash, index, &sealed.children[0].hash))
                .await
                .unwrap();
            assert!(matches!(outcome, NodeDataOperationOutcome::BadRequest(_)));
        }

        let outcome = operation
            .run(request(&sealed.hash, 1, &sealed.children[0].hash))
            .await
            .unwrap();
        assert!(matches!(outcome, NodeDataOperationOutcome::BadRequest(_)));
    }

    #[tokio::test]
    async fn unknown_and_unsealed_hashes_are_not_found() {
        let fixture = NodeFixture::new();
        let (_, stored) = sealed_two_part_file(&fixture).await;
        let operation = NodeDataOperation::new(fixture.metadata.clone(), fixture.files.clone());

        let unknown = compute_hash(b"nobody stored this");
        let outcome = operation.run(request(&unknown, 0, &unknown)).await.unwrap();
        assert_eq!(outcome, NodeDataOperationOutcome::NotFound);

        // The unsealed tree hash is only a presence marker.
        let outcome = operation
            .run(request(&stored.tree.hash, 0, &stored.tree.children[0].hash))
            .await
            .unwrap();
        assert_eq!(outcome, NodeDataOperationOutcome::NotFound);
    }

    #[tokio::test]
    async fn missing_part_file_is_not_found() {
        let fixture = NodeFixture::new();
        let (_, stored) = sealed_two_part_file(&fixture).await;
        let operation = NodeDataOperation::new(fixture.metadata.clone(), fixture.files.clone());
        let sealed = &stored.sealed_tree;

        let part = stored.stored_path.join(ChunkStore::chunk_file_name(
            1,
            &sealed.children[1].hash,
        ));
        std::fs::remove_file(part).unwrap();

        let outcome = operation
            .run(request(&sealed.hash, 1, &sealed.children[1].hash))
            .await
            .unwrap();
        assert_eq!(outcome, NodeDataOperationOutcome::NotFound);
    }

    #[tokio::test]
    async fn tampered_record_is_not_served() {
        let fixture = NodeFixture::new();
        let operation = NodeDataOperation::new(fixture.metadata.clone(), fixture.files.clone());

        let part = compute_hash(b"part");
        let mut sealed_tree = build_tree(&[part.clone()], &[4]);
        let handle = sealed_tree.hash.clone();
        sealed_tree.size = 5;

        let record = PutRecord {
            source_path: "tampered.bin".into(),
            content_digest: "digest".to_string(),
            tree: build_tree(&[part.clone()], &[4]),
            sealed_tree: Some(sealed_tree),
            stored_path: fixture.files.base_path().join("nowhere"),
        };
        store_put_record(fixture.metadata.as_ref(), &handle, &record).unwrap();

        let outcome = operation.run(request(&handle, 0, &part)).await.unwrap();
        assert_eq!(outcome, NodeDataOperationOutcome::NotFound);
    }
}
