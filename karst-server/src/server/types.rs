use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: String,
    pub(crate) node: String,
}

/// First frame of a node-data session.
#[derive(Debug, Deserialize)]
pub(crate) struct NodeDataAuth {
    pub(crate) backup: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NodeDataRequest {
    pub(crate) file_hash: String,
    pub(crate) node_hash: String,
    pub(crate) node_index: u64,
}
