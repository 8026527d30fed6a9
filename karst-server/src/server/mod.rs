use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use karst_core::{NodeDataOperation, Result};
use std::sync::Arc;
use tokio::net::TcpListener;

mod node_data;
mod types;

use node_data::node_data;
pub(crate) use types::*;

pub struct ServerState {
    pub(crate) node: String,
    pub(crate) backup: String,
    pub(crate) node_data_operation: Arc<NodeDataOperation>,
}

impl ServerState {
    pub fn new(
        node: impl Into<String>,
        backup: impl Into<String>,
        node_data_operation: Arc<NodeDataOperation>,
    ) -> Self {
        Self {
            node: node.into(),
            backup: backup.into(),
            node_data_operation,
        }
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v0/node/data", get(node_data))
        .with_state(state)
}

pub async fn run_server(bind_addr: &str, state: Arc<ServerState>) -> Result<()> {
    let app = router(state);

    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!("Karst node listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

pub(crate) async fn health(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        node: state.node.clone(),
    })
}
