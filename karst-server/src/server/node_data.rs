//! Peer-facing part retrieval over a websocket.
//!
//! A session opens with the node's backup secret, then carries any number of
//! `{file_hash, node_hash, node_index}` requests. Each one is answered with a
//! binary frame holding the part, or a `{"status": N}` text frame. Rejected
//! requests leave the session open.

use super::{NodeDataAuth, NodeDataRequest, ServerState};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use karst_core::{KarstError, NodeDataOperationOutcome, NodeDataOperationRequest, Result};
use std::sync::Arc;

pub(crate) async fn node_data(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> Response {
    ws.on_upgrade(move |socket| serve_node_data(socket, state))
}

async fn serve_node_data(mut socket: WebSocket, state: Arc<ServerState>) {
    if let Err(error) = authorize(&mut socket, &state.backup).await {
        tracing::error!("Rejected node data session: {}", error);
        let _ = socket
            .send(status_message(error.kind().status_code()))
            .await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    if socket.send(status_message(200)).await.is_err() {
        return;
    }

    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(error) => {
                tracing::debug!("Node data session ended: {}", error);
                break;
            }
        };

        let reply = match message {
            Message::Text(text) => answer(&state, &text).await,
            Message::Binary(_) => {
                tracing::error!("Node data request must be a text frame");
                status_message(400)
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
        };

        if let Err(error) = socket.send(reply).await {
            tracing::warn!("Failed to write node data reply, closing session: {}", error);
            break;
        }
    }
}

async fn authorize(socket: &mut WebSocket, backup: &str) -> Result<()> {
    loop {
        let message = match socket.recv().await {
            Some(Ok(message)) => message,
            Some(Err(error)) => return Err(KarstError::Protocol(error.to_string())),
            None => return Err(KarstError::Protocol("peer left before authorizing".to_string())),
        };

        match message {
            Message::Text(text) => {
                let auth: NodeDataAuth = serde_json::from_str(&text)
                    .map_err(|e| KarstError::Protocol(format!("malformed auth frame: {}", e)))?;
                if auth.backup != backup {
                    return Err(KarstError::Protocol("backup does not match".to_string()));
                }
                return Ok(());
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            _ => {
                return Err(KarstError::Protocol(
                    "first frame must be a text auth frame".to_string(),
                ))
            }
        }
    }
}

async fn answer(state: &ServerState, text: &str) -> Message {
    let request: NodeDataRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(error) => {
            tracing::error!("Malformed node data request: {}", error);
            return status_message(400);
        }
    };
    tracing::debug!(
        "Node data request: file={} index={} node={}",
        request.file_hash,
        request.node_index,
        request.node_hash
    );

    let result = state
        .node_data_operation
        .run(NodeDataOperationRequest {
            file_hash: request.file_hash,
            node_index: request.node_index,
            node_hash: request.node_hash,
        })
        .await;

    match result {
        Ok(NodeDataOperationOutcome::Found(bytes)) => Message::Binary(bytes.to_vec()),
        Ok(NodeDataOperationOutcome::NotFound) => status_message(404),
        Ok(NodeDataOperationOutcome::BadRequest(reason)) => {
            tracing::error!("Bad node data request: {}", reason);
            status_message(400)
        }
        Err(error) => {
            tracing::error!("Node data lookup failed: {}", error);
            status_message(error.kind().status_code())
        }
    }
}

fn status_message(status: u16) -> Message {
    Message::Text(serde_json::json!({ "status": status }).to_string())
}
