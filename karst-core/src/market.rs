//! Hand-off of remotely stored files to a storage provider.
//!
//! The chain itself stays opaque: [`StorageMarket`] only maps a provider
//! address to its endpoint and places storage orders.

use crate::error::{KarstError, Result};
use crate::merkle::MerkleNode;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Orders shorter than this many blocks are refused before reaching the chain.
pub const MIN_ORDER_DURATION: u64 = 30;

#[async_trait]
pub trait StorageMarket: Send + Sync {
    /// Base websocket URL of a provider's node, e.g. `ws://10.0.0.7:17000`
    async fn provider_endpoint(&self, provider: &str) -> Result<String>;

    /// Place an order and return its hash
    async fn place_storage_order(
        &self,
        provider: &str,
        duration: u64,
        root_hash: &str,
        size: u64,
    ) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclareReceipt {
    pub store_order_hash: String,
    pub info: String,
}

#[async_trait]
pub trait Declarer: Send + Sync {
    async fn declare(&self, tree: &MerkleNode, provider: &str, duration: u64)
        -> Result<DeclareReceipt>;

    /// Tell the provider a declared file is complete and return its info
    async fn finish(&self, tree: &MerkleNode, provider: &str) -> Result<String>;
}

/// Type alias for dynamic declarer
pub type DynDeclarer = dyn Declarer;

#[derive(Debug, Serialize)]
struct FileSealMessage<'a> {
    client: &'a str,
    store_order_hash: &'a str,
    merkle_tree: &'a MerkleNode,
}

#[derive(Debug, Serialize)]
struct FileFinishMessage<'a> {
    client: &'a str,
    merkle_tree: &'a MerkleNode,
}

#[derive(Debug, Deserialize)]
struct ProviderReturnMessage {
    status: u16,
    #[serde(default)]
    info: String,
}

/// Declares files by placing an order and asking the provider to seal.
pub struct ProviderDeclarer {
    market: Arc<dyn StorageMarket>,
    client_address: String,
}

impl ProviderDeclarer {
    pub fn new(market: Arc<dyn StorageMarket>, client_address: impl Into<String>) -> Self {
        Self {
            market,
            client_address: client_address.into(),
        }
    }

    async fn provider_url(&self, provider: &str, api: &str) -> Result<String> {
        let endpoint = self.market.provider_endpoint(provider).await?;
        let url = format!("{}/api/v0/file/{}", endpoint.trim_end_matches('/'), api);
        tracing::debug!("Resolved file {} address '{}' of '{}'", api, url, provider);
        Ok(url)
    }

    /// Sends one JSON message and waits for the provider's JSON reply.
    async fn exchange<T: Serialize>(&self, url: &str, message: &T) -> Result<ProviderReturnMessage> {
        let (mut stream, _) = connect_async(url)
            .await
            .map_err(|error| KarstError::Market(format!("connect {}: {}", url, error)))?;

        let message = serde_json::to_string(message)?;
        tracing::debug!("Message sent to {}", url);

        stream
            .send(Message::Text(message))
            .await
            .map_err(|error| KarstError::Market(error.to_string()))?;

        let reply = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(KarstError::Market(format!(
                        "provider at {} closed before responding",
                        url
                    )));
                }
                Some(Ok(_)) => continue,
                Some(Err(error)) => return Err(KarstError::Market(error.to_string())),
            }
        };
        tracing::debug!("Return from {}: {}", url, reply);

        let _ = stream.close(None).await;
        serde_json::from_str(&reply)
            .map_err(|error| KarstError::Market(format!("unmarshal reply of {}: {}", url, error)))
    }
}

fn check_declarable(tree: &MerkleNode, provider: &str) -> Result<()> {
    tree.validate()
        .map_err(|reason| KarstError::Input(format!("illegal merkle tree: {}", reason)))?;

    if provider.trim().is_empty() {
        return Err(KarstError::Input("provider is required".to_string()));
    }
    Ok(())
}

#[async_trait]
impl Declarer for ProviderDeclarer {
    async fn declare(
        &self,
        tree: &MerkleNode,
        provider: &str,
        duration: u64,
    ) -> Result<DeclareReceipt> {
        check_declarable(tree, provider)?;

        if duration <= MIN_ORDER_DURATION {
            return Err(KarstError::Input(format!(
                "duration must be greater than {} blocks",
                MIN_ORDER_DURATION
            )));
        }

        let seal_url = self.provider_url(provider, "seal").await?;

        let store_order_hash = self
            .market
            .place_storage_order(provider, duration, &format!("0x{}", tree.hash), tree.size)
            .await?;
        tracing::info!("Placed storage order {} for {}", store_order_hash, tree.hash);

        let reply = self
            .exchange(
                &seal_url,
                &FileSealMessage {
                    client: &self.client_address,
                    store_order_hash: &store_order_hash,
                    merkle_tree: tree,
                },
            )
            .await?;

        if reply.status != 200 {
            return Err(KarstError::SealRejected {
                status: reply.status,
                detail: reply.info,
            });
        }

        Ok(DeclareReceipt {
            store_order_hash,
            info: reply.info,
        })
    }

    async fn finish(&self, tree: &MerkleNode, provider: &str) -> Result<String> {
        check_declarable(tree, provider)?;

        let finish_url = self.provider_url(provider, "finish").await?;
        let reply = self
            .exchange(
                &finish_url,
                &FileFinishMessage {
                    client: &self.client_address,
                    merkle_tree: tree,
                },
            )
            .await?;

        if reply.status != 200 {
            return Err(KarstError::SealRejected {
                status: reply.status,
                detail: reply.info,
            });
        }

        tracing::info!("Provider {} finished {}", provider, tree.hash);
        Ok(reply.info)
    }
}
