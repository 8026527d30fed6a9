use super::{SealOutcome, Sealer};
use crate::error::{KarstError, Result};
use crate::merkle::MerkleNode;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::header;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

pub const DEFAULT_LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct SealerConfig {
    /// `host:port` of the sealer; ws:// and http:// are derived from it.
    pub base_url: String,
    /// Identity secret sent with every request.
    pub backup: String,
    pub lifecycle_timeout: Duration,
}

impl SealerConfig {
    pub fn new(base_url: impl Into<String>, backup: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            backup: backup.into(),
            lifecycle_timeout: DEFAULT_LIFECYCLE_TIMEOUT,
        }
    }

    pub fn ws_base_url(&self) -> String {
        format!("ws://{}", self.base_url)
    }

    pub fn http_base_url(&self) -> String {
        format!("http://{}", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct SealRequest<'a> {
    backup: &'a str,
    body: &'a MerkleNode,
    path: String,
}

#[derive(Debug, Serialize)]
struct UnsealRequest<'a> {
    backup: &'a str,
    path: String,
}

#[derive(Debug, Deserialize)]
struct SealResponse {
    #[serde(alias = "Status")]
    status: u16,
    #[serde(alias = "Body", default)]
    body: String,
    #[serde(alias = "Path", default)]
    path: String,
}

#[derive(Debug, Serialize)]
struct LifecycleRequest<'a> {
    hash: &'a str,
}

/// Sealer reached over a websocket for seal/unseal and plain HTTP for the
/// confirm/delete notifications.
pub struct TeeSealer {
    config: SealerConfig,
    http: reqwest::Client,
}

impl TeeSealer {
    pub fn new(config: SealerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.lifecycle_timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|error| KarstError::Config(format!("failed to build HTTP client: {}", error)))?;

        Ok(Self { config, http })
    }

    async fn exchange<T: Serialize>(&self, endpoint: &str, request: &T) -> Result<SealResponse> {
        let url = format!("{}/api/v0/storage/{}", self.config.ws_base_url(), endpoint);
        let (mut stream, _) = connect_async(url.as_str()).await?;

        let payload = serde_json::to_string(request)?;
        stream.send(Message::Text(payload)).await?;

        let message = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(Message::Binary(bytes))) => {
                    break String::from_utf8(bytes).map_err(|error| {
                        KarstError::MalformedSealResponse(error.to_string())
                    })?
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(KarstError::Seal(format!(
                        "sealer closed {} before responding",
                        endpoint
                    )));
                }
                Some(Ok(_)) => continue,
                Some(Err(error)) => return Err(error.into()),
            }
        };
        tracing::debug!("(Sealer) Recv from {}: {}", endpoint, message);

        if let Err(error) = stream.close(None).await {
            tracing::debug!("(Sealer) Close after {} failed: {}", endpoint, error);
        }

        serde_json::from_str(&message).map_err(|error| {
            KarstError::MalformedSealResponse(format!("unmarshal {} result failed: {}", endpoint, error))
        })
    }

    async fn notify(&self, endpoint: &str, sealed_hash: &str) -> Result<()> {
        let url = format!("{}/api/v0/storage/{}", self.config.http_base_url(), endpoint);
        let response = self
            .http
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .header("backup", &self.config.backup)
            .json(&LifecycleRequest { hash: sealed_hash })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status != reqwest::StatusCode::OK {
            return Err(KarstError::SealRejected {
                status: status.as_u16(),
                detail: format!("request {} failed: {}", endpoint, body),
            });
        }

        tracing::debug!("(Sealer) {} {}: {}", endpoint, sealed_hash, body);
        Ok(())
    }
}

#[async_trait]
impl Sealer for TeeSealer {
    async fn seal(&self, path: &Path, tree: &MerkleNode) -> Result<SealOutcome> {
        tracing::debug!("(Sealer) Sealing {} at '{}'", tree.hash, path.display());
        let response = self
            .exchange(
                "seal",
                &SealRequest {
                    backup: &self.config.backup,
                    body: tree,
                    path: path.to_string_lossy().into_owned(),
                },
            )
            .await?;

        if response.status != 200 {
            return Err(KarstError::SealRejected {
                status: response.status,
                detail: response.body,
            });
        }

        let sealed_tree: MerkleNode = serde_json::from_str(&response.body).map_err(|error| {
            KarstError::MalformedSealResponse(format!("unmarshal sealed tree failed: {}", error))
        })?;
        sealed_tree
            .validate()
            .map_err(|reason| KarstError::MalformedSealResponse(format!("illegal sealed tree: {}", reason)))?;

        if response.path.is_empty() {
            return Err(KarstError::MalformedSealResponse(
                "sealed path is empty".to_string(),
            ));
        }

        Ok(SealOutcome {
            sealed_tree,
            sealed_path: PathBuf::from(response.path),
        })
    }

    async fn unseal(&self, path: &Path) -> Result<PathBuf> {
        let response = self
            .exchange(
                "unseal",
                &UnsealRequest {
                    backup: &self.config.backup,
                    path: path.to_string_lossy().into_owned(),
                },
            )
            .await?;

        if response.status != 200 {
            return Err(KarstError::SealRejected {
                status: response.status,
                detail: response.body,
            });
        }

        Ok(PathBuf::from(response.path))
    }

    async fn confirm(&self, sealed_hash: &str) -> Result<()> {
        self.notify("confirm", sealed_hash).await
    }

    async fn delete(&self, sealed_hash: &str) -> Result<()> {
        self.notify("delete", sealed_hash).await
    }
}
