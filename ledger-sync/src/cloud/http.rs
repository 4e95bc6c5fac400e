//! HTTP/JSON REST remote store.
//!
//! Endpoints, relative to `base_url`:
//!
//! | Operation      | Request                                  |
//! |----------------|------------------------------------------|
//! | probe          | `GET /health`                            |
//! | list_snapshots | `GET /snapshots?prefix=<prefix>`         |
//! | upload         | `PUT /snapshots/<name>`                  |
//! | download       | `GET /snapshots/<name>`                  |
//! | delete         | `DELETE /snapshots/<name>`               |
//! | put_document   | `PUT /owners/<owner>/documents/<key>`    |
//! | get_document   | `GET /owners/<owner>/documents/<key>`    |
//! | ensure_owner   | `PUT /owners/<owner>`                    |
//!
//! Every request except the probe carries the bearer token.

use super::remote::{sort_snapshots, validate_object_name, RemoteStore};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use ledger_types::{parse_snapshot_name, snapshot_prefix, Envelope, OwnerId, SnapshotInfo, Timestamp};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// HTTP remote configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRemoteConfig {
    /// Base URL of the API, without a trailing slash.
    pub base_url: String,
    /// Per-request timeout (seconds).
    pub timeout_secs: u64,
}

impl Default for HttpRemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutDocumentResponse {
    written_at: Timestamp,
}

/// REST client implementing [`RemoteStore`].
pub struct HttpRemote {
    config: HttpRemoteConfig,
    client: Client,
    token: RwLock<Option<String>>,
}

impl HttpRemote {
    /// Creates a client. Fails only if the TLS backend cannot initialise.
    pub fn new(config: HttpRemoteConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            config: HttpRemoteConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            client,
            token: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &HttpRemoteConfig {
        &self.config
    }

    /// Sets (or clears) the bearer token issued by the auth provider.
    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn document_path(owner: &OwnerId, key: &str) -> String {
        format!(
            "/owners/{}/documents/{}",
            urlencoding::encode(owner.as_str()),
            urlencoding::encode(key)
        )
    }

    async fn authorized(&self, request: RequestBuilder) -> SyncResult<RequestBuilder> {
        let guard = self.token.read().await;
        let token = guard.as_ref().ok_or(SyncError::NotAuthenticated)?;
        Ok(request.bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> SyncResult<Response> {
        self.authorized(request)
            .await?
            .send()
            .await
            .map_err(|e| transport_error(what, e))
    }
}

fn transport_error(what: &str, err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else {
        SyncError::Network(format!("{what} failed: {err}"))
    }
}

/// Maps a non-success response to the error taxonomy.
async fn status_error(what: &str, response: Response) -> SyncError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SyncError::Permission(format!("{what} rejected ({status}): {body}"))
        }
        StatusCode::NOT_FOUND => SyncError::NotFound(format!("{what}: {body}")),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            SyncError::Validation(format!("{what} rejected ({status}): {body}"))
        }
        _ => SyncError::Network(format!("{what} failed ({status}): {body}")),
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    fn provider_name(&self) -> &'static str {
        "http"
    }

    async fn probe(&self) -> SyncResult<()> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| transport_error("probe", e))?;
        if !response.status().is_success() {
            return Err(status_error("probe", response).await);
        }
        Ok(())
    }

    async fn list_snapshots(&self, owner: &OwnerId) -> SyncResult<Vec<SnapshotInfo>> {
        let prefix = snapshot_prefix(owner);
        let request = self
            .client
            .get(self.url("/snapshots"))
            .query(&[("prefix", prefix.as_str())]);
        let response = self.send(request, "list snapshots").await?;
        if !response.status().is_success() {
            return Err(status_error("list snapshots", response).await);
        }

        let entries: Vec<SnapshotEntry> = response
            .json()
            .await
            .map_err(|e| SyncError::Network(format!("parse snapshot list failed: {e}")))?;

        let mut snapshots: Vec<SnapshotInfo> = entries
            .into_iter()
            .filter(|entry| entry.name.starts_with(&prefix))
            .filter_map(|entry| match parse_snapshot_name(&entry.name) {
                Some(timestamp) => Some(SnapshotInfo {
                    name: entry.name,
                    timestamp,
                }),
                None => {
                    warn!("Skipping unrecognised snapshot object {}", entry.name);
                    None
                }
            })
            .collect();
        sort_snapshots(&mut snapshots);
        Ok(snapshots)
    }

    async fn upload(&self, name: &str, content: &[u8]) -> SyncResult<()> {
        validate_object_name(name)?;
        debug!("Uploading {} ({} bytes)", name, content.len());
        let request = self
            .client
            .put(self.url(&format!("/snapshots/{}", urlencoding::encode(name))))
            .header("Content-Type", "application/octet-stream")
            .body(content.to_vec());
        let response = self.send(request, "upload").await?;
        if !response.status().is_success() {
            return Err(status_error("upload", response).await);
        }
        info!("Uploaded snapshot {}", name);
        Ok(())
    }

    async fn download(&self, name: &str) -> SyncResult<Vec<u8>> {
        validate_object_name(name)?;
        let request = self
            .client
            .get(self.url(&format!("/snapshots/{}", urlencoding::encode(name))));
        let response = self.send(request, "download").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound(name.to_string()));
        }
        if !response.status().is_success() {
            return Err(status_error("download", response).await);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::Network(format!("read download body failed: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, name: &str) -> SyncResult<()> {
        validate_object_name(name)?;
        let request = self
            .client
            .delete(self.url(&format!("/snapshots/{}", urlencoding::encode(name))));
        let response = self.send(request, "delete").await?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(status_error("delete", response).await);
        }
        debug!("Deleted snapshot {}", name);
        Ok(())
    }

    async fn put_document(
        &self,
        owner: &OwnerId,
        key: &str,
        envelope: &Envelope,
    ) -> SyncResult<Timestamp> {
        let request = self
            .client
            .put(self.url(&Self::document_path(owner, key)))
            .json(envelope);
        let response = self.send(request, "put document").await?;
        if !response.status().is_success() {
            return Err(status_error("put document", response).await);
        }
        let body: PutDocumentResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Network(format!("parse put response failed: {e}")))?;
        Ok(body.written_at)
    }

    async fn get_document(&self, owner: &OwnerId, key: &str) -> SyncResult<Option<Envelope>> {
        let request = self.client.get(self.url(&Self::document_path(owner, key)));
        let response = self.send(request, "get document").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error("get document", response).await);
        }
        let envelope = response
            .json()
            .await
            .map_err(|e| SyncError::Network(format!("parse document failed: {e}")))?;
        Ok(Some(envelope))
    }

    async fn ensure_owner(&self, owner: &OwnerId) -> SyncResult<()> {
        let request = self.client.put(self.url(&format!(
            "/owners/{}",
            urlencoding::encode(owner.as_str())
        )));
        let response = self.send(request, "ensure owner").await?;
        if !response.status().is_success() && response.status() != StatusCode::CONFLICT {
            return Err(status_error("ensure owner", response).await);
        }
        info!("Ensured owner record for {}", owner);
        Ok(())
    }
}
