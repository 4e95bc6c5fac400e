//! Local async store: one envelope file per key in a directory.
//!
//! Writes go to a temporary file in the same directory and are renamed into
//! place, so a reader sees either the old or the new envelope, never a torn
//! one.

use crate::backend::{Backend, BackendKind, PutOutcome};
use async_trait::async_trait;
use ledger_types::Envelope;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

const EXTENSION: &str = "env.json";

/// Directory-backed durable store written through tokio.
#[derive(Debug, Clone)]
pub struct LocalAsyncBackend {
    root: PathBuf,
}

impl LocalAsyncBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding `key`. Keys are percent-encoded so any owner id is a
    /// safe file name.
    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{EXTENSION}", urlencoding::encode(key)))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        fs::create_dir_all(&self.root).await?;
        let tmp = self.root.join(format!(".{}.tmp", Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp, bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        fs::rename(&tmp, path).await
    }
}

#[async_trait]
impl Backend for LocalAsyncBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalAsync
    }

    fn durable(&self) -> bool {
        true
    }

    async fn probe(&self) -> bool {
        match fs::create_dir_all(&self.root).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Local store at {:?} unavailable: {}", self.root, e);
                false
            }
        }
    }

    async fn put(&self, key: &str, envelope: &Envelope) -> PutOutcome {
        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => return PutOutcome::Failed(e.to_string()),
        };
        let path = self.path_for(key);
        match self.write_atomic(&path, &bytes).await {
            Ok(()) => {
                debug!("Wrote {} ({} bytes) to local store", key, bytes.len());
                PutOutcome::Stored
            }
            Err(e) => {
                warn!("Local store write of {} failed: {}", key, e);
                PutOutcome::Failed(e.to_string())
            }
        }
    }

    async fn get(&self, key: &str) -> Option<Envelope> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Local store read of {} failed: {}", key, e);
                return None;
            }
        };
        match Envelope::from_bytes(&bytes) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                warn!("Skipping unreadable envelope at {:?}: {}", path, e);
                None
            }
        }
    }
}
