//! Fast-sync cache: an in-process map mirrored synchronously to one file.

use crate::backend::{Backend, BackendKind, PutOutcome};
use crate::error::StorageResult;
use async_trait::async_trait;
use ledger_types::Envelope;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Synchronous key-value cache, the floor guarantee of every platform.
///
/// Every `put` rewrites the mirror file before returning, so a completed
/// write is on disk. Without a path the cache is memory-only.
#[derive(Debug)]
pub struct FastSyncBackend {
    entries: Mutex<HashMap<String, Envelope>>,
    path: Option<PathBuf>,
}

impl FastSyncBackend {
    /// Creates a memory-only cache.
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            path: None,
        }
    }

    /// Opens the cache mirrored at `path`, loading any existing contents.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("Opened fast-sync cache at {:?}", path);
        Ok(Self {
            entries: Mutex::new(entries),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn mirror(path: &Path, entries: &HashMap<String, Envelope>) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec(entries).map_err(std::io::Error::other)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)
    }
}

#[async_trait]
impl Backend for FastSyncBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FastSync
    }

    fn durable(&self) -> bool {
        self.path.is_some()
    }

    async fn probe(&self) -> bool {
        self.entries.lock().is_ok()
    }

    async fn put(&self, key: &str, envelope: &Envelope) -> PutOutcome {
        let Ok(mut entries) = self.entries.lock() else {
            return PutOutcome::Failed("fast-sync cache poisoned".to_string());
        };
        let previous = entries.insert(key.to_string(), envelope.clone());

        if let Some(path) = &self.path {
            if let Err(e) = Self::mirror(path, &entries) {
                warn!("Failed to mirror fast-sync cache to {:?}: {}", path, e);
                match previous {
                    Some(prev) => entries.insert(key.to_string(), prev),
                    None => entries.remove(key),
                };
                return PutOutcome::Failed(e.to_string());
            }
        }
        PutOutcome::Stored
    }

    async fn get(&self, key: &str) -> Option<Envelope> {
        self.entries.lock().ok()?.get(key).cloned()
    }
}
