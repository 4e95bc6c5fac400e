//! Folder-backed remote store.
//!
//! Uses file system access to a synced drive folder (iCloud Drive, a
//! network share, ...) mounted on this machine. Layout under the root:
//!
//! ```text
//! snapshots/<name>
//! owners/<owner>/owner.json
//! owners/<owner>/documents/<key>.json
//! ```

use super::remote::{sort_snapshots, validate_object_name, RemoteStore};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use ledger_types::{
    parse_snapshot_name, snapshot_prefix, Envelope, OwnerId, SnapshotInfo, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// A stored document together with the time the folder accepted it.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredDocument {
    written_at: Timestamp,
    envelope: Envelope,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OwnerRecord {
    owner_id: OwnerId,
    created_at: Timestamp,
}

/// Remote store on a mounted folder.
#[derive(Debug, Clone)]
pub struct FolderRemote {
    root: PathBuf,
}

impl FolderRemote {
    /// Uses `root` as the store. The folder itself must already exist; the
    /// layout inside it is created on demand.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    fn owner_dir(&self, owner: &OwnerId) -> PathBuf {
        self.root
            .join("owners")
            .join(urlencoding::encode(owner.as_str()).into_owned())
    }

    fn document_path(&self, owner: &OwnerId, key: &str) -> PathBuf {
        self.owner_dir(owner)
            .join("documents")
            .join(format!("{}.json", urlencoding::encode(key)))
    }

    async fn ensure_root(&self) -> SyncResult<()> {
        match fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(SyncError::Network(format!(
                "remote folder {:?} is not a directory",
                self.root
            ))),
            Err(e) => Err(SyncError::Network(format!(
                "remote folder {:?} not mounted: {e}",
                self.root
            ))),
        }
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> SyncResult<()> {
        let parent = path
            .parent()
            .ok_or_else(|| SyncError::Storage(format!("no parent for {path:?}")))?;
        fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::Storage(format!("failed to create {parent:?}: {e}")))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| SyncError::Storage(format!("failed to write {tmp:?}: {e}")))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| SyncError::Storage(format!("failed to replace {path:?}: {e}")))
    }
}

#[async_trait]
impl RemoteStore for FolderRemote {
    fn provider_name(&self) -> &'static str {
        "folder"
    }

    async fn probe(&self) -> SyncResult<()> {
        self.ensure_root().await
    }

    async fn list_snapshots(&self, owner: &OwnerId) -> SyncResult<Vec<SnapshotInfo>> {
        self.ensure_root().await?;
        let dir = self.snapshots_dir();
        let prefix = snapshot_prefix(owner);

        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SyncError::Storage(format!(
                    "failed to read snapshot folder: {e}"
                )));
            }
        };

        let mut snapshots = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| SyncError::Storage(format!("failed to read directory entry: {e}")))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) {
                continue;
            }
            match parse_snapshot_name(&name) {
                Some(timestamp) => snapshots.push(SnapshotInfo { name, timestamp }),
                None => warn!("Skipping unrecognised snapshot object {}", name),
            }
        }
        sort_snapshots(&mut snapshots);
        Ok(snapshots)
    }

    async fn upload(&self, name: &str, content: &[u8]) -> SyncResult<()> {
        validate_object_name(name)?;
        self.ensure_root().await?;
        debug!("Uploading {} ({} bytes) to folder", name, content.len());
        Self::write_atomic(&self.snapshots_dir().join(name), content).await?;
        info!("Uploaded snapshot {}", name);
        Ok(())
    }

    async fn download(&self, name: &str) -> SyncResult<Vec<u8>> {
        validate_object_name(name)?;
        self.ensure_root().await?;
        match fs::read(self.snapshots_dir().join(name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SyncError::NotFound(name.to_string()))
            }
            Err(e) => Err(SyncError::Storage(format!("failed to read {name}: {e}"))),
        }
    }

    async fn delete(&self, name: &str) -> SyncResult<()> {
        validate_object_name(name)?;
        self.ensure_root().await?;
        match fs::remove_file(self.snapshots_dir().join(name)).await {
            Ok(()) => {
                debug!("Deleted snapshot {}", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::Storage(format!("failed to delete {name}: {e}"))),
        }
    }

    async fn put_document(
        &self,
        owner: &OwnerId,
        key: &str,
        envelope: &Envelope,
    ) -> SyncResult<Timestamp> {
        self.ensure_root().await?;
        if fs::metadata(self.owner_dir(owner).join("owner.json"))
            .await
            .is_err()
        {
            return Err(SyncError::Permission(format!(
                "no owner record for {owner}"
            )));
        }
        let written_at = Timestamp::now();
        let stored = StoredDocument {
            written_at,
            envelope: envelope.clone(),
        };
        Self::write_atomic(&self.document_path(owner, key), &serde_json::to_vec(&stored)?)
            .await?;
        Ok(written_at)
    }

    async fn get_document(&self, owner: &OwnerId, key: &str) -> SyncResult<Option<Envelope>> {
        self.ensure_root().await?;
        let bytes = match fs::read(self.document_path(owner, key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SyncError::Storage(format!("failed to read {key}: {e}"))),
        };
        let stored: StoredDocument = serde_json::from_slice(&bytes)?;
        Ok(Some(stored.envelope))
    }

    async fn ensure_owner(&self, owner: &OwnerId) -> SyncResult<()> {
        self.ensure_root().await?;
        let path = self.owner_dir(owner).join("owner.json");
        if fs::metadata(&path).await.is_ok() {
            return Ok(());
        }
        let record = OwnerRecord {
            owner_id: owner.clone(),
            created_at: Timestamp::now(),
        };
        Self::write_atomic(&path, &serde_json::to_vec(&record)?).await?;
        info!("Created owner record for {}", owner);
        Ok(())
    }
}
