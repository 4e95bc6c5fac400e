//! Stable per-installation device identity.

use crate::error::{StorageError, StorageResult};
use ledger_types::DeviceId;
use std::path::Path;
use tokio::fs;
use tracing::info;

/// Loads the device id stored at `path`, or creates and persists a new one.
///
/// The file holds the UUID as plain text.
pub async fn load_or_create_device_id(path: &Path) -> StorageResult<DeviceId> {
    match fs::read_to_string(path).await {
        Ok(contents) => DeviceId::parse(contents.trim())
            .map_err(|e| StorageError::InvalidData(format!("device id at {path:?}: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let id = DeviceId::new();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(path, id.to_string()).await?;
            info!("Created device id {} at {:?}", id, path);
            Ok(id)
        }
        Err(e) => Err(e.into()),
    }
}
