//! Remote object store abstraction.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use ledger_types::{Envelope, OwnerId, SnapshotInfo, Timestamp};

/// Abstract remote object store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Returns the name of the provider, for logs.
    fn provider_name(&self) -> &'static str;

    /// Checks that the remote is reachable.
    async fn probe(&self) -> SyncResult<()>;

    /// Lists the owner's snapshots, oldest first.
    async fn list_snapshots(&self, owner: &OwnerId) -> SyncResult<Vec<SnapshotInfo>>;

    /// Uploads a snapshot object, replacing any object of the same name.
    async fn upload(&self, name: &str, content: &[u8]) -> SyncResult<()>;

    /// Downloads a snapshot object. Missing objects are `NotFound`.
    async fn download(&self, name: &str) -> SyncResult<Vec<u8>>;

    /// Deletes a snapshot object. Deleting a missing object succeeds.
    async fn delete(&self, name: &str) -> SyncResult<()>;

    /// Upserts the owner's document and returns the remote's write time.
    ///
    /// Fails with `Permission` when the owner record does not exist or the
    /// caller may not write it.
    async fn put_document(
        &self,
        owner: &OwnerId,
        key: &str,
        envelope: &Envelope,
    ) -> SyncResult<Timestamp>;

    /// Fetches the owner's document, `None` if it was never written.
    async fn get_document(&self, owner: &OwnerId, key: &str) -> SyncResult<Option<Envelope>>;

    /// Creates the owner record if missing.
    async fn ensure_owner(&self, owner: &OwnerId) -> SyncResult<()>;
}

/// Rejects object names that are not a single plain path segment.
pub fn validate_object_name(name: &str) -> SyncResult<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(SyncError::Validation(format!("invalid object name {name:?}")))
    }
}

/// Sorts listed snapshots oldest first, by timestamp then name.
pub(crate) fn sort_snapshots(snapshots: &mut [SnapshotInfo]) {
    snapshots.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.name.cmp(&b.name)));
}
