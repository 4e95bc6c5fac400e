//! Debounced snapshot backups and start-up reconciliation.
//!
//! The scheduler listens to the replicated store's change events. A burst of
//! relevant local mutations re-arms one debounce timer; when it fires the
//! owner's documents are sealed into a snapshot and uploaded, subject to a
//! per-day cap, and old snapshots beyond the retention limit are pruned.
//! Failures are logged and consume the firing; the next mutation re-arms.

use crate::cloud::RemoteStore;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::timing::Debouncer;
use chrono::NaiveDate;
use ledger_crypto::{open_json, seal_json, Sealed};
use ledger_storage::{ChangeEvent, ReplicatedStore};
use ledger_types::{BackupSnapshot, ChangeOrigin, Envelope, OwnerId, SnapshotInfo, Timestamp};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of start-up reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ReconcileOutcome {
    /// The remote holds no snapshot for the owner.
    NoSnapshots,
    /// Local state is at least as new as the newest snapshot.
    UpToDate,
    /// An empty device was seeded from the snapshot.
    Seeded { name: String, keys: usize },
    /// A strictly newer snapshot replaced local state.
    Replaced { name: String, keys: usize },
}

/// Uploads per owner for the current UTC day.
#[derive(Debug, Default)]
struct DailyQuota {
    counts: HashMap<OwnerId, (NaiveDate, u32)>,
}

impl DailyQuota {
    /// Takes one upload slot, or returns false when the day's cap is used up.
    fn reserve(&mut self, owner: &OwnerId, day: NaiveDate, limit: u32) -> bool {
        let entry = self.counts.entry(owner.clone()).or_insert((day, 0));
        if entry.0 != day {
            *entry = (day, 0);
        }
        if entry.1 >= limit {
            return false;
        }
        entry.1 += 1;
        true
    }

    /// Gives back a slot taken by [`reserve`](Self::reserve).
    fn release(&mut self, owner: &OwnerId, day: NaiveDate) {
        if let Some((counted_day, count)) = self.counts.get_mut(owner) {
            if *counted_day == day {
                *count = count.saturating_sub(1);
            }
        }
    }
}

/// Snapshot backup and reconciliation against a remote store.
pub struct BackupScheduler {
    store: Arc<ReplicatedStore>,
    remote: Arc<dyn RemoteStore>,
    config: SyncConfig,
    quota: Mutex<DailyQuota>,
}

impl BackupScheduler {
    /// Fails only on invalid configuration.
    pub fn new(
        store: Arc<ReplicatedStore>,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            remote,
            config,
            quota: Mutex::new(DailyQuota::default()),
        })
    }

    /// Starts the debounce loop. The subscription is taken before the task
    /// starts, so no mutation made after this call is missed.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let mut events = self.store.subscribe();
        tokio::spawn(async move {
            let mut debouncer = Debouncer::new(scheduler.config.backup_debounce());
            let mut pending: BTreeSet<OwnerId> = BTreeSet::new();
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(event) => {
                            if scheduler.is_relevant(&event) {
                                pending.insert(event.owner_id);
                                debouncer.poke();
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!("Backup scheduler missed {} change events", missed);
                            if !pending.is_empty() {
                                debouncer.poke();
                            }
                        }
                        Err(RecvError::Closed) => {
                            debug!("Change events closed, backup scheduler stopping");
                            break;
                        }
                    },
                    _ = debouncer.fired() => {
                        for owner in std::mem::take(&mut pending) {
                            scheduler.on_debounce_fired(&owner).await;
                        }
                    }
                }
            }
        })
    }

    fn is_relevant(&self, event: &ChangeEvent) -> bool {
        event.origin != ChangeOrigin::Restore && self.config.is_relevant(&event.key)
    }

    async fn on_debounce_fired(&self, owner: &OwnerId) {
        match self.backup_now(owner).await {
            Ok(Some(info)) => debug!("Debounced backup uploaded {}", info.name),
            Ok(None) => debug!("Nothing to back up for {}", owner),
            Err(SyncError::QuotaExceeded { limit, .. }) => {
                debug!("Daily snapshot cap of {} reached for {}, skipping", limit, owner)
            }
            Err(e) => warn!("Backup for {} failed: {}", owner, e),
        }
    }

    // ── Snapshots ────────────────────────────────────────────────

    /// Snapshots the owner's relevant documents now, honoring the daily cap.
    ///
    /// Returns `None` when the owner has no documents. Retention is applied
    /// to the snapshots that existed before this upload, so with `M + k`
    /// already stored exactly `k` are deleted and `M + 1` remain until the
    /// next [`prune`](Self::prune).
    pub async fn backup_now(&self, owner: &OwnerId) -> SyncResult<Option<SnapshotInfo>> {
        let now = self.store.now();
        let day = now.utc_date();
        self.reserve_upload(owner, day)?;

        let uploaded = self.upload_snapshot(owner, now).await;
        if !matches!(uploaded, Ok(Some(_))) {
            self.release_upload(owner, day);
        }
        let Some((info, existing)) = uploaded? else {
            return Ok(None);
        };

        match existing {
            Ok(existing) => {
                if let Err(e) = self.prune_listed(owner, &existing).await {
                    warn!("Pruning snapshots for {} failed: {}", owner, e);
                }
            }
            Err(e) => warn!("Listing snapshots for {} failed, not pruning: {}", owner, e),
        }
        Ok(Some(info))
    }

    /// Seals and uploads the snapshot. Also returns the listing taken just
    /// before the upload.
    async fn upload_snapshot(
        &self,
        owner: &OwnerId,
        now: Timestamp,
    ) -> SyncResult<Option<(SnapshotInfo, SyncResult<Vec<SnapshotInfo>>)>> {
        let mut documents = BTreeMap::new();
        for key in &self.config.relevant_keys {
            if let Some(document) = self.store.load_document(key, owner).await {
                documents.insert(key.clone(), document);
            }
        }
        if documents.is_empty() {
            return Ok(None);
        }

        let snapshot = BackupSnapshot::new(owner.clone(), now, self.store.device_id(), documents);
        let bytes = self.seal_snapshot(&snapshot)?;
        let existing = self.remote.list_snapshots(owner).await;
        self.remote.upload(&snapshot.id, &bytes).await?;
        info!(
            "Uploaded snapshot {} ({} collections, {} bytes)",
            snapshot.id,
            snapshot.documents.len(),
            bytes.len()
        );
        let info = SnapshotInfo {
            name: snapshot.id,
            timestamp: now,
        };
        Ok(Some((info, existing)))
    }

    /// Deletes the oldest snapshots beyond the retention limit. Returns how
    /// many were deleted; individual delete failures are logged.
    pub async fn prune(&self, owner: &OwnerId) -> SyncResult<usize> {
        let snapshots = self.remote.list_snapshots(owner).await?;
        self.prune_listed(owner, &snapshots).await
    }

    async fn prune_listed(
        &self,
        owner: &OwnerId,
        snapshots: &[SnapshotInfo],
    ) -> SyncResult<usize> {
        let excess = snapshots.len().saturating_sub(self.config.max_snapshots);
        let mut deleted = 0;
        for snapshot in snapshots.iter().take(excess) {
            match self.remote.delete(&snapshot.name).await {
                Ok(()) => {
                    deleted += 1;
                    debug!("Pruned snapshot {}", snapshot.name);
                }
                Err(e) => warn!("Failed to prune snapshot {}: {}", snapshot.name, e),
            }
        }
        if deleted > 0 {
            info!("Pruned {} old snapshots for {}", deleted, owner);
        }
        Ok(deleted)
    }

    /// The owner's snapshots, oldest first.
    pub async fn list_backups(&self, owner: &OwnerId) -> SyncResult<Vec<SnapshotInfo>> {
        self.remote.list_snapshots(owner).await
    }

    /// Restores the named snapshot as the current state on every replica,
    /// the remote one included. Restored documents are stamped with the
    /// current time so they win over newer edits.
    pub async fn restore(&self, owner: &OwnerId, name: &str) -> SyncResult<usize> {
        let snapshot = self.fetch_snapshot(owner, name).await?;
        self.apply_snapshot(owner, &snapshot, self.store.now(), true).await
    }

    // ── Reconciliation ───────────────────────────────────────────

    /// Catches this device up with the newest snapshot.
    ///
    /// Without local documents the newest snapshot seeds the store. With
    /// local documents it replaces them only if strictly newer than the last
    /// local mutation. Seeded documents keep the snapshot's timestamp and only
    /// local backends are written; the remote replica is left to sync.
    pub async fn reconcile(&self, owner: &OwnerId) -> SyncResult<ReconcileOutcome> {
        let snapshots = self.remote.list_snapshots(owner).await?;
        let Some(newest) = snapshots.last() else {
            debug!("No snapshots for {}", owner);
            return Ok(ReconcileOutcome::NoSnapshots);
        };

        let marker = self.last_local_mutation(owner).await;
        if let Some(marker) = marker {
            if newest.timestamp <= marker {
                debug!(
                    "Local state of {} ({}) is not older than {}",
                    owner, marker, newest.name
                );
                return Ok(ReconcileOutcome::UpToDate);
            }
        }

        let snapshot = self.fetch_snapshot(owner, &newest.name).await?;
        let keys = self
            .apply_snapshot(owner, &snapshot, snapshot.timestamp, false)
            .await?;
        info!("Reconciled {} from snapshot {} ({} collections)", owner, newest.name, keys);
        Ok(match marker {
            None => ReconcileOutcome::Seeded {
                name: newest.name.clone(),
                keys,
            },
            Some(_) => ReconcileOutcome::Replaced {
                name: newest.name.clone(),
                keys,
            },
        })
    }

    /// Newest timestamp among the owner's local documents.
    pub async fn last_local_mutation(&self, owner: &OwnerId) -> Option<Timestamp> {
        let mut newest = None;
        for key in &self.config.relevant_keys {
            if let Some(document) = self.store.load_local_document(key, owner).await {
                newest = newest.max(Some(document.timestamp));
            }
        }
        newest
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn seal_snapshot(&self, snapshot: &BackupSnapshot) -> SyncResult<Vec<u8>> {
        let Sealed { data, iv } = seal_json(self.store.cipher().as_ref(), snapshot)?;
        let envelope = Envelope {
            data,
            iv,
            timestamp: snapshot.timestamp,
            device_id: snapshot.device_id,
            version: snapshot.version.clone(),
        };
        Ok(envelope.to_bytes()?)
    }

    async fn fetch_snapshot(&self, owner: &OwnerId, name: &str) -> SyncResult<BackupSnapshot> {
        let bytes = self.remote.download(name).await?;
        let envelope = Envelope::from_bytes(&bytes)?;
        let sealed = Sealed {
            data: envelope.data,
            iv: envelope.iv,
        };
        let snapshot: BackupSnapshot = open_json(self.store.cipher().as_ref(), &sealed)?;
        if &snapshot.owner_id != owner {
            return Err(SyncError::Validation(format!(
                "snapshot {name} belongs to another owner"
            )));
        }
        Ok(snapshot)
    }

    /// Writes the snapshot's relevant documents. `publish` also writes them
    /// to the remote replica; otherwise only local backends change.
    async fn apply_snapshot(
        &self,
        owner: &OwnerId,
        snapshot: &BackupSnapshot,
        timestamp: Timestamp,
        publish: bool,
    ) -> SyncResult<usize> {
        let mut restored = 0;
        for (key, document) in &snapshot.documents {
            if !self.config.is_relevant(key) {
                continue;
            }
            let payload = document.payload.clone();
            if publish {
                self.store
                    .save_at(key, payload, owner, timestamp, ChangeOrigin::Restore)
                    .await?;
            } else {
                self.store
                    .save_local_at(key, payload, owner, timestamp, ChangeOrigin::Restore)
                    .await?;
            }
            restored += 1;
        }
        Ok(restored)
    }

    fn reserve_upload(&self, owner: &OwnerId, day: NaiveDate) -> SyncResult<()> {
        let limit = self.config.max_snapshots_per_day;
        let mut quota = self
            .quota
            .lock()
            .map_err(|_| SyncError::Storage("snapshot quota poisoned".to_string()))?;
        if quota.reserve(owner, day, limit) {
            Ok(())
        } else {
            Err(SyncError::QuotaExceeded {
                owner: owner.to_string(),
                limit,
            })
        }
    }

    fn release_upload(&self, owner: &OwnerId, day: NaiveDate) {
        match self.quota.lock() {
            Ok(mut quota) => quota.release(owner, day),
            Err(_) => warn!("Snapshot quota poisoned, not releasing slot for {}", owner),
        }
    }
}
