//! In-memory remote store with failure injection.

use super::remote::{sort_snapshots, validate_object_name, RemoteStore};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use ledger_types::{
    parse_snapshot_name, snapshot_prefix, Clock, Envelope, OwnerId, SnapshotInfo, SystemClock,
    Timestamp,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Objects {
    snapshots: BTreeMap<String, Vec<u8>>,
    documents: HashMap<(OwnerId, String), Envelope>,
    owners: HashSet<OwnerId>,
}

/// Remote store held in memory. Clones share the same objects, so two
/// devices in one process can rendezvous through it.
#[derive(Clone)]
pub struct MemoryRemote {
    objects: Arc<RwLock<Objects>>,
    clock: Arc<dyn Clock>,
    offline: Arc<AtomicBool>,
    require_owner: Arc<AtomicBool>,
    uploads: Arc<AtomicUsize>,
    document_puts: Arc<AtomicUsize>,
    owner_requests: Arc<AtomicUsize>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Uses `clock` for server-assigned write times.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            objects: Arc::new(RwLock::new(Objects::default())),
            clock,
            offline: Arc::new(AtomicBool::new(false)),
            require_owner: Arc::new(AtomicBool::new(false)),
            uploads: Arc::new(AtomicUsize::new(0)),
            document_puts: Arc::new(AtomicUsize::new(0)),
            owner_requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// While offline every operation fails with `Network`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// When set, `put_document` fails with `Permission` until
    /// `ensure_owner` created the owner record.
    pub fn set_require_owner(&self, required: bool) {
        self.require_owner.store(required, Ordering::SeqCst);
    }

    /// Successful snapshot uploads so far.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Successful document writes so far.
    pub fn document_put_count(&self) -> usize {
        self.document_puts.load(Ordering::SeqCst)
    }

    /// `ensure_owner` calls so far.
    pub fn owner_request_count(&self) -> usize {
        self.owner_requests.load(Ordering::SeqCst)
    }

    /// Names of all stored snapshot objects, in name order.
    pub async fn snapshot_names(&self) -> Vec<String> {
        self.objects.read().await.snapshots.keys().cloned().collect()
    }

    fn check_online(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(SyncError::Network("remote unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    fn provider_name(&self) -> &'static str {
        "memory"
    }

    async fn probe(&self) -> SyncResult<()> {
        self.check_online()
    }

    async fn list_snapshots(&self, owner: &OwnerId) -> SyncResult<Vec<SnapshotInfo>> {
        self.check_online()?;
        let prefix = snapshot_prefix(owner);
        let objects = self.objects.read().await;
        let mut snapshots: Vec<SnapshotInfo> = objects
            .snapshots
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .filter_map(|name| {
                parse_snapshot_name(name).map(|timestamp| SnapshotInfo {
                    name: name.clone(),
                    timestamp,
                })
            })
            .collect();
        sort_snapshots(&mut snapshots);
        Ok(snapshots)
    }

    async fn upload(&self, name: &str, content: &[u8]) -> SyncResult<()> {
        validate_object_name(name)?;
        self.check_online()?;
        self.objects
            .write()
            .await
            .snapshots
            .insert(name.to_string(), content.to_vec());
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn download(&self, name: &str) -> SyncResult<Vec<u8>> {
        self.check_online()?;
        self.objects
            .read()
            .await
            .snapshots
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(name.to_string()))
    }

    async fn delete(&self, name: &str) -> SyncResult<()> {
        self.check_online()?;
        self.objects.write().await.snapshots.remove(name);
        Ok(())
    }

    async fn put_document(
        &self,
        owner: &OwnerId,
        key: &str,
        envelope: &Envelope,
    ) -> SyncResult<Timestamp> {
        self.check_online()?;
        let mut objects = self.objects.write().await;
        if self.require_owner.load(Ordering::SeqCst) && !objects.owners.contains(owner) {
            return Err(SyncError::Permission(format!("no owner record for {owner}")));
        }
        objects
            .documents
            .insert((owner.clone(), key.to_string()), envelope.clone());
        self.document_puts.fetch_add(1, Ordering::SeqCst);
        Ok(self.clock.now())
    }

    async fn get_document(&self, owner: &OwnerId, key: &str) -> SyncResult<Option<Envelope>> {
        self.check_online()?;
        Ok(self
            .objects
            .read()
            .await
            .documents
            .get(&(owner.clone(), key.to_string()))
            .cloned())
    }

    async fn ensure_owner(&self, owner: &OwnerId) -> SyncResult<()> {
        self.check_online()?;
        self.owner_requests.fetch_add(1, Ordering::SeqCst);
        self.objects.write().await.owners.insert(owner.clone());
        Ok(())
    }
}
