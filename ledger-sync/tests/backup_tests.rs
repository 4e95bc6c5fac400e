mod common;

use async_trait::async_trait;
use common::{
    clock, device, device_with_remote, fast_config, memory_remote, owner, shared_cipher, T0,
};
use ledger_crypto::seal_json;
use ledger_sync::cloud::{MemoryRemote, RemoteStore};
use ledger_sync::{BackupScheduler, ReconcileOutcome, SyncConfig, SyncError, SyncResult};
use ledger_types::{
    snapshot_name, BackupSnapshot, ChangeOrigin, DeviceId, Document, Envelope, OwnerId,
    SnapshotInfo, Timestamp,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const DAY_MS: u64 = 24 * 60 * 60 * 1_000;

fn tx(id: &str, amount: u32) -> Value {
    json!({ "id": id, "date": "2024-03-01", "amount": amount })
}

fn scheduler(
    store: Arc<ledger_storage::ReplicatedStore>,
    remote: &MemoryRemote,
    config: SyncConfig,
) -> Arc<BackupScheduler> {
    Arc::new(BackupScheduler::new(store, Arc::new(remote.clone()), config).unwrap())
}

// ── Snapshots ────────────────────────────────────────────────────

#[tokio::test]
async fn backup_without_documents_uploads_nothing() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let backups = scheduler(store, &remote, fast_config());

    assert_eq!(backups.backup_now(&owner()).await.unwrap(), None);
    assert_eq!(remote.upload_count(), 0);
}

#[tokio::test]
async fn snapshot_is_named_by_owner_and_time_and_encrypted() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let backups = scheduler(store.clone(), &remote, fast_config());

    store.save("transactions", json!([tx("t1", 50)]), &owner()).await.unwrap();
    let info = backups.backup_now(&owner()).await.unwrap().unwrap();

    assert_eq!(info.name, snapshot_name(&owner(), Timestamp::from_millis(T0)));
    assert_eq!(info.timestamp, Timestamp::from_millis(T0));
    let bytes = remote.download(&info.name).await.unwrap();
    let text = String::from_utf8_lossy(&bytes);
    assert!(!text.contains("amount"));
}

#[tokio::test]
async fn daily_cap_limits_uploads() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let config = SyncConfig {
        max_snapshots_per_day: 3,
        max_snapshots: 100,
        ..fast_config()
    };
    let backups = scheduler(store.clone(), &remote, config);
    store.save("transactions", json!([tx("t1", 50)]), &owner()).await.unwrap();

    let mut uploaded = 0;
    let mut refused = 0;
    for _ in 0..8 {
        clock.advance_millis(1_000);
        match backups.backup_now(&owner()).await {
            Ok(Some(_)) => uploaded += 1,
            Err(SyncError::QuotaExceeded { limit, .. }) => {
                assert_eq!(limit, 3);
                refused += 1;
            }
            other => panic!("unexpected backup result {other:?}"),
        }
    }
    assert_eq!((uploaded, refused), (3, 5));
    assert_eq!(remote.upload_count(), 3);

    // A new UTC day resets the allowance.
    clock.advance_millis(DAY_MS);
    assert!(backups.backup_now(&owner()).await.unwrap().is_some());
    assert_eq!(remote.upload_count(), 4);
}

#[tokio::test]
async fn daily_cap_is_per_owner() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let config = SyncConfig {
        max_snapshots_per_day: 1,
        ..fast_config()
    };
    let backups = scheduler(store.clone(), &remote, config);
    let bob = OwnerId::new("bob").unwrap();
    store.save("transactions", json!([tx("t1", 50)]), &owner()).await.unwrap();
    store.save("transactions", json!([tx("b1", 10)]), &bob).await.unwrap();

    assert!(backups.backup_now(&owner()).await.unwrap().is_some());
    assert!(backups.backup_now(&bob).await.unwrap().is_some());
    assert!(matches!(
        backups.backup_now(&owner()).await,
        Err(SyncError::QuotaExceeded { .. })
    ));
}

#[tokio::test]
async fn failed_upload_does_not_consume_the_allowance() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let config = SyncConfig {
        max_snapshots_per_day: 1,
        ..fast_config()
    };
    let backups = scheduler(store.clone(), &remote, config);
    store.save("transactions", json!([tx("t1", 50)]), &owner()).await.unwrap();

    remote.set_offline(true);
    assert!(matches!(
        backups.backup_now(&owner()).await,
        Err(SyncError::Network(_))
    ));
    remote.set_offline(false);
    assert!(backups.backup_now(&owner()).await.unwrap().is_some());
    assert_eq!(remote.upload_count(), 1);
}

#[tokio::test]
async fn empty_backup_does_not_consume_the_allowance() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let config = SyncConfig {
        max_snapshots_per_day: 1,
        ..fast_config()
    };
    let backups = scheduler(store.clone(), &remote, config);

    assert_eq!(backups.backup_now(&owner()).await.unwrap(), None);
    store.save("transactions", json!([tx("t1", 50)]), &owner()).await.unwrap();
    assert!(backups.backup_now(&owner()).await.unwrap().is_some());
}

/// Yields inside `upload` so a concurrent backup can interleave.
struct YieldingRemote {
    inner: MemoryRemote,
}

#[async_trait]
impl RemoteStore for YieldingRemote {
    fn provider_name(&self) -> &'static str {
        "yielding"
    }

    async fn probe(&self) -> SyncResult<()> {
        self.inner.probe().await
    }

    async fn list_snapshots(&self, owner: &OwnerId) -> SyncResult<Vec<SnapshotInfo>> {
        self.inner.list_snapshots(owner).await
    }

    async fn upload(&self, name: &str, content: &[u8]) -> SyncResult<()> {
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        self.inner.upload(name, content).await
    }

    async fn download(&self, name: &str) -> SyncResult<Vec<u8>> {
        self.inner.download(name).await
    }

    async fn delete(&self, name: &str) -> SyncResult<()> {
        self.inner.delete(name).await
    }

    async fn put_document(
        &self,
        owner: &OwnerId,
        key: &str,
        envelope: &Envelope,
    ) -> SyncResult<Timestamp> {
        self.inner.put_document(owner, key, envelope).await
    }

    async fn get_document(&self, owner: &OwnerId, key: &str) -> SyncResult<Option<Envelope>> {
        self.inner.get_document(owner, key).await
    }

    async fn ensure_owner(&self, owner: &OwnerId) -> SyncResult<()> {
        self.inner.ensure_owner(owner).await
    }
}

#[tokio::test]
async fn concurrent_backups_cannot_exceed_the_daily_cap() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let config = SyncConfig {
        max_snapshots_per_day: 1,
        ..fast_config()
    };
    let yielding = Arc::new(YieldingRemote {
        inner: remote.clone(),
    });
    let backups = BackupScheduler::new(store.clone(), yielding, config).unwrap();
    store.save("transactions", json!([tx("t1", 50)]), &owner()).await.unwrap();

    let alice = owner();
    let (first, second) = tokio::join!(backups.backup_now(&alice), backups.backup_now(&alice));

    let results = [first, second];
    let uploaded = results.iter().filter(|r| matches!(r, Ok(Some(_)))).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(SyncError::QuotaExceeded { .. })))
        .count();
    assert_eq!((uploaded, refused), (1, 1));
    assert_eq!(remote.upload_count(), 1);
}

#[tokio::test]
async fn upload_prunes_against_the_listing_taken_before_it() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let config = SyncConfig {
        max_snapshots: 2,
        ..fast_config()
    };
    let backups = scheduler(store.clone(), &remote, config);

    // Five older snapshots already on the remote, oldest first.
    let mut older = Vec::new();
    for i in (1..=5u64).rev() {
        let name = snapshot_name(&owner(), Timestamp::from_millis(T0 - i * 60_000));
        remote.upload(&name, b"{}").await.unwrap();
        older.push(name);
    }
    store.save("transactions", json!([tx("t1", 50)]), &owner()).await.unwrap();
    let info = backups.backup_now(&owner()).await.unwrap().unwrap();

    let names = |snapshots: Vec<SnapshotInfo>| -> Vec<String> {
        snapshots.into_iter().map(|s| s.name).collect()
    };
    let remaining = names(backups.list_backups(&owner()).await.unwrap());
    assert_eq!(
        remaining,
        vec![older[3].clone(), older[4].clone(), info.name.clone()]
    );

    // The next prune settles the count at the limit.
    assert_eq!(backups.prune(&owner()).await.unwrap(), 1);
    let remaining = names(backups.list_backups(&owner()).await.unwrap());
    assert_eq!(remaining, vec![older[4].clone(), info.name]);
}

#[tokio::test]
async fn upload_below_retention_prunes_nothing() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let config = SyncConfig {
        max_snapshots: 2,
        ..fast_config()
    };
    let backups = scheduler(store.clone(), &remote, config);
    store.save("transactions", json!([tx("t1", 50)]), &owner()).await.unwrap();

    for _ in 0..3 {
        clock.advance_millis(1_000);
        backups.backup_now(&owner()).await.unwrap().unwrap();
    }
    assert_eq!(backups.list_backups(&owner()).await.unwrap().len(), 3);
    assert_eq!(backups.prune(&owner()).await.unwrap(), 1);
    assert_eq!(backups.list_backups(&owner()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn owners_with_similar_ids_keep_separate_snapshots() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let config = SyncConfig {
        max_snapshots: 1,
        ..fast_config()
    };
    let backups = scheduler(store.clone(), &remote, config.clone());
    let dotted = OwnerId::new("jo.e@x.com").unwrap();
    let dashed = OwnerId::new("jo-e@x.com").unwrap();
    store.save("transactions", json!([tx("d1", 1)]), &dotted).await.unwrap();
    store.save("transactions", json!([tx("h1", 2)]), &dashed).await.unwrap();

    let dotted_info = backups.backup_now(&dotted).await.unwrap().unwrap();
    clock.advance_millis(1);
    let dashed_info = backups.backup_now(&dashed).await.unwrap().unwrap();
    assert_eq!(backups.prune(&dashed).await.unwrap(), 0);

    assert_ne!(dotted_info.name, dashed_info.name);
    assert_eq!(backups.list_backups(&dotted).await.unwrap(), vec![dotted_info]);
    assert_eq!(backups.list_backups(&dashed).await.unwrap(), vec![dashed_info]);

    let fresh = device(clock.clone(), shared_cipher()).await;
    let outcome = scheduler(fresh.clone(), &remote, config)
        .reconcile(&dotted)
        .await
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Seeded { keys: 1, .. }));
    assert_eq!(
        fresh.load("transactions", &dotted).await,
        Some(json!([tx("d1", 1)]))
    );
}

#[tokio::test]
async fn prune_leaves_other_owners_alone() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let config = SyncConfig {
        max_snapshots: 1,
        ..fast_config()
    };
    let backups = scheduler(store, &remote, config);
    let bob = OwnerId::new("bob").unwrap();
    for i in 0..3u64 {
        let ts = Timestamp::from_millis(T0 + i);
        remote.upload(&snapshot_name(&owner(), ts), b"{}").await.unwrap();
        remote.upload(&snapshot_name(&bob, ts), b"{}").await.unwrap();
    }

    assert_eq!(backups.prune(&owner()).await.unwrap(), 2);
    assert_eq!(backups.list_backups(&owner()).await.unwrap().len(), 1);
    assert_eq!(backups.list_backups(&bob).await.unwrap().len(), 3);
}

// ── Debounce ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn burst_of_mutations_produces_one_snapshot() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let backups = scheduler(store.clone(), &remote, fast_config());
    let handle = backups.spawn();

    for i in 0..5u32 {
        store
            .save("transactions", json!([tx(&format!("t{i}"), 10 + i)]), &owner())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    assert_eq!(remote.upload_count(), 0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(remote.upload_count(), 1);
    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn irrelevant_and_restore_writes_do_not_schedule_backups() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let backups = scheduler(store.clone(), &remote, fast_config());
    let handle = backups.spawn();

    store.save("preferences", json!({ "theme": "dark" }), &owner()).await.unwrap();
    store
        .save_at(
            "transactions",
            json!([tx("t1", 50)]),
            &owner(),
            Timestamp::from_millis(T0),
            ChangeOrigin::Restore,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(remote.upload_count(), 0);
    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn snapshot_from_one_device_seeds_a_fresh_device() {
    let clock = clock();
    let remote = memory_remote(clock.clone());

    let store_a = device(clock.clone(), shared_cipher()).await;
    let backups_a = scheduler(store_a.clone(), &remote, fast_config());
    let handle = backups_a.spawn();
    store_a.save("transactions", json!([tx("t1", 50)]), &owner()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(remote.upload_count(), 1);
    handle.abort();

    let store_b = device(clock.clone(), shared_cipher()).await;
    let backups_b = scheduler(store_b.clone(), &remote, fast_config());
    let outcome = backups_b.reconcile(&owner()).await.unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Seeded { keys: 1, .. }));
    assert_eq!(
        store_b.load("transactions", &owner()).await,
        Some(json!([tx("t1", 50)]))
    );
}

// ── Reconciliation ───────────────────────────────────────────────

#[tokio::test]
async fn reconcile_without_snapshots_does_nothing() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let backups = scheduler(store, &remote, fast_config());

    assert_eq!(
        backups.reconcile(&owner()).await.unwrap(),
        ReconcileOutcome::NoSnapshots
    );
}

#[tokio::test]
async fn reconcile_keeps_newer_local_state() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let backups = scheduler(store.clone(), &remote, fast_config());

    store.save("transactions", json!([tx("t1", 50)]), &owner()).await.unwrap();
    backups.backup_now(&owner()).await.unwrap();
    clock.advance_millis(1_000);
    store.save("transactions", json!([tx("t2", 70)]), &owner()).await.unwrap();

    assert_eq!(
        backups.reconcile(&owner()).await.unwrap(),
        ReconcileOutcome::UpToDate
    );
    assert_eq!(
        store.load("transactions", &owner()).await,
        Some(json!([tx("t2", 70)]))
    );
}

#[tokio::test]
async fn reconcile_replaces_older_local_state_keeping_snapshot_time() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let stale = device(clock.clone(), shared_cipher()).await;
    stale.save("transactions", json!([tx("t0", 5)]), &owner()).await.unwrap();

    clock.advance_millis(60_000);
    let fresh = device(clock.clone(), shared_cipher()).await;
    fresh.save("transactions", json!([tx("t1", 50)]), &owner()).await.unwrap();
    let info = scheduler(fresh, &remote, fast_config())
        .backup_now(&owner())
        .await
        .unwrap()
        .unwrap();

    clock.advance_millis(60_000);
    let backups = scheduler(stale.clone(), &remote, fast_config());
    let outcome = backups.reconcile(&owner()).await.unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Replaced {
            name: info.name,
            keys: 1
        }
    );
    let document = stale.load_document("transactions", &owner()).await.unwrap();
    assert_eq!(document.payload, json!([tx("t1", 50)]));
    assert_eq!(document.timestamp, info.timestamp);
    assert_eq!(
        backups.last_local_mutation(&owner()).await,
        Some(info.timestamp)
    );
}

#[tokio::test]
async fn reconcile_does_not_overwrite_a_newer_remote_document() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let stale = device_with_remote(clock.clone(), shared_cipher(), &remote).await;
    stale.save("transactions", json!([tx("t0", 5)]), &owner()).await.unwrap();

    clock.advance_millis(10);
    let backed_up = device(clock.clone(), shared_cipher()).await;
    backed_up.save("transactions", json!([tx("t1", 50)]), &owner()).await.unwrap();
    let info = scheduler(backed_up, &remote, fast_config())
        .backup_now(&owner())
        .await
        .unwrap()
        .unwrap();

    let newest = clock.advance_millis(20);
    let other = device_with_remote(clock.clone(), shared_cipher(), &remote).await;
    other
        .save("transactions", json!([tx("t1", 50), tx("t2", 70)]), &owner())
        .await
        .unwrap();
    let puts_before = remote.document_put_count();

    let backups = scheduler(stale.clone(), &remote, fast_config());
    let outcome = backups.reconcile(&owner()).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Replaced {
            name: info.name,
            keys: 1
        }
    );

    let local = stale.load_local_document("transactions", &owner()).await.unwrap();
    assert_eq!(local.payload, json!([tx("t1", 50)]));
    assert_eq!(local.timestamp, info.timestamp);
    assert_eq!(remote.document_put_count(), puts_before);
    let envelope = remote
        .get_document(&owner(), "transactions")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.timestamp, newest);

    let reader = device_with_remote(clock.clone(), shared_cipher(), &remote).await;
    assert_eq!(
        reader.load("transactions", &owner()).await,
        Some(json!([tx("t1", 50), tx("t2", 70)]))
    );
}

#[tokio::test]
async fn restore_publishes_to_the_remote_replica() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device_with_remote(clock.clone(), shared_cipher(), &remote).await;
    let backups = scheduler(store.clone(), &remote, fast_config());

    store.save("transactions", json!([tx("t1", 50)]), &owner()).await.unwrap();
    let info = backups.backup_now(&owner()).await.unwrap().unwrap();
    clock.advance_millis(1_000);
    store.save("transactions", json!([tx("t2", 70)]), &owner()).await.unwrap();
    let now = clock.advance_millis(1_000);

    backups.restore(&owner(), &info.name).await.unwrap();
    let envelope = remote
        .get_document(&owner(), "transactions")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.timestamp, now);
}

#[tokio::test]
async fn restore_stamps_documents_with_the_current_time() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let backups = scheduler(store.clone(), &remote, fast_config());

    store.save("transactions", json!([tx("t1", 50)]), &owner()).await.unwrap();
    let info = backups.backup_now(&owner()).await.unwrap().unwrap();
    clock.advance_millis(1_000);
    store.save("transactions", json!([tx("t2", 70)]), &owner()).await.unwrap();
    let now = clock.advance_millis(1_000);

    assert_eq!(backups.restore(&owner(), &info.name).await.unwrap(), 1);
    let document = store.load_document("transactions", &owner()).await.unwrap();
    assert_eq!(document.payload, json!([tx("t1", 50)]));
    assert_eq!(document.timestamp, now);
}

#[tokio::test]
async fn restore_of_missing_snapshot_is_not_found() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let backups = scheduler(store, &remote, fast_config());

    let name = snapshot_name(&owner(), Timestamp::from_millis(T0));
    assert!(matches!(
        backups.restore(&owner(), &name).await,
        Err(SyncError::NotFound(_))
    ));
}

#[tokio::test]
async fn restore_rejects_another_owners_snapshot() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let store = device(clock.clone(), shared_cipher()).await;
    let backups = scheduler(store.clone(), &remote, fast_config());

    let bob = OwnerId::new("bob").unwrap();
    let ts = Timestamp::from_millis(T0);
    let mut documents = BTreeMap::new();
    documents.insert(
        "transactions".to_string(),
        Document::new("transactions", bob.clone(), json!([tx("b1", 1)]), ts, DeviceId::new()),
    );
    let snapshot = BackupSnapshot::new(bob, ts, DeviceId::new(), documents);
    let sealed = seal_json(shared_cipher().as_ref(), &snapshot).unwrap();
    let envelope = Envelope {
        data: sealed.data,
        iv: sealed.iv,
        timestamp: ts,
        device_id: snapshot.device_id,
        version: snapshot.version.clone(),
    };
    let name = snapshot_name(&owner(), ts);
    remote.upload(&name, &envelope.to_bytes().unwrap()).await.unwrap();

    assert!(matches!(
        backups.restore(&owner(), &name).await,
        Err(SyncError::Validation(_))
    ));
    assert_eq!(store.load("transactions", &owner()).await, None);
}

#[tokio::test]
async fn snapshot_sealed_with_another_key_fails_to_open() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let writer = device(clock.clone(), common::foreign_cipher()).await;
    writer.save("transactions", json!([tx("t1", 50)]), &owner()).await.unwrap();
    let info = scheduler(writer, &remote, fast_config())
        .backup_now(&owner())
        .await
        .unwrap()
        .unwrap();

    let store = device(clock.clone(), shared_cipher()).await;
    let backups = scheduler(store.clone(), &remote, fast_config());
    assert!(matches!(
        backups.restore(&owner(), &info.name).await,
        Err(SyncError::Decryption(_))
    ));
}
