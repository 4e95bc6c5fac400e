mod common;

use common::{clock, memory_remote, owner, shared_cipher};
use ledger_storage::{Backend, BackendKind, ReplicatedStore, SessionBackend};
use ledger_sync::cloud::{MemoryRemote, RemoteBackend, RemoteStore};
use ledger_types::DeviceId;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn backend(remote: &MemoryRemote) -> Arc<RemoteBackend> {
    Arc::new(RemoteBackend::new(
        Arc::new(remote.clone()),
        Duration::from_millis(100),
    ))
}

#[tokio::test]
async fn remote_backend_is_a_durable_remote_replica() {
    let clock = clock();
    let backend = backend(&memory_remote(clock));
    assert_eq!(backend.kind(), BackendKind::Remote);
    assert!(backend.durable());
    assert!(backend.probe().await);
}

#[tokio::test]
async fn saves_fan_out_to_the_remote_document_store() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    remote.ensure_owner(&owner()).await.unwrap();
    let backends: Vec<Arc<dyn Backend>> = vec![Arc::new(SessionBackend::new()), backend(&remote)];
    let store = ReplicatedStore::open(backends, shared_cipher(), DeviceId::new(), clock)
        .await
        .unwrap();

    store
        .save("transactions", json!([{ "id": "t1", "amount": 5 }]), &owner())
        .await
        .unwrap();

    assert_eq!(remote.document_put_count(), 1);
    let envelope = remote
        .get_document(&owner(), "transactions")
        .await
        .unwrap()
        .unwrap();
    let document = store.open_envelope(&envelope, "transactions", &owner()).unwrap();
    assert_eq!(document.payload, json!([{ "id": "t1", "amount": 5 }]));
}

#[tokio::test]
async fn colons_route_to_the_owner_never_to_the_key() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    let backends: Vec<Arc<dyn Backend>> = vec![Arc::new(SessionBackend::new()), backend(&remote)];
    let store = ReplicatedStore::open(backends, shared_cipher(), DeviceId::new(), clock)
        .await
        .unwrap();

    let team = ledger_types::OwnerId::new("team:alice").unwrap();
    store.save("transactions", json!(["team"]), &team).await.unwrap();
    assert!(remote.get_document(&team, "transactions").await.unwrap().is_some());

    assert!(store.save("a:b", json!(["x"]), &owner()).await.is_err());
    let misrouted = ledger_types::OwnerId::new("alice:a").unwrap();
    assert!(remote.get_document(&misrouted, "b").await.unwrap().is_none());
    assert_eq!(remote.document_put_count(), 1);
}

#[tokio::test]
async fn offline_remote_is_excluded_and_local_save_still_succeeds() {
    let clock = clock();
    let remote = memory_remote(clock.clone());
    remote.set_offline(true);
    let backends: Vec<Arc<dyn Backend>> = vec![Arc::new(SessionBackend::new()), backend(&remote)];
    let store = ReplicatedStore::open(backends, shared_cipher(), DeviceId::new(), clock)
        .await
        .unwrap();

    store.save("transactions", json!([]), &owner()).await.unwrap();
    assert_eq!(remote.document_put_count(), 0);
    assert_eq!(store.load("transactions", &owner()).await, Some(json!([])));
}

#[tokio::test]
async fn refused_remote_write_is_a_failed_put() {
    let clock = clock();
    let remote = memory_remote(clock);
    remote.set_require_owner(true);
    let backend = backend(&remote);

    let store_key = owner().scoped("transactions");
    let envelope = ledger_types::Envelope {
        data: "ZGF0YQ==".into(),
        iv: "aXY=".into(),
        timestamp: ledger_types::Timestamp::from_millis(1),
        device_id: DeviceId::new(),
        version: "1".into(),
    };
    assert!(!backend.put(&store_key, &envelope).await.is_stored());
    assert!(!backend.put("no-separator", &envelope).await.is_stored());
    assert_eq!(backend.get(&store_key).await, None);
}
