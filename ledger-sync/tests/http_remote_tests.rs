use ledger_sync::cloud::{HttpRemote, HttpRemoteConfig, RemoteStore};
use ledger_sync::SyncError;
use ledger_types::{snapshot_name, DeviceId, Envelope, OwnerId, Timestamp};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_bytes, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn owner() -> OwnerId {
    OwnerId::new("alice").unwrap()
}

async fn remote(server: &MockServer) -> HttpRemote {
    let remote = HttpRemote::new(HttpRemoteConfig {
        base_url: format!("{}/", server.uri()),
        timeout_secs: 5,
    })
    .unwrap();
    remote.set_token(Some("secret-token".to_string())).await;
    remote
}

fn envelope() -> Envelope {
    Envelope {
        data: "ZGF0YQ==".to_string(),
        iv: "aXY=".to_string(),
        timestamp: Timestamp::from_millis(1_000),
        device_id: DeviceId::new(),
        version: "1".to_string(),
    }
}

// ── Probe ────────────────────────────────────────────────────────

#[tokio::test]
async fn probe_hits_health_without_a_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let remote = HttpRemote::new(HttpRemoteConfig {
        base_url: server.uri(),
        timeout_secs: 5,
    })
    .unwrap();
    remote.probe().await.unwrap();
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let remote = HttpRemote::new(HttpRemoteConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        timeout_secs: 2,
    })
    .unwrap();
    assert!(matches!(remote.probe().await, Err(SyncError::Network(_))));
}

// ── Snapshots ────────────────────────────────────────────────────

#[tokio::test]
async fn list_filters_and_sorts_snapshots() {
    let server = MockServer::start().await;
    let older = snapshot_name(&owner(), Timestamp::from_millis(1_709_294_400_000));
    let newer = snapshot_name(&owner(), Timestamp::from_millis(1_709_294_500_000));
    Mock::given(method("GET"))
        .and(path("/snapshots"))
        .and(query_param("prefix", "backup_alice_"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "name": newer },
            { "name": "backup_alice_not-a-snapshot.json" },
            { "name": older },
            { "name": "backup_bob_2024-03-01_1709294400000.json" },
        ])))
        .mount(&server)
        .await;

    let listed: Vec<String> = remote(&server)
        .await
        .list_snapshots(&owner())
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(listed, vec![older, newer]);
}

#[tokio::test]
async fn upload_sends_raw_bytes() {
    let server = MockServer::start().await;
    let name = snapshot_name(&owner(), Timestamp::from_millis(1_709_294_400_000));
    Mock::given(method("PUT"))
        .and(path(format!("/snapshots/{name}")))
        .and(body_bytes(b"sealed".to_vec()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    remote(&server).await.upload(&name, b"sealed").await.unwrap();
}

#[tokio::test]
async fn download_maps_404_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/snapshots/backup_alice_2024-03-01_1.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = remote(&server)
        .await
        .download("backup_alice_2024-03-01_1.json")
        .await;
    assert!(matches!(result, Err(SyncError::NotFound(_))));
}

#[tokio::test]
async fn delete_tolerates_missing_objects() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    remote(&server)
        .await
        .delete("backup_alice_2024-03-01_1.json")
        .await
        .unwrap();
}

// ── Documents ────────────────────────────────────────────────────

#[tokio::test]
async fn put_document_returns_server_write_time() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/owners/alice/documents/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "writtenAt": 42 })))
        .mount(&server)
        .await;

    let written = remote(&server)
        .await
        .put_document(&owner(), "transactions", &envelope())
        .await
        .unwrap();
    assert_eq!(written, Timestamp::from_millis(42));
}

#[tokio::test]
async fn forbidden_put_is_a_permission_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/owners/alice/documents/transactions"))
        .respond_with(ResponseTemplate::new(403).set_body_string("no owner"))
        .mount(&server)
        .await;

    let result = remote(&server)
        .await
        .put_document(&owner(), "transactions", &envelope())
        .await;
    assert!(matches!(result, Err(SyncError::Permission(_))));
}

#[tokio::test]
async fn get_document_decodes_envelope_and_maps_404_to_none() {
    let server = MockServer::start().await;
    let stored = envelope();
    Mock::given(method("GET"))
        .and(path("/owners/alice/documents/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&stored))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/owners/alice/documents/categories"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let remote = remote(&server).await;
    assert_eq!(
        remote.get_document(&owner(), "transactions").await.unwrap(),
        Some(stored)
    );
    assert_eq!(remote.get_document(&owner(), "categories").await.unwrap(), None);
}

#[tokio::test]
async fn ensure_owner_accepts_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/owners/alice"))
        .respond_with(ResponseTemplate::new(409))
        .expect(1)
        .mount(&server)
        .await;

    remote(&server).await.ensure_owner(&owner()).await.unwrap();
}

#[tokio::test]
async fn validation_rejections_are_reported() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(422).set_body_string("bad envelope"))
        .mount(&server)
        .await;

    let result = remote(&server)
        .await
        .put_document(&owner(), "transactions", &envelope())
        .await;
    assert!(matches!(result, Err(SyncError::Validation(_))));
}

// ── Auth ─────────────────────────────────────────────────────────

#[tokio::test]
async fn requests_without_token_fail_before_sending() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let remote = HttpRemote::new(HttpRemoteConfig {
        base_url: server.uri(),
        timeout_secs: 5,
    })
    .unwrap();
    let result = remote.list_snapshots(&owner()).await;
    assert!(matches!(result, Err(SyncError::NotAuthenticated)));
}
