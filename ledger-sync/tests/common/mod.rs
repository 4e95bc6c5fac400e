//! Shared test helpers for sync and backup tests.

#![allow(dead_code)]

use ledger_crypto::{CipherService, PayloadCipher, SymmetricKey};
use ledger_storage::{Backend, ReplicatedStore, SessionBackend};
use ledger_sync::cloud::{MemoryRemote, RemoteBackend};
use ledger_sync::SyncConfig;
use ledger_types::{DeviceId, ManualClock, OwnerId, Timestamp};
use std::sync::Arc;
use std::time::Duration;

/// 2024-03-01T12:00:00Z.
pub const T0: u64 = 1_709_294_400_000;

pub fn owner() -> OwnerId {
    OwnerId::new("alice").unwrap()
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Timestamp::from_millis(T0)))
}

/// The installation key shared by every device of the test owner.
pub fn shared_cipher() -> Arc<dyn PayloadCipher> {
    Arc::new(CipherService::from_key(SymmetricKey::from_bytes([7u8; 32])))
}

pub fn foreign_cipher() -> Arc<dyn PayloadCipher> {
    Arc::new(CipherService::from_key(SymmetricKey::from_bytes([9u8; 32])))
}

/// A device with a single in-memory backend.
pub async fn device(clock: Arc<ManualClock>, cipher: Arc<dyn PayloadCipher>) -> Arc<ReplicatedStore> {
    let backends: Vec<Arc<dyn Backend>> = vec![Arc::new(SessionBackend::new())];
    Arc::new(
        ReplicatedStore::open(backends, cipher, DeviceId::new(), clock)
            .await
            .unwrap(),
    )
}

/// A device that also replicates every write to `remote` as a backend.
pub async fn device_with_remote(
    clock: Arc<ManualClock>,
    cipher: Arc<dyn PayloadCipher>,
    remote: &MemoryRemote,
) -> Arc<ReplicatedStore> {
    let backends: Vec<Arc<dyn Backend>> = vec![
        Arc::new(SessionBackend::new()),
        Arc::new(RemoteBackend::new(
            Arc::new(remote.clone()),
            Duration::from_millis(100),
        )),
    ];
    Arc::new(
        ReplicatedStore::open(backends, cipher, DeviceId::new(), clock)
            .await
            .unwrap(),
    )
}

/// Short timings so paused-clock tests stay readable.
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        settle_delay_ms: 10,
        probe_timeout_ms: 100,
        backoff_base_ms: 10,
        backoff_cap_ms: 100,
        max_retry_attempts: 2,
        ..SyncConfig::default()
    }
}

pub fn memory_remote(clock: Arc<ManualClock>) -> MemoryRemote {
    MemoryRemote::with_clock(clock)
}
