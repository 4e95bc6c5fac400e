//! The replicated document store.
//!
//! Writes fan out to every available backend concurrently; reads fan in from
//! every available backend and keep the freshest document that decrypts.

use crate::backend::{Backend, BackendDescriptor, BackendKind, PutOutcome};
use crate::error::{StorageError, StorageResult};
use futures::future::join_all;
use ledger_crypto::{open_json, seal_json, PayloadCipher, Sealed};
use ledger_types::{ChangeOrigin, Clock, DeviceId, Document, Envelope, OwnerId, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the change event channel. Slow subscribers observe `Lagged`.
const EVENT_CAPACITY: usize = 256;

/// Emitted after every successful save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub owner_id: OwnerId,
    pub key: String,
    pub timestamp: Timestamp,
    pub origin: ChangeOrigin,
}

/// Collection keys are the last segment of an `owner:key` storage key, so
/// they must be non-blank and free of `:`.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.trim().is_empty() || key.contains(':') {
        return Err(StorageError::InvalidData(format!(
            "invalid collection key {key:?}"
        )));
    }
    Ok(())
}

struct Slot {
    backend: Arc<dyn Backend>,
    available: AtomicBool,
}

impl Slot {
    fn descriptor(&self) -> BackendDescriptor {
        BackendDescriptor {
            kind: self.backend.kind(),
            durable: self.backend.durable(),
            available: self.available.load(Ordering::Acquire),
        }
    }
}

/// Single `save`/`load` contract over heterogeneous backends.
pub struct ReplicatedStore {
    slots: Vec<Slot>,
    cipher: Arc<dyn PayloadCipher>,
    device_id: DeviceId,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<ChangeEvent>,
}

impl ReplicatedStore {
    /// Creates the store and probes every backend once.
    ///
    /// Fails only when no backend is configured.
    pub async fn open(
        backends: Vec<Arc<dyn Backend>>,
        cipher: Arc<dyn PayloadCipher>,
        device_id: DeviceId,
        clock: Arc<dyn Clock>,
    ) -> StorageResult<Self> {
        if backends.is_empty() {
            return Err(StorageError::BackendUnavailable(
                "no backend configured".to_string(),
            ));
        }
        let slots = backends
            .into_iter()
            .map(|backend| Slot {
                backend,
                available: AtomicBool::new(false),
            })
            .collect();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let store = Self {
            slots,
            cipher,
            device_id,
            clock,
            events,
        };
        store.refresh_availability().await;
        Ok(store)
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// The cipher envelopes are sealed with.
    pub fn cipher(&self) -> Arc<dyn PayloadCipher> {
        Arc::clone(&self.cipher)
    }

    /// Descriptors of all configured backends as of the last probe.
    pub fn backends(&self) -> Vec<BackendDescriptor> {
        self.slots.iter().map(Slot::descriptor).collect()
    }

    /// Receives a [`ChangeEvent`] for every successful save from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Probes every backend concurrently and caches the results.
    pub async fn refresh_availability(&self) -> Vec<BackendDescriptor> {
        let probes = join_all(self.slots.iter().map(|slot| slot.backend.probe())).await;
        for (slot, available) in self.slots.iter().zip(probes) {
            let was = slot.available.swap(available, Ordering::AcqRel);
            if was != available {
                info!(
                    "Backend {} is now {}",
                    slot.backend.kind(),
                    if available { "available" } else { "unavailable" }
                );
            }
        }
        self.backends()
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Saves `payload` under `key` for `owner`, stamped with the current time.
    pub async fn save(
        &self,
        key: &str,
        payload: serde_json::Value,
        owner: &OwnerId,
    ) -> StorageResult<Document> {
        self.save_at(key, payload, owner, self.clock.now(), ChangeOrigin::Local)
            .await
    }

    /// Saves with an explicit timestamp and origin.
    ///
    /// Succeeds when at least one available backend stored the envelope.
    pub async fn save_at(
        &self,
        key: &str,
        payload: serde_json::Value,
        owner: &OwnerId,
        timestamp: Timestamp,
        origin: ChangeOrigin,
    ) -> StorageResult<Document> {
        self.write(key, payload, owner, timestamp, origin, true).await
    }

    /// As [`save_at`](Self::save_at), writing to local backends only.
    ///
    /// Used where the remote copy must not be touched: catching up from a
    /// snapshot, and sync write-back (the engine pushes to the remote itself).
    pub async fn save_local_at(
        &self,
        key: &str,
        payload: serde_json::Value,
        owner: &OwnerId,
        timestamp: Timestamp,
        origin: ChangeOrigin,
    ) -> StorageResult<Document> {
        self.write(key, payload, owner, timestamp, origin, false).await
    }

    async fn write(
        &self,
        key: &str,
        payload: serde_json::Value,
        owner: &OwnerId,
        timestamp: Timestamp,
        origin: ChangeOrigin,
        include_remote: bool,
    ) -> StorageResult<Document> {
        validate_key(key)?;
        let document = Document::new(key, owner.clone(), payload, timestamp, self.device_id);
        let envelope = self.seal(&document)?;
        let scoped = document.scoped_key();

        let targets: Vec<&Slot> = self.available_slots(include_remote).collect();
        let outcomes = join_all(
            targets
                .iter()
                .map(|slot| slot.backend.put(&scoped, &envelope)),
        )
        .await;

        let mut stored = 0usize;
        let mut reasons = Vec::new();
        for (slot, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                PutOutcome::Stored => stored += 1,
                PutOutcome::Failed(reason) => {
                    warn!("Backend {} rejected {}: {}", slot.backend.kind(), scoped, reason);
                    reasons.push(format!("{}: {reason}", slot.backend.kind()));
                }
            }
        }

        if stored == 0 {
            if targets.is_empty() {
                reasons.push("no backend available".to_string());
            }
            return Err(StorageError::NoBackendAccepted {
                key: scoped,
                reasons,
            });
        }
        if !reasons.is_empty() {
            warn!(
                "Partial write of {}: {} of {} backends stored it",
                scoped,
                stored,
                targets.len()
            );
        } else {
            debug!("Saved {} to {} backends", scoped, stored);
        }

        // No subscribers is not an error.
        let _ = self.events.send(ChangeEvent {
            owner_id: owner.clone(),
            key: key.to_string(),
            timestamp,
            origin,
        });
        Ok(document)
    }

    // ── Reads ────────────────────────────────────────────────────

    /// The freshest readable payload of `key`, or `None`.
    pub async fn load(&self, key: &str, owner: &OwnerId) -> Option<serde_json::Value> {
        self.load_document(key, owner).await.map(|d| d.payload)
    }

    /// The freshest readable document of `key` across all backends.
    pub async fn load_document(&self, key: &str, owner: &OwnerId) -> Option<Document> {
        self.read(key, owner, true).await
    }

    /// As [`load_document`](Self::load_document), ignoring remote backends.
    pub async fn load_local_document(&self, key: &str, owner: &OwnerId) -> Option<Document> {
        self.read(key, owner, false).await
    }

    async fn read(&self, key: &str, owner: &OwnerId, include_remote: bool) -> Option<Document> {
        validate_key(key).ok()?;
        let scoped = owner.scoped(key);
        let sources: Vec<&Slot> = self.available_slots(include_remote).collect();
        let envelopes = join_all(sources.iter().map(|slot| slot.backend.get(&scoped))).await;

        sources
            .iter()
            .zip(envelopes)
            .filter_map(|(slot, envelope)| {
                let kind = slot.backend.kind();
                let document = self.unseal(&envelope?, key, owner, kind)?;
                Some((kind, document))
            })
            .max_by(|(ka, a), (kb, b)| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then(ka.priority().cmp(&kb.priority()))
                    .then(a.device_id.cmp(&b.device_id))
            })
            .map(|(kind, document)| {
                debug!("Read {} from {} at {}", scoped, kind, document.timestamp);
                document
            })
    }

    fn available_slots(&self, include_remote: bool) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(move |slot| {
            slot.available.load(Ordering::Acquire)
                && (include_remote || slot.backend.kind().is_local())
        })
    }

    // ── Envelopes ────────────────────────────────────────────────

    /// Encrypts a document into its at-rest envelope.
    pub fn seal(&self, document: &Document) -> StorageResult<Envelope> {
        let Sealed { data, iv } = seal_json(self.cipher.as_ref(), document)?;
        Ok(Envelope {
            data,
            iv,
            timestamp: document.timestamp,
            device_id: document.device_id,
            version: document.version.clone(),
        })
    }

    /// Decrypts an envelope read for `key`. Anything that does not decrypt
    /// to a document of this owner and key is treated as absent.
    pub fn open_envelope(
        &self,
        envelope: &Envelope,
        key: &str,
        owner: &OwnerId,
    ) -> Option<Document> {
        self.unseal(envelope, key, owner, BackendKind::Remote)
    }

    fn unseal(
        &self,
        envelope: &Envelope,
        key: &str,
        owner: &OwnerId,
        source: BackendKind,
    ) -> Option<Document> {
        let sealed = Sealed {
            data: envelope.data.clone(),
            iv: envelope.iv.clone(),
        };
        let document: Document = match open_json(self.cipher.as_ref(), &sealed) {
            Ok(document) => document,
            Err(e) => {
                warn!("Treating undecryptable {} envelope for {} as absent: {}", source, key, e);
                return None;
            }
        };
        if document.key != key || &document.owner_id != owner {
            warn!(
                "Ignoring {} envelope for {}: it holds {} of another owner or key",
                source, key, document.key
            );
            return None;
        }
        Some(document)
    }
}
