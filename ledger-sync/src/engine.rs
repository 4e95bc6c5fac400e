//! Sync engine: connectivity and auth aware push/pull cycles.
//!
//! A cycle walks every relevant collection of the signed-in owner:
//! pull the remote document, merge it with the local one, write the merge
//! back through the replicated store and push it. At most one cycle runs at
//! a time; triggers that arrive meanwhile coalesce into a single re-run.

use crate::cloud::RemoteStore;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::merge::{merge_documents, ConflictResolution};
use crate::state::{SyncEvent, SyncState, SyncStateMachine, SyncStatus};
use crate::timing::jitter;
use ledger_model::{validate_payload, CollectionSchema, Schemas};
use ledger_storage::ReplicatedStore;
use ledger_types::{ChangeOrigin, Document, Envelope, OwnerId, Timestamp};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What asked for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Manual,
    Timer,
    Reconnected,
    /// A re-run queued by triggers that arrived mid-cycle.
    Coalesced,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Manual => "manual",
            Self::Timer => "timer",
            Self::Reconnected => "reconnected",
            Self::Coalesced => "coalesced",
        };
        f.write_str(name)
    }
}

/// Counters of one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    /// Collections with a readable remote document.
    pub pulled: usize,
    /// Collections present on both sides and merged.
    pub merged: usize,
    /// Collections whose merge was written back locally.
    pub written_back: usize,
    /// Collections uploaded to the remote.
    pub pushed: usize,
    /// Records dropped by validation on either side.
    pub dropped_records: usize,
    /// Remote documents that did not decrypt.
    pub undecryptable: usize,
}

/// Result of a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// This call ran the cycle; the report of the last run.
    Completed(CycleReport),
    /// A cycle was already running; a re-run is queued behind it.
    Coalesced,
    /// Nothing ran in the given status.
    Skipped(SyncStatus),
}

/// Bidirectional sync between the replicated store and a remote.
pub struct SyncEngine {
    store: Arc<ReplicatedStore>,
    remote: Arc<dyn RemoteStore>,
    schemas: Schemas,
    config: SyncConfig,
    machine: SyncStateMachine,
    owner: RwLock<Option<OwnerId>>,
    /// Held for the duration of a cycle, including its retries.
    cycle: Mutex<()>,
    rerun: AtomicBool,
}

impl SyncEngine {
    /// Creates a disabled engine. Fails only on invalid configuration.
    pub fn new(
        store: Arc<ReplicatedStore>,
        remote: Arc<dyn RemoteStore>,
        schemas: Schemas,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            remote,
            schemas,
            machine: SyncStateMachine::new(config.conflict_resolution),
            config,
            owner: RwLock::new(None),
            cycle: Mutex::new(()),
            rerun: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        self.machine.current()
    }

    /// Observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.machine.subscribe()
    }

    pub async fn owner(&self) -> Option<OwnerId> {
        self.owner.read().await.clone()
    }

    pub fn set_conflict_resolution(&self, strategy: ConflictResolution) {
        self.machine.set_conflict_resolution(strategy);
    }

    // ── Auth and connectivity signals ────────────────────────────

    /// The auth provider established a session for `owner`.
    pub async fn authenticate(&self, owner: OwnerId) {
        let mut current = self.owner.write().await;
        if current.as_ref().is_some_and(|o| o != &owner) {
            self.machine.apply(SyncEvent::SignedOut);
        }
        info!("Sync enabled for {}", owner);
        *current = Some(owner);
        self.machine.apply(SyncEvent::Authenticated);
    }

    /// The session ended. Local data stays usable.
    pub async fn sign_out(&self) {
        *self.owner.write().await = None;
        self.machine.apply(SyncEvent::SignedOut);
        info!("Sync disabled");
    }

    /// Explicit connectivity signal.
    ///
    /// Going online from `offline` waits the settle delay, returns to `idle`
    /// and runs a reconnect cycle.
    pub async fn set_online(&self, online: bool) -> SyncResult<TriggerOutcome> {
        if !online {
            self.machine.apply(SyncEvent::ConnectionLost);
            info!("Connectivity lost, sync paused");
            return Ok(TriggerOutcome::Skipped(self.machine.status()));
        }

        self.machine.apply(SyncEvent::ConnectionRestored);
        match self.machine.status() {
            SyncStatus::Offline => {}
            // A parked engine resumes on any connectivity event.
            SyncStatus::Error => return self.trigger(TriggerReason::Reconnected).await,
            status => return Ok(TriggerOutcome::Skipped(status)),
        }

        tokio::time::sleep(self.config.settle_delay()).await;
        if !self.machine.apply(SyncEvent::Settled) {
            return Ok(TriggerOutcome::Skipped(self.machine.status()));
        }
        info!("Connectivity restored");
        self.trigger(TriggerReason::Reconnected).await
    }

    /// Probes the remote with the configured timeout. A failed or slow probe
    /// moves the engine offline.
    pub async fn check_connectivity(&self) -> bool {
        let reachable = matches!(
            tokio::time::timeout(self.config.probe_timeout(), self.remote.probe()).await,
            Ok(Ok(()))
        );
        if !reachable && self.machine.status() != SyncStatus::Offline {
            warn!("Remote {} unreachable", self.remote.provider_name());
            self.machine.apply(SyncEvent::ConnectionLost);
        }
        reachable
    }

    // ── Cycles ───────────────────────────────────────────────────

    /// Runs a cycle now, or queues one behind the cycle in flight.
    pub async fn trigger(&self, reason: TriggerReason) -> SyncResult<TriggerOutcome> {
        let mut reason = reason;
        let mut last: Option<SyncResult<TriggerOutcome>> = None;
        loop {
            let Ok(guard) = self.cycle.try_lock() else {
                self.rerun.store(true, Ordering::SeqCst);
                debug!("Sync in flight, queued {} trigger", reason);
                return last.unwrap_or(Ok(TriggerOutcome::Coalesced));
            };
            self.rerun.store(false, Ordering::SeqCst);
            last = Some(self.run_with_retries(reason).await);
            drop(guard);

            if !self.rerun.swap(false, Ordering::SeqCst) {
                return last.unwrap_or(Ok(TriggerOutcome::Coalesced));
            }
            reason = TriggerReason::Coalesced;
        }
    }

    /// One periodic tick: refresh backend availability, check the remote and
    /// run a cycle when idle.
    pub async fn tick(&self) -> SyncResult<TriggerOutcome> {
        self.store.refresh_availability().await;
        match self.machine.status() {
            SyncStatus::Offline => {
                if self.check_connectivity().await {
                    self.set_online(true).await
                } else {
                    Ok(TriggerOutcome::Skipped(SyncStatus::Offline))
                }
            }
            SyncStatus::Idle => {
                if self.check_connectivity().await {
                    self.trigger(TriggerReason::Timer).await
                } else {
                    Ok(TriggerOutcome::Skipped(SyncStatus::Offline))
                }
            }
            status => Ok(TriggerOutcome::Skipped(status)),
        }
    }

    /// Runs [`tick`](Self::tick) every sync interval plus jitter until the
    /// handle is aborted.
    pub fn spawn_periodic(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let delay = engine.config.sync_interval() + jitter(engine.config.interval_jitter());
                tokio::time::sleep(delay).await;
                match engine.tick().await {
                    Ok(TriggerOutcome::Completed(report)) => {
                        debug!("Periodic sync completed: {:?}", report)
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Periodic sync failed: {}", e),
                }
            }
        })
    }

    async fn run_with_retries(&self, reason: TriggerReason) -> SyncResult<TriggerOutcome> {
        let Some(owner) = self.owner().await else {
            return Ok(TriggerOutcome::Skipped(self.machine.status()));
        };
        let mut backoff = self.config.backoff();

        loop {
            if !self.machine.apply(SyncEvent::CycleStarted) {
                return Ok(TriggerOutcome::Skipped(self.machine.status()));
            }
            debug!("Starting {} sync cycle for {}", reason, owner);

            let error = match self.run_cycle(&owner).await {
                Ok(report) => {
                    self.machine.apply(SyncEvent::CycleSucceeded {
                        at: self.store.now(),
                    });
                    info!(
                        "Sync cycle complete: pulled {}, merged {}, pushed {}, dropped {}",
                        report.pulled, report.merged, report.pushed, report.dropped_records
                    );
                    return Ok(TriggerOutcome::Completed(report));
                }
                Err(e) => e,
            };

            warn!("Sync cycle failed: {}", error);
            self.machine.apply(SyncEvent::CycleFailed {
                error: error.to_string(),
            });

            if matches!(error, SyncError::NotAuthenticated) {
                return Err(error);
            }
            if error.is_connectivity() && !self.check_connectivity().await {
                return Err(error);
            }
            match backoff.next_delay() {
                Some(delay) => {
                    debug!(
                        "Retrying sync in {:?} (attempt {}/{})",
                        delay,
                        backoff.attempts(),
                        self.config.max_retry_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        "Sync failed {} times, parking until the next trigger",
                        backoff.attempts() + 1
                    );
                    return Err(error);
                }
            }
        }
    }

    /// One pull, merge, write-back, push pass over every relevant collection.
    pub async fn run_cycle(&self, owner: &OwnerId) -> SyncResult<CycleReport> {
        let strategy = self.machine.current().conflict_resolution;
        let mut report = CycleReport::default();
        for key in &self.config.relevant_keys {
            self.sync_collection(owner, key, strategy, &mut report)
                .await?;
        }
        Ok(report)
    }

    async fn sync_collection(
        &self,
        owner: &OwnerId,
        key: &str,
        strategy: ConflictResolution,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        let schema = self.schemas.get(key);

        // Pull
        let remote = match self.remote.get_document(owner, key).await? {
            Some(envelope) => {
                let opened = self.store.open_envelope(&envelope, key, owner);
                if opened.is_none() {
                    report.undecryptable += 1;
                }
                opened
            }
            None => None,
        };
        let local = self.store.load_local_document(key, owner).await;

        let remote_raw = remote.as_ref().map(|d| d.payload.clone());
        let local_raw = local.as_ref().map(|d| d.payload.clone());
        let remote = remote.and_then(|d| validated(schema, d, &mut report.dropped_records));
        let local = local.and_then(|d| validated(schema, d, &mut report.dropped_records));
        if remote.is_some() {
            report.pulled += 1;
        }

        // Merge
        let (merged, adopt_time) = match (&local, &remote) {
            (None, None) => return Ok(()),
            (Some(l), None) => (l.payload.clone(), l.timestamp),
            (None, Some(r)) => (r.payload.clone(), r.timestamp),
            (Some(l), Some(r)) => {
                report.merged += 1;
                let merged = merge_documents(strategy, schema, l, r);
                let time = if merged == r.payload {
                    r.timestamp
                } else if merged == l.payload {
                    l.timestamp
                } else {
                    self.store.now()
                };
                (merged, time)
            }
        };

        // Write back
        let pushed_doc = if local_raw.as_ref() != Some(&merged) {
            let written = self
                .store
                .save_local_at(key, merged.clone(), owner, adopt_time, ChangeOrigin::Sync)
                .await?;
            report.written_back += 1;
            debug!("Wrote merged {} back locally", key);
            written
        } else {
            match local {
                Some(doc) => doc,
                None => return Ok(()),
            }
        };

        // Push
        if remote_raw.as_ref() != Some(&merged) {
            let envelope = self.store.seal(&pushed_doc)?;
            let written_at = self.push(owner, key, &envelope).await?;
            report.pushed += 1;
            debug!("Pushed {} (remote write time {})", key, written_at);
        }
        Ok(())
    }

    /// Upserts the document, creating the owner record once if the remote
    /// refuses the write for lack of it.
    async fn push(&self, owner: &OwnerId, key: &str, envelope: &Envelope) -> SyncResult<Timestamp> {
        match self.remote.put_document(owner, key, envelope).await {
            Err(SyncError::Permission(reason)) => {
                warn!(
                    "Remote refused {} for {} ({}), creating owner record",
                    key, owner, reason
                );
                self.remote.ensure_owner(owner).await?;
                self.remote.put_document(owner, key, envelope).await
            }
            other => other,
        }
    }
}

/// Drops invalid records of a known collection. A payload of the wrong
/// shape makes the whole document absent.
fn validated(
    schema: Option<&CollectionSchema>,
    document: Document,
    dropped: &mut usize,
) -> Option<Document> {
    let Some(schema) = schema else {
        return Some(document);
    };
    match validate_payload(schema, &document.payload) {
        Ok(valid) => {
            if !valid.dropped.is_empty() {
                for (index, rejection) in &valid.dropped {
                    debug!("Dropping {} record {}: {}", document.key, index, rejection);
                }
                *dropped += valid.dropped.len();
            }
            let timestamp = document.timestamp;
            Some(document.revise(valid.into_value(), timestamp))
        }
        Err(e) => {
            warn!("Ignoring {} document: {}", document.key, e);
            None
        }
    }
}
