//! Observable sync state and the transitions that drive it.
//!
//! The engine is the only writer; everything else holds a
//! `watch::Receiver<SyncState>`.

use crate::merge::ConflictResolution;
use ledger_types::Timestamp;
use serde::Serialize;
use std::fmt;
use tokio::sync::watch;
use tracing::debug;

/// Lifecycle status of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No owner is signed in.
    Disabled,
    Idle,
    Syncing,
    /// The last cycle failed; see [`SyncState::last_error`].
    Error,
    Offline,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disabled => "disabled",
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Error => "error",
            Self::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// Snapshot of the engine's state. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub status: SyncStatus,
    pub is_online: bool,
    pub sync_in_progress: bool,
    pub last_sync_time: Option<Timestamp>,
    pub conflict_resolution: ConflictResolution,
    /// Consecutive failed cycles since the last success.
    pub retry_attempts: u32,
    pub last_error: Option<String>,
}

impl SyncState {
    fn initial(conflict_resolution: ConflictResolution) -> Self {
        Self {
            status: SyncStatus::Disabled,
            is_online: true,
            sync_in_progress: false,
            last_sync_time: None,
            conflict_resolution,
            retry_attempts: 0,
            last_error: None,
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Authenticated,
    SignedOut,
    CycleStarted,
    CycleSucceeded { at: Timestamp },
    CycleFailed { error: String },
    ConnectionLost,
    ConnectionRestored,
    /// The settle delay after a reconnect elapsed.
    Settled,
}

/// Owns the [`SyncState`] and applies [`SyncEvent`]s to it.
#[derive(Debug)]
pub struct SyncStateMachine {
    tx: watch::Sender<SyncState>,
}

impl SyncStateMachine {
    pub fn new(conflict_resolution: ConflictResolution) -> Self {
        let (tx, _) = watch::channel(SyncState::initial(conflict_resolution));
        Self { tx }
    }

    /// A receiver observing every state change.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.tx.subscribe()
    }

    /// The current state.
    #[must_use]
    pub fn current(&self) -> SyncState {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.tx.borrow().status
    }

    pub fn set_conflict_resolution(&self, strategy: ConflictResolution) {
        self.tx.send_if_modified(|state| {
            let changed = state.conflict_resolution != strategy;
            state.conflict_resolution = strategy;
            changed
        });
    }

    /// Applies `event`. Returns whether it was accepted in the current
    /// status; rejected events leave the state untouched.
    pub fn apply(&self, event: SyncEvent) -> bool {
        let mut accepted = false;
        self.tx.send_if_modified(|state| {
            let before = state.clone();
            accepted = transition(state, &event);
            if !accepted {
                debug!("Ignoring {:?} in status {}", event, state.status);
            } else if state.status != before.status {
                debug!("Sync status {} -> {} on {:?}", before.status, state.status, event);
            }
            *state != before
        });
        accepted
    }
}

fn transition(state: &mut SyncState, event: &SyncEvent) -> bool {
    use SyncStatus::*;

    match (state.status, event) {
        (Disabled, SyncEvent::Authenticated) => {
            state.status = if state.is_online { Idle } else { Offline };
            true
        }
        (_, SyncEvent::Authenticated) => false,

        (_, SyncEvent::SignedOut) => {
            state.status = Disabled;
            state.sync_in_progress = false;
            state.retry_attempts = 0;
            state.last_error = None;
            true
        }

        (Idle | Error, SyncEvent::CycleStarted) => {
            state.status = Syncing;
            state.sync_in_progress = true;
            true
        }
        (_, SyncEvent::CycleStarted) => false,

        (Syncing, SyncEvent::CycleSucceeded { at }) => {
            state.status = Idle;
            state.sync_in_progress = false;
            state.last_sync_time = Some(*at);
            state.retry_attempts = 0;
            state.last_error = None;
            true
        }
        (Syncing, SyncEvent::CycleFailed { error }) => {
            state.status = Error;
            state.sync_in_progress = false;
            state.retry_attempts = state.retry_attempts.saturating_add(1);
            state.last_error = Some(error.clone());
            true
        }
        (_, SyncEvent::CycleSucceeded { .. } | SyncEvent::CycleFailed { .. }) => false,

        (Disabled, SyncEvent::ConnectionLost) => {
            state.is_online = false;
            true
        }
        (_, SyncEvent::ConnectionLost) => {
            state.is_online = false;
            state.sync_in_progress = false;
            state.status = Offline;
            true
        }

        (_, SyncEvent::ConnectionRestored) => {
            state.is_online = true;
            true
        }

        (Offline, SyncEvent::Settled) if state.is_online => {
            state.status = Idle;
            true
        }
        (_, SyncEvent::Settled) => false,
    }
}
