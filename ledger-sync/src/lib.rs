//! Cloud synchronization and backup for Pocket Ledger.
//!
//! # Architecture
//!
//! - [`cloud`]: the [`RemoteStore`](cloud::RemoteStore) trait and its
//!   folder, HTTP and in-memory providers
//! - [`SyncEngine`]: auth and connectivity aware pull/merge/push cycles
//!   driven by an observable [`SyncStateMachine`]
//! - [`merge`]: server-wins, client-wins and per-collection smart merge
//! - [`BackupScheduler`]: debounced, rate-limited snapshot uploads with
//!   pruning, plus start-up reconciliation from the newest snapshot
//! - [`timing`]: the debouncer and backoff shared by both

pub mod backup;
pub mod cloud;
pub mod config;
pub mod engine;
mod error;
pub mod merge;
pub mod state;
pub mod timing;

pub use backup::{BackupScheduler, ReconcileOutcome};
pub use config::SyncConfig;
pub use engine::{CycleReport, SyncEngine, TriggerOutcome, TriggerReason};
pub use error::{SyncError, SyncResult};
pub use merge::ConflictResolution;
pub use state::{SyncEvent, SyncState, SyncStateMachine, SyncStatus};
pub use timing::{Backoff, Debouncer};
