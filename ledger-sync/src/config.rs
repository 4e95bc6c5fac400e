//! Sync and backup configuration.

use crate::error::{SyncError, SyncResult};
use crate::merge::ConflictResolution;
use crate::timing::Backoff;
use ledger_types::keys;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration consumed by the sync engine and the backup scheduler.
///
/// Every field has a default, so a partial TOML or JSON document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Merge strategy applied when local and remote diverge.
    pub conflict_resolution: ConflictResolution,
    /// Seconds between periodic sync cycles.
    pub sync_interval_secs: u64,
    /// Quiet period after the last relevant mutation before a snapshot.
    pub backup_debounce_secs: u64,
    /// Snapshots kept per owner; older ones are pruned.
    pub max_snapshots: usize,
    /// Snapshot uploads allowed per owner per UTC day.
    pub max_snapshots_per_day: u32,
    /// Collections that are synced, backed up and restored.
    pub relevant_keys: Vec<String>,
    /// Timeout of the remote reachability probe (ms).
    pub probe_timeout_ms: u64,
    /// Delay between regaining connectivity and leaving `offline` (ms).
    pub settle_delay_ms: u64,
    /// Failed cycles retried before parking in `error`.
    pub max_retry_attempts: u32,
    /// First retry delay (ms), doubled per attempt.
    pub backoff_base_ms: u64,
    /// Upper bound of a retry delay (ms).
    pub backoff_cap_ms: u64,
    /// Maximum random delay added to each periodic interval (ms).
    pub interval_jitter_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            conflict_resolution: ConflictResolution::default(),
            sync_interval_secs: 300,
            backup_debounce_secs: 30,
            max_snapshots: 10,
            max_snapshots_per_day: 10,
            relevant_keys: keys::DEFAULT_RELEVANT.iter().map(|k| k.to_string()).collect(),
            probe_timeout_ms: 5_000,
            settle_delay_ms: 2_000,
            max_retry_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 60_000,
            interval_jitter_ms: 5_000,
        }
    }
}

impl SyncConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn backup_debounce(&self) -> Duration {
        Duration::from_secs(self.backup_debounce_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn interval_jitter(&self) -> Duration {
        Duration::from_millis(self.interval_jitter_ms)
    }

    /// A fresh retry schedule for failed cycles.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
            self.max_retry_attempts,
        )
    }

    pub fn is_relevant(&self, key: &str) -> bool {
        self.relevant_keys.iter().any(|k| k == key)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.sync_interval_secs == 0 {
            return Err(SyncError::Config("sync_interval_secs must be positive".into()));
        }
        if self.backup_debounce_secs == 0 {
            return Err(SyncError::Config("backup_debounce_secs must be positive".into()));
        }
        if self.max_snapshots == 0 {
            return Err(SyncError::Config("max_snapshots must be at least 1".into()));
        }
        if self.max_snapshots_per_day == 0 {
            return Err(SyncError::Config(
                "max_snapshots_per_day must be at least 1".into(),
            ));
        }
        if self.relevant_keys.is_empty() {
            return Err(SyncError::Config("relevant_keys must not be empty".into()));
        }
        if let Some(blank) = self.relevant_keys.iter().find(|k| k.trim().is_empty()) {
            return Err(SyncError::Config(format!("invalid relevant key {blank:?}")));
        }
        if self.probe_timeout_ms == 0 {
            return Err(SyncError::Config("probe_timeout_ms must be positive".into()));
        }
        if self.backoff_base_ms == 0 || self.backoff_base_ms > self.backoff_cap_ms {
            return Err(SyncError::Config(format!(
                "backoff_base_ms ({}) must be positive and at most backoff_cap_ms ({})",
                self.backoff_base_ms, self.backoff_cap_ms
            )));
        }
        Ok(())
    }
}
