//! Backup snapshots.
//!
//! A snapshot is the union of all relevant documents of one owner at an
//! instant. Snapshot object names are deterministic:
//! `backup_<owner>_<YYYY-MM-DD>_<millis>.json`, where `<owner>` is the
//! percent-encoded owner id with `_` escaped as well. The encoding is
//! injective and never contains `_`, so one owner's prefix never matches
//! another owner's snapshots.

use crate::{DeviceId, Document, OwnerId, Timestamp, FORMAT_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const NAME_PREFIX: &str = "backup_";
const NAME_SUFFIX: &str = ".json";

/// Point-in-time union of an owner's documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    /// The object name the snapshot was uploaded under.
    pub id: String,
    pub owner_id: OwnerId,
    pub timestamp: Timestamp,
    pub device_id: DeviceId,
    pub version: String,
    /// Collection key → document.
    pub documents: BTreeMap<String, Document>,
}

impl BackupSnapshot {
    /// Builds a snapshot named for `owner` at `timestamp`.
    pub fn new(
        owner_id: OwnerId,
        timestamp: Timestamp,
        device_id: DeviceId,
        documents: BTreeMap<String, Document>,
    ) -> Self {
        Self {
            id: snapshot_name(&owner_id, timestamp),
            owner_id,
            timestamp,
            device_id,
            version: FORMAT_VERSION.to_string(),
            documents,
        }
    }

    /// Payload of one collection, if the snapshot holds it.
    #[must_use]
    pub fn payload(&self, key: &str) -> Option<&serde_json::Value> {
        self.documents.get(key).map(|d| &d.payload)
    }
}

/// A snapshot as listed by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub name: String,
    pub timestamp: Timestamp,
}

fn encode_owner(owner: &OwnerId) -> String {
    urlencoding::encode(owner.as_str()).replace('_', "%5F")
}

/// Name prefix shared by every snapshot of `owner`.
#[must_use]
pub fn snapshot_prefix(owner: &OwnerId) -> String {
    format!("{NAME_PREFIX}{}_", encode_owner(owner))
}

/// Deterministic object name for a snapshot of `owner` taken at `timestamp`.
#[must_use]
pub fn snapshot_name(owner: &OwnerId, timestamp: Timestamp) -> String {
    format!(
        "{}{}_{}{NAME_SUFFIX}",
        snapshot_prefix(owner),
        timestamp.utc_date().format("%Y-%m-%d"),
        timestamp.as_millis()
    )
}

/// Extracts the timestamp from a snapshot name produced by [`snapshot_name`].
///
/// Returns `None` for names that do not follow the scheme.
#[must_use]
pub fn parse_snapshot_name(name: &str) -> Option<Timestamp> {
    let stem = name.strip_prefix(NAME_PREFIX)?.strip_suffix(NAME_SUFFIX)?;
    let (rest, millis) = stem.rsplit_once('_')?;
    let (_owner, date) = rest.rsplit_once('_')?;
    let ts = Timestamp::from_millis(millis.parse().ok()?);
    (ts.utc_date().format("%Y-%m-%d").to_string() == date).then_some(ts)
}
