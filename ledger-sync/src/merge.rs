//! Conflict resolution between a local and a remote document.
//!
//! Smart merge takes the remote records as the base order and folds the
//! local ones in, so two devices that exchange the same records settle on
//! the same payload instead of re-pushing reordered copies.

use ledger_model::{dedup_key, last_modified, record_id, CollectionKind, CollectionSchema};
use ledger_types::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// How divergent local and remote documents are reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    /// The remote payload replaces the local one.
    ServerWins,
    /// The local payload is kept and pushed again.
    ClientWins,
    /// Per-collection rules: union for record lists, newest copy per id for
    /// keyed records, last writer wins otherwise.
    #[default]
    SmartMerge,
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ServerWins => "server-wins",
            Self::ClientWins => "client-wins",
            Self::SmartMerge => "smart-merge",
        };
        f.write_str(name)
    }
}

impl FromStr for ConflictResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server-wins" => Ok(Self::ServerWins),
            "client-wins" => Ok(Self::ClientWins),
            "smart-merge" => Ok(Self::SmartMerge),
            other => Err(format!("unknown conflict resolution {other:?}")),
        }
    }
}

/// Merges two versions of the same collection.
///
/// `schema` is `None` for collections the model does not know; their
/// payloads are opaque and the newer document wins, the remote one on a tie.
/// Payloads of known collections are expected to be validated arrays.
pub fn merge_documents(
    strategy: ConflictResolution,
    schema: Option<&CollectionSchema>,
    local: &Document,
    remote: &Document,
) -> Value {
    match strategy {
        ConflictResolution::ServerWins => remote.payload.clone(),
        ConflictResolution::ClientWins => local.payload.clone(),
        ConflictResolution::SmartMerge => match schema {
            Some(schema) => {
                let local = as_records(&local.payload);
                let remote = as_records(&remote.payload);
                let merged = match schema.kind {
                    CollectionKind::RecordList => union_records(schema, local, remote),
                    CollectionKind::Keyed => keep_latest(schema, local, remote),
                };
                Value::Array(merged)
            }
            None => last_writer_wins(local, remote).payload.clone(),
        },
    }
}

/// The newer of two documents, `remote` on equal timestamps.
pub fn last_writer_wins<'a>(local: &'a Document, remote: &'a Document) -> &'a Document {
    if local.timestamp > remote.timestamp {
        local
    } else {
        remote
    }
}

/// Union of two record lists, deduplicated by the schema's composite key.
///
/// Remote records come first, in their order, followed by local records not
/// already present.
pub fn union_records(schema: &CollectionSchema, local: &[Value], remote: &[Value]) -> Vec<Value> {
    let mut seen = HashSet::new();
    remote
        .iter()
        .chain(local)
        .filter(|record| seen.insert(dedup_key(record, &schema.dedup_fields)))
        .cloned()
        .collect()
}

/// Per-id merge of keyed records: the copy with the newer modification time
/// wins, ids present on one side only are kept.
///
/// Equal (or missing) modification times fall back to comparing the
/// serialized records so every device picks the same copy.
pub fn keep_latest(schema: &CollectionSchema, local: &[Value], remote: &[Value]) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(remote.len() + local.len());
    let mut position: HashMap<String, usize> = HashMap::new();

    for record in remote.iter().chain(local) {
        let Some(id) = record_id(record, &schema.id_field) else {
            continue;
        };
        match position.get(&id) {
            Some(&index) => {
                if newer(schema, record, &merged[index]) {
                    merged[index] = record.clone();
                }
            }
            None => {
                position.insert(id, merged.len());
                merged.push(record.clone());
            }
        }
    }
    merged
}

fn newer(schema: &CollectionSchema, candidate: &Value, current: &Value) -> bool {
    let a = last_modified(candidate, &schema.modified_field);
    let b = last_modified(current, &schema.modified_field);
    match a.cmp(&b) {
        std::cmp::Ordering::Equal => candidate.to_string() > current.to_string(),
        ordering => ordering.is_gt(),
    }
}

fn as_records(payload: &Value) -> &[Value] {
    payload.as_array().map(Vec::as_slice).unwrap_or(&[])
}
