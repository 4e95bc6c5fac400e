//! Core type definitions for the Pocket Ledger storage and sync core.
//!
//! This crate defines the plain data types shared by every other crate:
//! - Owner, device and collection identifiers
//! - Wall-clock timestamps and the [`Clock`] abstraction
//! - [`Document`] (decrypted, in memory) and [`Envelope`] (encrypted, at rest)
//! - Backup snapshot types and their deterministic naming scheme
//!
//! Nothing in here performs I/O.

mod document;
mod ids;
mod snapshot;
mod timestamp;

pub use document::{ChangeOrigin, Document, Envelope, FORMAT_VERSION};
pub use ids::{DeviceId, OwnerId};
pub use snapshot::{
    parse_snapshot_name, snapshot_name, snapshot_prefix, BackupSnapshot, SnapshotInfo,
};
pub use timestamp::{Clock, ManualClock, SystemClock, Timestamp};

/// Well-known collection keys of the budgeting application.
pub mod keys {
    /// Append-only list of transactions.
    pub const TRANSACTIONS: &str = "transactions";
    /// Keyed spending categories.
    pub const CATEGORIES: &str = "categories";
    /// Keyed recurring incomes.
    pub const INCOMES: &str = "incomes";

    /// The collections backed up and synced by default.
    pub const DEFAULT_RELEVANT: [&str; 3] = [TRANSACTIONS, CATEGORIES, INCOMES];
}

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid owner id: {0:?}")]
    InvalidOwner(String),
}
