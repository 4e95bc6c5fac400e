//! Error types for the storage layer.

use ledger_crypto::CryptoError;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No backend is configured, or none is usable on this platform.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Every available backend rejected a write.
    #[error("no backend accepted write of {key}: {}", .reasons.join("; "))]
    NoBackendAccepted { key: String, reasons: Vec<String> },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Encryption/decryption error.
    #[error("encryption error: {0}")]
    Crypto(#[from] CryptoError),

    /// Invalid data.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl From<ledger_types::Error> for StorageError {
    fn from(err: ledger_types::Error) -> Self {
        match err {
            ledger_types::Error::Serialization(e) => Self::Serialization(e),
            other => Self::InvalidData(other.to_string()),
        }
    }
}
