//! Error types for the sync layer.

use ledger_crypto::CryptoError;
use ledger_model::ModelError;
use ledger_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync and backup operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Remote unreachable or a transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// The remote rejected the operation for authorization reasons.
    #[error("permission denied: {0}")]
    Permission(String),

    /// A document or record failed shape validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A corrupted or foreign envelope.
    #[error("decryption error: {0}")]
    Decryption(String),

    /// The daily snapshot cap was reached.
    #[error("snapshot quota of {limit} per day exceeded for {owner}")]
    QuotaExceeded { owner: String, limit: u32 },

    /// A physical store is not usable.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote object not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// No owner is signed in.
    #[error("not authenticated")]
    NotAuthenticated,
}

impl SyncError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::BackendUnavailable(_)
        )
    }

    /// Whether the failure means the remote is unreachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::BackendUnavailable(msg) => Self::BackendUnavailable(msg),
            err @ StorageError::NoBackendAccepted { .. } => {
                Self::BackendUnavailable(err.to_string())
            }
            StorageError::Serialization(e) => Self::Serialization(e),
            StorageError::Crypto(e) => Self::Decryption(e.to_string()),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<CryptoError> for SyncError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Serialization(e) => Self::Serialization(e),
            other => Self::Decryption(other.to_string()),
        }
    }
}

impl From<ModelError> for SyncError {
    fn from(err: ModelError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<ledger_types::Error> for SyncError {
    fn from(err: ledger_types::Error) -> Self {
        match err {
            ledger_types::Error::Serialization(e) => Self::Serialization(e),
            other => Self::Validation(other.to_string()),
        }
    }
}
