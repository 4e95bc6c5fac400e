//! Collection model for Pocket Ledger.
//!
//! Defines how the sync core understands the records inside a document:
//! - [`CollectionSchema`]: a collection's kind and its minimal shape rules
//! - [`CollectionKind`]: independent record list vs. keyed records, which
//!   selects the smart-merge rule
//! - [`Schemas`]: registry of known collections, defaulting to the budgeting
//!   collections (transactions, categories, incomes)
//! - record accessors for ids, modification times and dedup keys
//!
//! Collections without a schema are treated as opaque payloads.

mod record;
mod schema;
mod validate;

pub use record::{dedup_key, last_modified, record_id};
pub use schema::{CollectionKind, CollectionSchema, Schemas};
pub use validate::{validate_payload, validate_record, RecordRejection, ValidatedPayload};

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while interpreting a document payload.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The payload of a record collection is not a JSON array.
    #[error("collection {key:?} payload is not an array")]
    NotAnArray { key: String },
}
