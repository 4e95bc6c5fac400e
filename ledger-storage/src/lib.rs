//! Replicated, encrypted, multi-backend document storage for Pocket Ledger.
//!
//! # Architecture
//!
//! - [`Backend`] is the uniform `probe`/`put`/`get` contract over physical
//!   stores; adapters never fail across it
//! - [`ReplicatedStore`] fans writes out to every available backend and reads
//!   back the freshest document that decrypts
//! - every successful save is announced as a [`ChangeEvent`]
//!
//! Envelopes are sealed by a [`ledger_crypto::PayloadCipher`]; this crate
//! never sees key material.

mod backend;
mod error;
mod fast;
mod identity;
mod local;
mod replicated;
mod session;

pub use backend::{Backend, BackendDescriptor, BackendKind, PutOutcome};
pub use error::{StorageError, StorageResult};
pub use fast::FastSyncBackend;
pub use identity::load_or_create_device_id;
pub use local::LocalAsyncBackend;
pub use replicated::{validate_key, ChangeEvent, ReplicatedStore};
pub use session::SessionBackend;
