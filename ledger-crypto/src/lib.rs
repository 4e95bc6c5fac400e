//! Encryption layer for the Pocket Ledger storage core.
//!
//! Every document and snapshot is sealed with ChaCha20-Poly1305 under a single
//! 256-bit installation key before it reaches any backend.
//!
//! - [`key`]: key generation, export and Argon2id key-encryption keys
//! - [`cipher`]: the AEAD primitive with a fresh random nonce per call
//! - [`keystore`]: persistence of the wrapped installation key
//! - [`service`]: [`CipherService`] and the [`PayloadCipher`] seam the
//!   storage layer depends on

pub mod cipher;
mod error;
pub mod key;
pub mod keystore;
pub mod service;

pub use cipher::{decrypt, encrypt, EncryptedData, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, generate_key, KdfParams, Salt, SymmetricKey, KEY_SIZE, SALT_SIZE};
pub use keystore::{FileKeyStore, KeyStore, MemoryKeyStore, WrappedKey};
pub use service::{open_json, seal_json, CipherService, PayloadCipher, Sealed};
