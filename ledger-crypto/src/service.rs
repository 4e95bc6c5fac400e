//! The cipher service the storage layer encrypts through.
//!
//! Consumers depend on `Arc<dyn PayloadCipher>` and never see the key.

use crate::cipher::{self, EncryptedData};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{generate_key, KdfParams, SymmetricKey};
use crate::keystore::{KeyStore, WrappedKey};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Base64 ciphertext and iv, the encrypted half of an envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    pub data: String,
    pub iv: String,
}

/// Opaque symmetric cipher.
pub trait PayloadCipher: Send + Sync {
    /// Encrypts `plaintext` with a fresh iv.
    fn seal(&self, plaintext: &[u8]) -> CryptoResult<Sealed>;

    /// Decrypts a value produced by `seal` under the same key.
    fn open(&self, sealed: &Sealed) -> CryptoResult<Vec<u8>>;
}

/// Serializes `value` to JSON and seals it.
pub fn seal_json<T: Serialize + ?Sized>(
    cipher: &dyn PayloadCipher,
    value: &T,
) -> CryptoResult<Sealed> {
    let plaintext = serde_json::to_vec(value)?;
    cipher.seal(&plaintext)
}

/// Opens `sealed` and deserializes the JSON plaintext.
///
/// Plaintext that is not the expected JSON is reported as a decryption
/// failure: it can only come from a foreign or corrupted envelope.
pub fn open_json<T: DeserializeOwned>(
    cipher: &dyn PayloadCipher,
    sealed: &Sealed,
) -> CryptoResult<T> {
    let plaintext = cipher.open(sealed)?;
    serde_json::from_slice(&plaintext)
        .map_err(|e| CryptoError::Decryption(format!("plaintext is not a valid document: {e}")))
}

/// ChaCha20-Poly1305 under the installation key.
#[derive(Debug)]
pub struct CipherService {
    key: SymmetricKey,
}

impl CipherService {
    /// Uses an explicit key.
    pub fn from_key(key: SymmetricKey) -> Self {
        Self { key }
    }

    /// Loads the installation key from `store`, or generates and persists a
    /// new one on first use.
    ///
    /// The key is wrapped under a key derived from `secret`; a wrong secret
    /// fails with [`CryptoError::Decryption`].
    pub fn ensure_key(
        store: &dyn KeyStore,
        secret: &str,
        params: &KdfParams,
    ) -> CryptoResult<Self> {
        if let Some(wrapped) = store.load()? {
            let key = wrapped.unwrap_key(secret, params)?;
            return Ok(Self { key });
        }

        let key = generate_key();
        store.store(&WrappedKey::wrap(&key, secret, params)?)?;
        Ok(Self { key })
    }
}

impl PayloadCipher for CipherService {
    fn seal(&self, plaintext: &[u8]) -> CryptoResult<Sealed> {
        let (data, iv) = cipher::encrypt(&self.key, plaintext)?.to_parts();
        Ok(Sealed { data, iv })
    }

    fn open(&self, sealed: &Sealed) -> CryptoResult<Vec<u8>> {
        let encrypted = EncryptedData::from_parts(&sealed.data, &sealed.iv)?;
        cipher::decrypt(&self.key, &encrypted)
    }
}
