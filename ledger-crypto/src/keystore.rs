//! Persistence of the wrapped installation key.

use crate::cipher::{self, EncryptedData};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, KdfParams, Salt, SymmetricKey};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use zeroize::Zeroizing;

/// The installation key sealed under a secret-derived key-encryption key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    pub version: u8,
    /// Argon2id salt, base64.
    pub salt: String,
    /// Sealed key bytes, base64.
    pub key: String,
    /// Nonce of the sealed key, base64.
    pub iv: String,
}

impl WrappedKey {
    /// Current wrapping format version.
    pub const CURRENT_VERSION: u8 = 1;

    /// Seals `key` under a key derived from `secret`.
    pub fn wrap(key: &SymmetricKey, secret: &str, params: &KdfParams) -> CryptoResult<Self> {
        let salt = Salt::random();
        let kek = derive_key(secret, &salt, params)?;
        let sealed = cipher::encrypt(&kek, key.as_bytes())?;
        let (key, iv) = sealed.to_parts();
        Ok(Self {
            version: Self::CURRENT_VERSION,
            salt: salt.to_base64(),
            key,
            iv,
        })
    }

    /// Opens the wrapped key. Fails with `Decryption` for a wrong secret.
    pub fn unwrap_key(&self, secret: &str, params: &KdfParams) -> CryptoResult<SymmetricKey> {
        if self.version != Self::CURRENT_VERSION {
            return Err(CryptoError::KeyStore(format!(
                "unsupported wrapped key version {}",
                self.version
            )));
        }
        let salt = Salt::from_base64(&self.salt)?;
        let kek = derive_key(secret, &salt, params)?;
        let sealed = EncryptedData::from_parts(&self.key, &self.iv)?;
        let bytes = Zeroizing::new(cipher::decrypt(&kek, &sealed)?);
        SymmetricKey::from_slice(&bytes)
    }
}

/// Where the wrapped installation key lives.
pub trait KeyStore: Send + Sync {
    /// Loads the wrapped key, `None` if none was ever stored.
    fn load(&self) -> CryptoResult<Option<WrappedKey>>;

    /// Persists the wrapped key, replacing any previous one.
    fn store(&self, key: &WrappedKey) -> CryptoResult<()>;
}

/// Keeps the wrapped key in a JSON file.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyStore for FileKeyStore {
    fn load(&self) -> CryptoResult<Option<WrappedKey>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CryptoError::KeyStore(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn store(&self, key: &WrappedKey) -> CryptoResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CryptoError::KeyStore(format!("failed to create key dir: {e}")))?;
        }
        let bytes = serde_json::to_vec_pretty(key)?;
        std::fs::write(&self.path, bytes).map_err(|e| {
            CryptoError::KeyStore(format!("failed to write {}: {e}", self.path.display()))
        })
    }
}

/// Keeps the wrapped key in memory. Lost with the process.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    slot: Mutex<Option<WrappedKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> CryptoResult<Option<WrappedKey>> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| CryptoError::KeyStore("key slot poisoned".to_string()))?;
        Ok(slot.clone())
    }

    fn store(&self, key: &WrappedKey) -> CryptoResult<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| CryptoError::KeyStore("key slot poisoned".to_string()))?;
        *slot = Some(key.clone());
        Ok(())
    }
}
