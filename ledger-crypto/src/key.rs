//! Key generation and derivation.
//!
//! The installation key is random. It is never stored in clear: it is wrapped
//! under a key-encryption key derived with Argon2id from an installation
//! secret.

use crate::error::{CryptoError, CryptoResult};
use argon2::{Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of encryption keys in bytes (256 bits for ChaCha20).
pub const KEY_SIZE: usize = 32;

/// Size of salt in bytes.
pub const SALT_SIZE: usize = 16;

/// A symmetric key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    /// Creates a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Creates a key from a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self { bytes })
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Exports the key as base64.
    pub fn export(&self) -> String {
        STANDARD.encode(self.bytes)
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Salt for key derivation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Salt {
    bytes: [u8; SALT_SIZE],
}

impl Salt {
    /// Generates a random salt.
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a salt from raw bytes.
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes)
    }

    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::KeyStore(format!("invalid salt: {e}")))?;
        let bytes: [u8; SALT_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::KeyStore("invalid salt length".to_string()))?;
        Ok(Self { bytes })
    }
}

/// Key derivation parameters.
#[derive(Clone, Debug)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_cost: u32,
    /// Time cost (iterations).
    pub time_cost: u32,
    /// Parallelism factor.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // OWASP recommendations for Argon2id (2023)
        Self {
            memory_cost: 19 * 1024, // 19 MiB
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests and constrained devices. Not for secrets
    /// an attacker can brute-force offline.
    pub fn low_memory() -> Self {
        Self {
            memory_cost: 1024, // 1 MiB
            time_cost: 1,
            parallelism: 1,
        }
    }
}

/// Derives a key-encryption key from a secret using Argon2id.
pub fn derive_key(secret: &str, salt: &Salt, params: &KdfParams) -> CryptoResult<SymmetricKey> {
    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(secret.as_bytes(), salt.as_bytes(), &mut key_bytes)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let key = SymmetricKey::from_bytes(key_bytes);
    key_bytes.zeroize();
    Ok(key)
}

/// Generates a random 256-bit key.
pub fn generate_key() -> SymmetricKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let key = SymmetricKey::from_bytes(bytes);
    bytes.zeroize();
    key
}
