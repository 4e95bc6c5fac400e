//! Authenticated encryption using ChaCha20-Poly1305.

use crate::error::{CryptoError, CryptoResult};
use crate::key::SymmetricKey;
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

/// Size of nonce in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Ciphertext plus the nonce needed to open it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedData {
    /// The nonce used for encryption (unique per encryption).
    pub nonce: [u8; NONCE_SIZE],
    /// The encrypted ciphertext (includes auth tag).
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Returns the total size of the encrypted data.
    pub fn len(&self) -> usize {
        NONCE_SIZE + self.ciphertext.len()
    }

    /// Returns true if the ciphertext is empty.
    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    /// Encodes as `(data, iv)` base64 strings.
    pub fn to_parts(&self) -> (String, String) {
        (STANDARD.encode(&self.ciphertext), STANDARD.encode(self.nonce))
    }

    /// Decodes from `(data, iv)` base64 strings.
    pub fn from_parts(data: &str, iv: &str) -> CryptoResult<Self> {
        let ciphertext = STANDARD
            .decode(data)
            .map_err(|e| CryptoError::Decryption(format!("invalid base64 data: {e}")))?;
        let nonce_bytes = STANDARD
            .decode(iv)
            .map_err(|e| CryptoError::Decryption(format!("invalid base64 iv: {e}")))?;

        let nonce: [u8; NONCE_SIZE] =
            nonce_bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidNonceLength {
                    expected: NONCE_SIZE,
                    actual: nonce_bytes.len(),
                })?;

        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::Decryption("data too short".to_string()));
        }

        Ok(Self { nonce, ciphertext })
    }
}

/// Encrypts plaintext under `key` with a fresh random nonce.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(EncryptedData {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypts ciphertext produced by [`encrypt`] under the same key.
pub fn decrypt(key: &SymmetricKey, encrypted: &EncryptedData) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = Nonce::from_slice(&encrypted.nonce);

    cipher
        .decrypt(nonce, encrypted.ciphertext.as_ref())
        .map_err(|_| {
            CryptoError::Decryption("decryption failed (wrong key or tampered data)".to_string())
        })
}
