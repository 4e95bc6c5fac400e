//! Documents and their encrypted-at-rest envelopes.

use crate::{DeviceId, OwnerId, Timestamp};
use serde::{Deserialize, Serialize};

/// Current payload format version written by this build.
pub const FORMAT_VERSION: &str = "1";

/// A named, timestamped JSON payload scoped to an owner.
///
/// Documents are immutable: an update is a new document under the same key
/// with a newer timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Collection name, e.g. `"transactions"`.
    pub key: String,
    pub owner_id: OwnerId,
    /// The domain records, usually a JSON array.
    pub payload: serde_json::Value,
    pub timestamp: Timestamp,
    pub device_id: DeviceId,
    pub version: String,
}

impl Document {
    /// Creates a document stamped with the current format version.
    pub fn new(
        key: impl Into<String>,
        owner_id: OwnerId,
        payload: serde_json::Value,
        timestamp: Timestamp,
        device_id: DeviceId,
    ) -> Self {
        Self {
            key: key.into(),
            owner_id,
            payload,
            timestamp,
            device_id,
            version: FORMAT_VERSION.to_string(),
        }
    }

    /// Returns the same document with a different payload and timestamp.
    #[must_use]
    pub fn revise(&self, payload: serde_json::Value, timestamp: Timestamp) -> Self {
        Self {
            payload,
            timestamp,
            ..self.clone()
        }
    }

    /// The owner-scoped storage key.
    #[must_use]
    pub fn scoped_key(&self) -> String {
        self.owner_id.scoped(&self.key)
    }
}

/// The at-rest and on-wire form of a document or snapshot.
///
/// `data` and `iv` are base64; the ciphertext decrypts to the serialized
/// [`Document`] (or snapshot). `timestamp`, `deviceId` and `version` are kept
/// in clear for listing and diagnostics only; ordering always uses the
/// authenticated timestamp inside the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub data: String,
    pub iv: String,
    pub timestamp: Timestamp,
    pub device_id: DeviceId,
    pub version: String,
}

impl Envelope {
    /// Encodes to JSON bytes for file and object storage.
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Why a document was written. Lets subscribers ignore writes they caused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// A user mutation on this device.
    Local,
    /// Write-back of a sync merge.
    Sync,
    /// Seeding from a backup snapshot.
    Restore,
}
