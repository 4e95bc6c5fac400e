//! The uniform contract every physical store implements.

use async_trait::async_trait;
use ledger_types::Envelope;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four kinds of physical store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Synchronous cache mirrored to a single file.
    FastSync,
    /// Process-scoped cache.
    Session,
    /// Asynchronous transactional local store.
    LocalAsync,
    /// Remote cloud document store.
    Remote,
}

impl BackendKind {
    /// Rank used to break timestamp ties on read. Higher wins.
    pub fn priority(self) -> u8 {
        match self {
            Self::FastSync => 0,
            Self::Session => 1,
            Self::LocalAsync => 2,
            Self::Remote => 3,
        }
    }

    /// Whether this kind lives on the device.
    pub fn is_local(self) -> bool {
        !matches!(self, Self::Remote)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FastSync => "fast-sync",
            Self::Session => "session",
            Self::LocalAsync => "local-async",
            Self::Remote => "remote",
        };
        f.write_str(name)
    }
}

/// Capability descriptor of a configured backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub kind: BackendKind,
    pub durable: bool,
    /// Result of the most recent probe.
    pub available: bool,
}

/// Result of a single backend write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    Failed(String),
}

impl PutOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored)
    }
}

/// A physical store of envelopes keyed by owner-scoped key.
///
/// Implementations never fail across this interface: transport errors are
/// logged and reported as [`PutOutcome::Failed`] or an absent read.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether writes survive a restart.
    fn durable(&self) -> bool;

    /// Whether the store is usable right now.
    async fn probe(&self) -> bool;

    async fn put(&self, key: &str, envelope: &Envelope) -> PutOutcome;

    async fn get(&self, key: &str) -> Option<Envelope>;
}
