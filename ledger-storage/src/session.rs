//! Session cache: lives and dies with the process.

use crate::backend::{Backend, BackendKind, PutOutcome};
use async_trait::async_trait;
use ledger_types::Envelope;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Non-durable in-process store.
#[derive(Debug, Default)]
pub struct SessionBackend {
    entries: RwLock<HashMap<String, Envelope>>,
}

impl SessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl Backend for SessionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Session
    }

    fn durable(&self) -> bool {
        false
    }

    async fn probe(&self) -> bool {
        true
    }

    async fn put(&self, key: &str, envelope: &Envelope) -> PutOutcome {
        self.entries
            .write()
            .await
            .insert(key.to_string(), envelope.clone());
        PutOutcome::Stored
    }

    async fn get(&self, key: &str) -> Option<Envelope> {
        self.entries.read().await.get(key).cloned()
    }
}
