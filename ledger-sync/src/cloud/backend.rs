//! Adapts a [`RemoteStore`] to the storage [`Backend`] contract.

use super::remote::RemoteStore;
use async_trait::async_trait;
use ledger_storage::{Backend, BackendKind, PutOutcome};
use ledger_types::{Envelope, OwnerId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The remote document store as one replica of the replicated store.
///
/// Storage keys are `<owner>:<key>`; the adapter splits them back into the
/// remote's owner and document key.
#[derive(Clone)]
pub struct RemoteBackend {
    remote: Arc<dyn RemoteStore>,
    probe_timeout: Duration,
}

impl RemoteBackend {
    pub fn new(remote: Arc<dyn RemoteStore>, probe_timeout: Duration) -> Self {
        Self {
            remote,
            probe_timeout,
        }
    }

    fn split(scoped: &str) -> Option<(OwnerId, &str)> {
        let (owner, key) = scoped.rsplit_once(':')?;
        Some((OwnerId::new(owner).ok()?, key))
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn durable(&self) -> bool {
        true
    }

    async fn probe(&self) -> bool {
        match tokio::time::timeout(self.probe_timeout, self.remote.probe()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("Remote {} probe failed: {}", self.remote.provider_name(), e);
                false
            }
            Err(_) => {
                debug!("Remote {} probe timed out", self.remote.provider_name());
                false
            }
        }
    }

    async fn put(&self, key: &str, envelope: &Envelope) -> PutOutcome {
        let Some((owner, doc_key)) = Self::split(key) else {
            return PutOutcome::Failed(format!("malformed storage key {key:?}"));
        };
        match self.remote.put_document(&owner, doc_key, envelope).await {
            Ok(written_at) => {
                debug!("Remote accepted {} at {}", key, written_at);
                PutOutcome::Stored
            }
            Err(e) => {
                warn!("Remote write of {} failed: {}", key, e);
                PutOutcome::Failed(e.to_string())
            }
        }
    }

    async fn get(&self, key: &str) -> Option<Envelope> {
        let (owner, doc_key) = Self::split(key)?;
        match self.remote.get_document(&owner, doc_key).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Remote read of {} failed: {}", key, e);
                None
            }
        }
    }
}
