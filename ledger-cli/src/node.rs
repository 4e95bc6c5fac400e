//! A fully wired ledger installation: replicated store, sync engine and
//! backup scheduler over the configured remote.

use crate::config::{RemoteTarget, Settings};
use anyhow::{Context, Result};
use ledger_crypto::{CipherService, FileKeyStore, KdfParams, PayloadCipher};
use ledger_model::Schemas;
use ledger_storage::{
    load_or_create_device_id, Backend, BackendDescriptor, FastSyncBackend, LocalAsyncBackend,
    ReplicatedStore, SessionBackend,
};
use ledger_sync::cloud::{FolderRemote, HttpRemote, RemoteBackend, RemoteStore};
use ledger_sync::{BackupScheduler, SyncEngine, SyncState};
use ledger_types::{OwnerId, SystemClock};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Remote side of a node, present when a remote is configured.
pub struct Cloud {
    pub remote: Arc<dyn RemoteStore>,
    pub engine: Arc<SyncEngine>,
    pub backups: Arc<BackupScheduler>,
}

pub struct LedgerNode {
    pub owner: OwnerId,
    pub store: Arc<ReplicatedStore>,
    pub cloud: Option<Cloud>,
}

/// What `ledger status` prints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub owner: String,
    pub device_id: String,
    pub backends: Vec<BackendStatus>,
    pub remote: Option<String>,
    pub sync: Option<SyncState>,
}

#[derive(Debug, Serialize)]
pub struct BackendStatus {
    pub kind: String,
    pub durable: bool,
    pub available: bool,
}

impl From<BackendDescriptor> for BackendStatus {
    fn from(d: BackendDescriptor) -> Self {
        Self {
            kind: d.kind.to_string(),
            durable: d.durable,
            available: d.available,
        }
    }
}

impl LedgerNode {
    /// Opens (or initialises) the installation under `settings.data_dir`.
    ///
    /// With a remote configured the sync engine is created and
    /// authenticated for `owner`.
    pub async fn open(
        settings: &Settings,
        owner: OwnerId,
        secret: &str,
        kdf: &KdfParams,
    ) -> Result<Self> {
        std::fs::create_dir_all(&settings.data_dir).with_context(|| {
            format!("Failed to create data dir {}", settings.data_dir.display())
        })?;

        let key_store = FileKeyStore::new(settings.key_path());
        let cipher: Arc<dyn PayloadCipher> = Arc::new(
            CipherService::ensure_key(&key_store, secret, kdf)
                .context("Failed to unlock installation key (wrong secret?)")?,
        );
        let device_id = load_or_create_device_id(&settings.device_id_path())
            .await
            .context("Failed to load device id")?;

        let remote = match &settings.remote {
            Some(target) => Some(connect(target).await?),
            None => None,
        };

        let mut backends: Vec<Arc<dyn Backend>> = vec![
            Arc::new(
                FastSyncBackend::open(settings.fast_sync_path())
                    .context("Failed to open fast-sync store")?,
            ),
            Arc::new(SessionBackend::new()),
            Arc::new(LocalAsyncBackend::new(settings.documents_dir())),
        ];
        if let Some(remote) = &remote {
            backends.push(Arc::new(RemoteBackend::new(
                Arc::clone(remote),
                settings.sync.probe_timeout(),
            )));
        }

        let store = Arc::new(
            ReplicatedStore::open(backends, cipher, device_id, Arc::new(SystemClock))
                .await
                .context("No storage backend available")?,
        );
        info!("Opened ledger for {} on device {}", owner, device_id);

        let cloud = match remote {
            Some(remote) => {
                let engine = Arc::new(SyncEngine::new(
                    Arc::clone(&store),
                    Arc::clone(&remote),
                    Schemas::budget(),
                    settings.sync.clone(),
                )?);
                engine.authenticate(owner.clone()).await;
                let backups = Arc::new(BackupScheduler::new(
                    Arc::clone(&store),
                    Arc::clone(&remote),
                    settings.sync.clone(),
                )?);
                Some(Cloud {
                    remote,
                    engine,
                    backups,
                })
            }
            None => None,
        };

        Ok(Self {
            owner,
            store,
            cloud,
        })
    }

    /// The cloud side, or an error naming the missing flag.
    pub fn cloud(&self) -> Result<&Cloud> {
        self.cloud
            .as_ref()
            .context("No remote configured; pass --remote-dir or --remote-url")
    }

    pub async fn status(&self) -> StatusReport {
        let backends = self
            .store
            .refresh_availability()
            .await
            .into_iter()
            .map(BackendStatus::from)
            .collect();
        StatusReport {
            owner: self.owner.to_string(),
            device_id: self.store.device_id().to_string(),
            backends,
            remote: self
                .cloud
                .as_ref()
                .map(|c| c.remote.provider_name().to_string()),
            sync: self.cloud.as_ref().map(|c| c.engine.state()),
        }
    }
}

async fn connect(target: &RemoteTarget) -> Result<Arc<dyn RemoteStore>> {
    match target {
        RemoteTarget::Folder(dir) => {
            info!("Using folder remote at {:?}", dir);
            Ok(Arc::new(FolderRemote::new(dir)))
        }
        RemoteTarget::Http { config, token } => {
            info!("Using HTTP remote at {}", config.base_url);
            let remote = HttpRemote::new(config.clone())?;
            remote.set_token(token.clone()).await;
            Ok(Arc::new(remote))
        }
    }
}
