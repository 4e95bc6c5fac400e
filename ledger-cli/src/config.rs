//! TOML configuration file and resolved runtime settings.
//!
//! ```toml
//! [sync]
//! conflict_resolution = "smart-merge"
//! backup_debounce_secs = 30
//!
//! [remote]
//! folder = "/Volumes/Drive/PocketLedger"
//! # or
//! [remote.http]
//! base_url = "https://ledger.example.com/api"
//! ```

use anyhow::{bail, Context, Result};
use ledger_sync::cloud::HttpRemoteConfig;
use ledger_sync::SyncConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Contents of the configuration file. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub sync: SyncConfig,
    pub remote: RemoteConfig,
    /// Overrides the default data directory.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Mounted drive folder used as the remote store.
    pub folder: Option<PathBuf>,
    /// REST remote.
    pub http: Option<HttpRemoteConfig>,
}

impl FileConfig {
    /// Reads `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::parse(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// The remote store a node talks to.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteTarget {
    Folder(PathBuf),
    Http {
        config: HttpRemoteConfig,
        token: Option<String>,
    },
}

/// Fully resolved settings: file values overridden by command line flags.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub remote: Option<RemoteTarget>,
    pub sync: SyncConfig,
}

impl Settings {
    /// Merges the file with flag overrides and validates the result.
    pub fn resolve(
        file: FileConfig,
        data_dir: Option<PathBuf>,
        remote_dir: Option<PathBuf>,
        remote_url: Option<String>,
        token: Option<String>,
    ) -> Result<Self> {
        let data_dir = match data_dir.or(file.data_dir) {
            Some(dir) => dir,
            None => default_data_dir()?,
        };

        let remote = match (remote_dir, remote_url) {
            (Some(_), Some(_)) => bail!("--remote-dir and --remote-url are mutually exclusive"),
            (Some(dir), None) => Some(RemoteTarget::Folder(dir)),
            (None, Some(url)) => Some(RemoteTarget::Http {
                config: HttpRemoteConfig {
                    base_url: url,
                    ..file.remote.http.clone().unwrap_or_default()
                },
                token,
            }),
            (None, None) => match (file.remote.folder, file.remote.http) {
                (Some(_), Some(_)) => {
                    bail!("config file sets both remote.folder and remote.http")
                }
                (Some(dir), None) => Some(RemoteTarget::Folder(dir)),
                (None, Some(config)) => Some(RemoteTarget::Http { config, token }),
                (None, None) => None,
            },
        };

        file.sync
            .validate()
            .context("Invalid [sync] configuration")?;

        Ok(Self {
            data_dir,
            remote,
            sync: file.sync,
        })
    }

    pub fn key_path(&self) -> PathBuf {
        self.data_dir.join("installation-key.json")
    }

    pub fn device_id_path(&self) -> PathBuf {
        self.data_dir.join("device-id")
    }

    pub fn fast_sync_path(&self) -> PathBuf {
        self.data_dir.join("fast-sync.json")
    }

    pub fn documents_dir(&self) -> PathBuf {
        self.data_dir.join("documents")
    }
}

fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("pocket-ledger"))
        .context("No platform data directory; pass --data-dir")
}

/// Default location of the configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pocket-ledger").join("config.toml"))
}
