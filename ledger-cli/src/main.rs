//! Pocket Ledger operator CLI.
//!
//! Usage:
//!   ledger --owner alice --remote-dir /mnt/drive/ledger put transactions '[...]'
//!   ledger --owner alice --remote-dir /mnt/drive/ledger sync
//!   ledger --owner alice --remote-dir /mnt/drive/ledger run
//!
//! The installation secret unlocks the local key and is read from
//! `LEDGER_SECRET` when `--secret` is not given.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ledger_cli::config::default_config_path;
use ledger_cli::{FileConfig, LedgerNode, Settings};
use ledger_crypto::KdfParams;
use ledger_sync::{ConflictResolution, ReconcileOutcome, TriggerOutcome, TriggerReason};
use ledger_types::OwnerId;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ledger")]
#[command(about = "Pocket Ledger storage, sync and backup")]
struct Args {
    /// Owner (account) id
    #[arg(short, long, env = "LEDGER_OWNER")]
    owner: String,

    /// Secret unlocking the installation key
    #[arg(long, env = "LEDGER_SECRET", hide_env_values = true)]
    secret: String,

    /// Data directory (defaults to the platform data dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mounted folder used as the remote store
    #[arg(long)]
    remote_dir: Option<PathBuf>,

    /// Base URL of the REST remote
    #[arg(long)]
    remote_url: Option<String>,

    /// Bearer token for the REST remote
    #[arg(long, env = "LEDGER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a collection; the payload is JSON or @path to a JSON file
    Put { key: String, payload: String },
    /// Print a collection
    Get { key: String },
    /// Run one sync cycle
    Sync {
        /// Override the conflict strategy for this run
        #[arg(long)]
        strategy: Option<ConflictResolution>,
    },
    /// Upload a snapshot now
    Backup,
    /// List snapshots, oldest first
    Snapshots,
    /// Delete the oldest snapshots beyond the retention limit
    Prune,
    /// Restore a named snapshot
    Restore { name: String },
    /// Catch up from the newest snapshot if it is newer than local data
    Reconcile,
    /// Show backends and sync state
    Status,
    /// Run periodic sync and debounced backups until interrupted
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    let file = match args.config.clone().or_else(default_config_path) {
        Some(path) => FileConfig::load(&path)?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(
        file,
        args.data_dir.clone(),
        args.remote_dir.clone(),
        args.remote_url.clone(),
        args.token.clone(),
    )?;
    let owner = OwnerId::new(args.owner.as_str()).context("Invalid --owner")?;
    let node = LedgerNode::open(&settings, owner, &args.secret, &KdfParams::default()).await?;

    match args.command {
        Command::Put { key, payload } => {
            let payload = read_payload(&payload)?;
            let document = node.store.save(&key, payload, &node.owner).await?;
            info!("Saved {} at {}", key, document.timestamp);
        }
        Command::Get { key } => match node.store.load(&key, &node.owner).await {
            Some(payload) => println!("{}", serde_json::to_string_pretty(&payload)?),
            None => bail!("No {key} document for {}", node.owner),
        },
        Command::Sync { strategy } => {
            let cloud = node.cloud()?;
            if let Some(strategy) = strategy {
                cloud.engine.set_conflict_resolution(strategy);
            }
            match cloud.engine.trigger(TriggerReason::Manual).await? {
                TriggerOutcome::Completed(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?)
                }
                other => warn!("Sync did not run: {:?}", other),
            }
        }
        Command::Backup => match node.cloud()?.backups.backup_now(&node.owner).await? {
            Some(snapshot) => println!("{}", snapshot.name),
            None => warn!("Nothing to back up"),
        },
        Command::Snapshots => {
            for snapshot in node.cloud()?.backups.list_backups(&node.owner).await? {
                println!("{}\t{}", snapshot.timestamp, snapshot.name);
            }
        }
        Command::Prune => {
            let deleted = node.cloud()?.backups.prune(&node.owner).await?;
            info!("Pruned {} snapshots", deleted);
        }
        Command::Restore { name } => {
            let restored = node.cloud()?.backups.restore(&node.owner, &name).await?;
            info!("Restored {} collections from {}", restored, name);
        }
        Command::Reconcile => {
            let outcome = node.cloud()?.backups.reconcile(&node.owner).await?;
            if outcome == ReconcileOutcome::UpToDate {
                info!("Local data is up to date");
            }
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&node.status().await)?);
        }
        Command::Run => run(&node).await?,
    }
    Ok(())
}

async fn run(node: &LedgerNode) -> Result<()> {
    let cloud = node.cloud()?;
    match cloud.backups.reconcile(&node.owner).await {
        Ok(outcome) => info!("Start-up reconciliation: {:?}", outcome),
        Err(e) => warn!("Start-up reconciliation failed: {}", e),
    }
    if let Err(e) = cloud.engine.trigger(TriggerReason::Manual).await {
        warn!("Initial sync failed: {}", e);
    }

    let backups = cloud.backups.spawn();
    let periodic = cloud.engine.spawn_periodic();
    info!("Running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down");
    periodic.abort();
    backups.abort();
    Ok(())
}

fn read_payload(arg: &str) -> Result<serde_json::Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload file {path}"))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).context("Payload is not valid JSON")
}
