//! Storesync CLI
//!
//! Process bootstrap for the sync client.
//!
//! # Commands
//!
//! - `run` - Run the sync client until interrupted
//! - `prune` - Run one retention pass over a snapshot directory
//! - `version` - Show version information

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use storesync_backend::{LoopbackBackend, StaticCredentialSource, StoreId};
use storesync_records::seed;
use storesync_session::{ClientConfig, RetentionPruner, SyncClient};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Storesync client daemon and snapshot tools.
#[derive(Parser)]
#[command(name = "storesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync client until interrupted
    Run {
        /// Store whose records sync to this client
        #[arg(long, env = "STORESYNC_STORE_ID")]
        store_id: Uuid,

        /// Root directory for the replica and its backups
        #[arg(long, default_value = "db")]
        data_dir: PathBuf,

        /// Access token; provisioned externally
        #[arg(long, env = "STORESYNC_TOKEN", default_value = "", hide_env_values = true)]
        token: String,

        /// Open a backed-up replica instead of syncing
        #[arg(long)]
        offline: bool,

        /// Snapshot file to open in offline mode
        #[arg(long, requires = "offline")]
        restore_from: Option<PathBuf>,

        /// Hours between snapshot iterations
        #[arg(long, default_value_t = storesync_session::DEFAULT_BACKUP_FREQUENCY_HOURS)]
        backup_hours: u64,

        /// Snapshots kept after each retention pass
        #[arg(long, default_value_t = storesync_session::DEFAULT_MAX_RETAINED_SNAPSHOTS)]
        keep: usize,

        /// Treat this client as read-mostly when selecting the reset policy
        #[arg(long)]
        read_only: bool,

        /// Replace replica contents with demo data after opening
        #[arg(long)]
        seed: bool,
    },

    /// Run one retention pass over a snapshot directory
    Prune {
        /// Snapshot directory
        #[arg(long)]
        dir: PathBuf,

        /// Snapshots to keep
        #[arg(long, default_value_t = storesync_session::DEFAULT_MAX_RETAINED_SNAPSHOTS)]
        keep: usize,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            store_id,
            data_dir,
            token,
            offline,
            restore_from,
            backup_hours,
            keep,
            read_only,
            seed,
        } => {
            let mut config = ClientConfig::new(StoreId::new(store_id), data_dir)
                .with_backup_frequency_hours(backup_hours)
                .with_max_retained_snapshots(keep)
                .with_read_only(read_only);
            if offline {
                let source = restore_from.ok_or("offline mode requires --restore-from")?;
                config = config.with_offline_restore(source);
            }
            run(config, token, seed).await?;
        }
        Commands::Prune { dir, keep } => {
            let outcome = RetentionPruner::new(&dir, keep).prune();
            println!(
                "retained {} snapshot(s), deleted {}, {} failure(s)",
                outcome.retained, outcome.deleted, outcome.failed
            );
        }
        Commands::Version => {
            println!("storesync {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

async fn run(config: ClientConfig, token: String, seed: bool) -> Result<(), Box<dyn std::error::Error>> {
    let backend = Arc::new(LoopbackBackend::new());
    let credentials = Arc::new(StaticCredentialSource::new(token));
    let store_id = config.store_scope_id;
    let mut client = SyncClient::new(Arc::clone(&backend), credentials, config);

    // Startup failures are fatal; everything after this is handled and
    // logged by the event loop.
    client.start().await?;

    if seed {
        match client.replica_handle() {
            Some(handle) => {
                seed::clear_all(backend.as_ref(), &handle).await?;
                seed::seed_demo_data(backend.as_ref(), &handle, store_id).await?;
                seed::update_stock(backend.as_ref(), &handle, store_id).await?;
            }
            None => warn!("no open replica to seed"),
        }
    }

    let shutdown = client.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; shutting down");
            shutdown.request_shutdown();
        }
    });

    client.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_requires_a_store_id() {
        let result = Cli::try_parse_from(["storesync", "run"]);
        assert!(result.is_err());
    }

    #[test]
    fn restore_from_requires_offline() {
        let store_id = Uuid::new_v4().to_string();
        let result = Cli::try_parse_from([
            "storesync",
            "run",
            "--store-id",
            &store_id,
            "--restore-from",
            "backups/old.snap",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn prune_parses_with_defaults() {
        let cli = Cli::try_parse_from(["storesync", "prune", "--dir", "db/backups"]).unwrap();
        match cli.command {
            Commands::Prune { dir, keep } => {
                assert_eq!(dir, PathBuf::from("db/backups"));
                assert_eq!(keep, storesync_session::DEFAULT_MAX_RETAINED_SNAPSHOTS);
            }
            _ => panic!("expected prune"),
        }
    }
}
