//! provd, the provgrid daemon.
//!
//! Single binary over the reservation store:
//! - State store (redb)
//! - Lifecycle manager
//! - Cleanup job for expired reservations
//! - Operator inspection commands
//!
//! # Usage
//!
//! ```text
//! provd --config /etc/provgrid/provd.toml run
//! provd --data-dir /tmp/provgrid noop --org-id org-7
//! provd reservations --org-id org-7 --limit 20
//! ```

mod daemon;
mod inspect;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use prov_core::{LogFormat, ProvConfig};
use provgrid_lifecycle::LifecycleManager;
use provgrid_state::StateStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "provd", about = "provgrid reservation daemon")]
struct Cli {
    /// Configuration file. Missing file means defaults.
    #[arg(long, global = true, default_value = "provd.toml")]
    config: PathBuf,

    /// Data directory for persistent state (overrides the config file).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open the store and run the cleanup job until Ctrl-C.
    Run,

    /// Print reservation statistics as JSON.
    Stats,

    /// List accounts.
    Accounts {
        #[arg(long, default_value = "50")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// List an organization's reservations, most recent first.
    Reservations {
        #[arg(long)]
        org_id: String,
        #[arg(long, default_value = "50")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show one reservation with its provider detail and instances.
    Show {
        #[arg(long)]
        org_id: String,
        id: u64,
    },

    /// Create a no-op reservation and drive it to completion.
    Noop {
        #[arg(long)]
        org_id: String,
        #[arg(long)]
        account_number: Option<String>,
    },

    /// Run one cleanup sweep.
    Cleanup,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ProvConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(data_dir) = cli.data_dir {
        config.store.data_dir = data_dir;
    }

    init_tracing(&config)?;

    let store = open_store(&config)?;
    let manager = LifecycleManager::new(store, config.operation_timeout());

    match cli.command {
        Command::Run => daemon::run(manager, &config).await,
        Command::Stats => inspect::stats(manager.store()),
        Command::Accounts { limit, offset } => inspect::accounts(manager.store(), limit, offset),
        Command::Reservations {
            org_id,
            limit,
            offset,
        } => inspect::reservations(&manager, &org_id, limit, offset).await,
        Command::Show { org_id, id } => inspect::show(&manager, &org_id, id).await,
        Command::Noop {
            org_id,
            account_number,
        } => inspect::noop(&manager, &org_id, account_number.as_deref()).await,
        Command::Cleanup => inspect::cleanup(manager, &config).await,
    }
}

/// Install the subscriber. `RUST_LOG` wins over the configured filter.
fn init_tracing(config: &ProvConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log.filter)
            .with_context(|| format!("invalid log filter {:?}", config.log.filter))?,
    };

    match config.log.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
    Ok(())
}

fn open_store(config: &ProvConfig) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(&config.store.data_dir).with_context(|| {
        format!("creating data dir {}", config.store.data_dir.display())
    })?;
    let db_path = config.db_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(store)
}
