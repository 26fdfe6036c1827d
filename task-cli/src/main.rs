//! # taskq
//!
//! Operator tool for relaytask's persisted task queue.
//!
//! ## Commands
//!
//! - `list`: Pending tasks in execution order
//! - `show`: One task, decoded, as JSON
//! - `verify`: Decode every record and report corrupt ones
//! - `purge`: Delete records
//!
//! ## Example
//!
//! ```bash
//! # What is still queued?
//! taskq --store tasks.db list
//!
//! # Inspect the head
//! taskq --store tasks.db show 1
//!
//! # Drop records a newer build can no longer read
//! taskq --store tasks.db verify || taskq --store tasks.db purge --corrupt
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use task_client::{Config, SqliteTaskStore};

mod commands;

use commands::{list, purge, show, verify};

const DEFAULT_CONFIG: &str = "relaytask.toml";

/// Operator tool for relaytask's persisted task queue.
#[derive(Parser, Debug)]
#[command(name = "taskq")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: relaytask.toml, if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Task store database, overrides the configured path
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List pending tasks in execution order
    List,

    /// Show one task as JSON
    Show {
        /// Queue sequence number
        seq: u64,
    },

    /// Decode every record and report corrupt ones
    Verify,

    /// Delete records (all of them unless narrowed down)
    Purge {
        /// Only the record with this sequence number
        #[arg(long, conflicts_with = "corrupt")]
        seq: Option<u64>,

        /// Only records that fail to decode
        #[arg(long)]
        corrupt: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let store_path = match cli.store {
        Some(path) => path,
        None => configured_store_path(cli.config.as_deref())?,
    };
    tracing::debug!("Opening task store {}", store_path.display());

    let store = SqliteTaskStore::new(&store_path)
        .await
        .with_context(|| format!("Failed to open task store {}", store_path.display()))?;

    match cli.command {
        Commands::List => list::run(&store).await?,
        Commands::Show { seq } => show::run(&store, seq).await?,
        Commands::Verify => verify::run(&store).await?,
        Commands::Purge { seq, corrupt } => purge::run(&store, seq, corrupt).await?,
    }

    Ok(())
}

/// Store path from the configuration file.
///
/// An explicit `--config` must exist. Without one, `relaytask.toml` in the
/// working directory is used when present, and the per-user data directory
/// otherwise.
fn configured_store_path(config: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = config {
        let config = Config::from_file(path)?;
        return Ok(config.queue.store_path);
    }

    let default = Path::new(DEFAULT_CONFIG);
    if default.exists() {
        return Ok(Config::from_file(default)?.queue.store_path);
    }

    default_store_path()
}

/// Get the default task store location for taskq.
fn default_store_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "ydun", "relaytask")
        .context("Could not determine home directory")?;
    let data_dir = dirs.data_dir();
    std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;
    Ok(data_dir.join("tasks.db"))
}
