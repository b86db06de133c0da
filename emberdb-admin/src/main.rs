use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use emberdb_core::{init_logging, EmberDb, StoreConfig};
use std::path::{Path, PathBuf};
use tracing::{error, info};

mod commands;

use commands::*;

#[derive(Parser)]
#[command(name = "emberdb-admin")]
#[command(about = "EmberDB Administration CLI Tool")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "emberdb.toml")]
    config: PathBuf,

    /// Store root directory, overrides the configuration file
    #[arg(short, long, env = "EMBERDB_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database management commands
    Database {
        #[command(subcommand)]
        action: DatabaseCommands,
    },
    /// Collection management, queries and import/export
    Collection {
        #[command(subcommand)]
        action: CollectionCommands,
    },
    /// Backup and restore commands
    Backup {
        #[command(subcommand)]
        action: BackupCommands,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

fn load_config(path: &Path, data_dir: Option<PathBuf>, verbose: bool) -> Result<StoreConfig> {
    let mut config = if path.exists() {
        StoreConfig::load(path).with_context(|| format!("loading {}", path.display()))?
    } else {
        StoreConfig::default()
    };
    if let Some(root) = data_dir {
        config.storage.root_dir = root;
    }
    if verbose {
        config.logging.level = "DEBUG".to_string();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config, cli.data_dir, cli.verbose)?;
    init_logging(&config.logging)?;

    info!("EmberDB Admin CLI v{} starting", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Config { action } => execute_config_command(&config, &cli.config, action),
        command => {
            let store = EmberDb::open(config)?;
            match command {
                Commands::Database { action } => execute_database_command(&store, action),
                Commands::Collection { action } => execute_collection_command(&store, action).await,
                Commands::Backup { action } => execute_backup_command(&store, action),
                Commands::Config { .. } => Ok(()),
            }
        }
    };

    match result {
        Ok(_) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            Err(e)
        }
    }
}
