use anyhow::{Context, Result};
use clap::Subcommand;
use emberdb_core::StoreConfig;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write the default configuration to the configuration file path
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Validate configuration
    Validate,
    /// Show current configuration file path
    Path,
}

pub fn execute_config_command(config: &StoreConfig, path: &Path, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            println!("{}", toml::to_string_pretty(config).context("encoding configuration")?);
        }

        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists; pass --force to overwrite", path.display());
            }
            StoreConfig::default().save(path)?;
            println!("✓ Wrote default configuration to {}", path.display());
        }

        ConfigCommands::Validate => {
            config.validate()?;
            println!("✓ Configuration is valid");
        }

        ConfigCommands::Path => {
            println!("{}", path.display());
        }
    }

    Ok(())
}
