use anyhow::Result;
use clap::Subcommand;
use emberdb_core::{ArchiveFormat, EmberDb, Recovery};
use std::path::PathBuf;

use super::database::confirm;

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Create a backup of a database
    Create {
        /// Database name
        database: String,
        /// Output directory (defaults to the configured backup directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Archive format: compressed, tar or json
        #[arg(short, long, default_value = "compressed")]
        format: ArchiveFormat,
    },
    /// Restore a database from a backup
    Restore {
        /// Path to the backup file
        #[arg(short, long)]
        input: PathBuf,
        /// Archive format; detected from the file name when omitted
        #[arg(short, long)]
        format: Option<ArchiveFormat>,
        /// Restore under this database name
        #[arg(long = "as")]
        as_name: Option<String>,
        /// Force restore without confirmation
        #[arg(long)]
        force: bool,
    },
    /// List available backups
    List {
        /// Directory to search for backups
        #[arg(short, long)]
        directory: Option<PathBuf>,
    },
}

pub fn execute_backup_command(store: &EmberDb, command: BackupCommands) -> Result<()> {
    let recovery = Recovery::new(store);

    match command {
        BackupCommands::Create {
            database,
            output,
            format,
        } => {
            println!("Creating {} backup of '{}'...", format.extension(), database);
            let info = recovery.backup(&database, output.as_deref(), format)?;
            println!("✓ Backup created successfully");
            println!("  Files: {}", info.files.unwrap_or_default());
            println!(
                "  Size: {} bytes ({:.2} MB)",
                info.size_bytes,
                info.size_bytes as f64 / 1024.0 / 1024.0
            );
            println!("  Path: {}", info.path.display());
            println!("  Timestamp: {}", info.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }

        BackupCommands::Restore {
            input,
            format,
            as_name,
            force,
        } => {
            let format = match format.or_else(|| ArchiveFormat::detect(&input)) {
                Some(format) => format,
                None => anyhow::bail!(
                    "cannot tell the archive format of {}; pass --format",
                    input.display()
                ),
            };

            if !force
                && !confirm(&format!(
                    "Restoring {} overwrites files of the target database. Continue?",
                    input.display()
                ))?
            {
                println!("Restore cancelled.");
                return Ok(());
            }

            let restored = match as_name {
                Some(name) => recovery.restore_as(&input, format, &name)?,
                None => recovery.restore(&input, format)?,
            };
            println!("✓ Database '{}' restored from {}", restored, input.display());
        }

        BackupCommands::List { directory } => {
            let backups = recovery.list_backups(directory.as_deref())?;
            if backups.is_empty() {
                println!("No backups found");
                return Ok(());
            }
            println!("{:<20} {:<10} {:>12}  {:<20}  Path", "Database", "Format", "Bytes", "Modified");
            println!("{}", "-".repeat(90));
            for backup in backups {
                println!(
                    "{:<20} {:<10} {:>12}  {:<20}  {}",
                    backup.database,
                    backup.format.extension(),
                    backup.size_bytes,
                    backup.created_at.format("%Y-%m-%d %H:%M:%S"),
                    backup.path.display()
                );
            }
        }
    }

    Ok(())
}
