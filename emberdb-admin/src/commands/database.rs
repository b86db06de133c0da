use anyhow::Result;
use clap::Subcommand;
use emberdb_core::EmberDb;

#[derive(Subcommand)]
pub enum DatabaseCommands {
    /// List all databases
    List,
    /// Create a database
    Create {
        /// Database name
        name: String,
    },
    /// Drop a database and every collection in it
    Drop {
        /// Database name
        name: String,
        /// Force deletion without confirmation
        #[arg(short, long)]
        force: bool,
    },
    /// Rename a database
    Rename {
        /// Current name
        name: String,
        /// New name
        new_name: String,
    },
    /// List the collections of a database
    Collections {
        /// Database name
        name: String,
    },
}

/// Ask for a y/N confirmation on stdin
pub fn confirm(prompt: &str) -> Result<bool> {
    use std::io::Write;
    print!("{} (y/N): ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(answer.trim().to_lowercase().starts_with('y'))
}

pub fn execute_database_command(store: &EmberDb, command: DatabaseCommands) -> Result<()> {
    match command {
        DatabaseCommands::List => {
            let databases = store.list_databases()?;
            if databases.is_empty() {
                println!("No databases in {}", store.root().display());
            }
            for name in databases {
                println!("{}", name);
            }
        }

        DatabaseCommands::Create { name } => {
            let db = store.create_database(&name)?;
            println!("✓ Database '{}' created at {}", name, db.path().display());
        }

        DatabaseCommands::Drop { name, force } => {
            if !force && !confirm(&format!("Drop database '{}' and all its collections?", name))? {
                println!("Drop cancelled.");
                return Ok(());
            }
            store.drop_database(&name)?;
            println!("✓ Database '{}' dropped", name);
        }

        DatabaseCommands::Rename { name, new_name } => {
            store.rename_database(&name, &new_name)?;
            println!("✓ Database '{}' renamed to '{}'", name, new_name);
        }

        DatabaseCommands::Collections { name } => {
            for collection in store.database(&name)?.list_collections()? {
                println!("{}", collection);
            }
        }
    }

    Ok(())
}
