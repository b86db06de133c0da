use anyhow::{Context, Result};
use clap::Subcommand;
use emberdb_core::query::QueryParser;
use emberdb_core::{AsyncCollection, EmberDb, FindOptions, ImportMode};
use serde_json::Value;
use std::path::PathBuf;

use super::database::confirm;

#[derive(Subcommand)]
pub enum CollectionCommands {
    /// List the collections of a database
    List {
        /// Database name
        database: String,
    },
    /// Create an empty collection
    Create {
        database: String,
        collection: String,
    },
    /// Drop a collection
    Drop {
        database: String,
        collection: String,
        /// Force deletion without confirmation
        #[arg(short, long)]
        force: bool,
    },
    /// Rename a collection
    Rename {
        database: String,
        collection: String,
        new_name: String,
    },
    /// Insert a document given as JSON
    Insert {
        database: String,
        collection: String,
        /// Document, e.g. '{"name": "ann"}'
        document: String,
        /// Replace an equal document instead of rejecting the insert
        #[arg(long)]
        overwrite: bool,
    },
    /// Find documents
    Find {
        database: String,
        collection: String,
        /// Filter as JSON
        #[arg(short, long, default_value = "{}")]
        filter: String,
        /// Projection as JSON, e.g. '["name", "age"]' or '{"secret": 0}'
        #[arg(short, long)]
        projection: Option<String>,
        /// Sort as JSON, e.g. '{"age": -1}'
        #[arg(short, long)]
        sort: Option<String>,
        #[arg(long, default_value = "0")]
        skip: usize,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Count matching documents
    Count {
        database: String,
        collection: String,
        #[arg(short, long, default_value = "{}")]
        filter: String,
    },
    /// Distinct values of a field
    Distinct {
        database: String,
        collection: String,
        field: String,
        #[arg(short, long, default_value = "{}")]
        filter: String,
        /// Sort the values
        #[arg(long)]
        sorted: bool,
    },
    /// Update matching documents
    Update {
        database: String,
        collection: String,
        /// Filter as JSON
        filter: String,
        /// Update expression, e.g. '{"$set": {"active": true}}'
        update: String,
        /// Update every match instead of the first
        #[arg(long)]
        many: bool,
    },
    /// Delete matching documents
    Delete {
        database: String,
        collection: String,
        filter: String,
        /// Delete every match instead of the first
        #[arg(long)]
        many: bool,
    },
    /// Run an aggregation pipeline
    Aggregate {
        database: String,
        collection: String,
        /// Pipeline as a JSON array of stages
        pipeline: String,
    },
    /// Apply a batch of operations read from a JSON file
    Bulk {
        database: String,
        collection: String,
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Export collection to JSON file
    Export {
        database: String,
        collection: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Import collection from JSON file
    Import {
        database: String,
        collection: String,
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
        /// Replace existing documents instead of appending
        #[arg(long)]
        replace: bool,
    },
}

fn parse_json(label: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text).with_context(|| format!("{} is not valid JSON", label))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open(store: &EmberDb, database: &str, collection: &str) -> Result<AsyncCollection> {
    Ok(store.database(database)?.async_collection(collection)?)
}

pub async fn execute_collection_command(store: &EmberDb, command: CollectionCommands) -> Result<()> {
    match command {
        CollectionCommands::List { database } => {
            for name in store.database(&database)?.list_collections()? {
                println!("{}", name);
            }
        }

        CollectionCommands::Create { database, collection } => {
            let db = store.database(&database)?;
            let created = db.create_collection(&collection)?;
            println!("✓ Collection created at {}", created.path().display());
        }

        CollectionCommands::Drop {
            database,
            collection,
            force,
        } => {
            if !force && !confirm(&format!("Drop collection '{}.{}'?", database, collection))? {
                println!("Drop cancelled.");
                return Ok(());
            }
            store.database(&database)?.drop_collection(&collection)?;
            println!("✓ Collection '{}.{}' dropped", database, collection);
        }

        CollectionCommands::Rename {
            database,
            collection,
            new_name,
        } => {
            // renaming waits on the collection mutex, which must not block a runtime thread
            let db = store.database(&database)?;
            let target = new_name.clone();
            tokio::task::spawn_blocking(move || db.rename_collection(&collection, &target))
                .await??;
            println!("✓ Collection renamed to '{}.{}'", database, new_name);
        }

        CollectionCommands::Insert {
            database,
            collection,
            document,
            overwrite,
        } => {
            let document = parse_json("document", &document)?;
            let outcome = open(store, &database, &collection)?
                .insert_one(document, overwrite)
                .await?;
            match outcome.id() {
                Some(id) => println!("✓ Stored document {}", id),
                None => println!("Document already exists; use --overwrite to replace it"),
            }
        }

        CollectionCommands::Find {
            database,
            collection,
            filter,
            projection,
            sort,
            skip,
            limit,
        } => {
            let filter = parse_json("filter", &filter)?;
            let mut options = FindOptions::new().skip(skip);
            if let Some(projection) = projection {
                options = options.projection(QueryParser::parse_projection(&parse_json("projection", &projection)?)?);
            }
            if let Some(sort) = sort {
                options = options.sort(QueryParser::parse_sort(&parse_json("sort", &sort)?)?);
            }
            if let Some(limit) = limit {
                options = options.limit(limit);
            }

            let docs = open(store, &database, &collection)?
                .find_many(&filter, &options)
                .await?;
            print_json(&Value::Array(docs.into_iter().map(Value::Object).collect()))?;
        }

        CollectionCommands::Count {
            database,
            collection,
            filter,
        } => {
            let filter = parse_json("filter", &filter)?;
            let count = open(store, &database, &collection)?
                .count_documents(&filter)
                .await?;
            println!("{}", count);
        }

        CollectionCommands::Distinct {
            database,
            collection,
            field,
            filter,
            sorted,
        } => {
            let filter = parse_json("filter", &filter)?;
            let values = open(store, &database, &collection)?
                .distinct(&field, &filter, sorted)
                .await?;
            print_json(&Value::Array(values))?;
        }

        CollectionCommands::Update {
            database,
            collection,
            filter,
            update,
            many,
        } => {
            let filter = parse_json("filter", &filter)?;
            let update = parse_json("update", &update)?;
            let coll = open(store, &database, &collection)?;
            let updated = if many {
                coll.update_many(&filter, &update).await?
            } else {
                usize::from(coll.update_one(&filter, &update).await?)
            };
            println!("✓ Updated {} documents", updated);
        }

        CollectionCommands::Delete {
            database,
            collection,
            filter,
            many,
        } => {
            let filter = parse_json("filter", &filter)?;
            let coll = open(store, &database, &collection)?;
            let deleted = if many {
                coll.delete_many(&filter).await?
            } else {
                usize::from(coll.delete_one(&filter).await?)
            };
            println!("✓ Deleted {} documents", deleted);
        }

        CollectionCommands::Aggregate {
            database,
            collection,
            pipeline,
        } => {
            let pipeline = parse_json("pipeline", &pipeline)?;
            let result = open(store, &database, &collection)?
                .aggregation(&pipeline)
                .await?;
            print_json(&result.into_value())?;
        }

        CollectionCommands::Bulk {
            database,
            collection,
            input,
        } => {
            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let operations = match parse_json("batch", &text)? {
                Value::Array(ops) => ops,
                _ => anyhow::bail!("{} must hold a JSON array of operations", input.display()),
            };
            let result = open(store, &database, &collection)?
                .bulk_operation(&operations)
                .await?;
            println!(
                "✓ Inserted {}, updated {}, deleted {}",
                result.inserted, result.updated, result.deleted
            );
        }

        CollectionCommands::Export {
            database,
            collection,
            output,
        } => {
            println!("Exporting collection '{}.{}' to '{}'...", database, collection, output.display());
            let exported = open(store, &database, &collection)?
                .export_data(output)
                .await?;
            println!("✓ Exported {} documents", exported);
        }

        CollectionCommands::Import {
            database,
            collection,
            input,
            replace,
        } => {
            if replace
                && !confirm(&format!(
                    "This will replace all existing data in '{}.{}'. Continue?",
                    database, collection
                ))?
            {
                println!("Import cancelled.");
                return Ok(());
            }

            let mode = if replace { ImportMode::Replace } else { ImportMode::Append };
            println!("Importing collection '{}.{}' from '{}'...", database, collection, input.display());
            let imported = open(store, &database, &collection)?
                .import_data(input, mode)
                .await?;
            println!("✓ Imported {} documents", imported);
        }
    }

    Ok(())
}
