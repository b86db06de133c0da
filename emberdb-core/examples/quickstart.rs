//! Example walking through an EmberDB store
//!
//! This example shows how to:
//! - Open a store and initialize logging
//! - Insert, query and update documents
//! - Run an aggregation pipeline
//! - Back up a database and restore it under a new name

use emberdb_core::{
    init_logging, ArchiveFormat, EmberDb, LoggingConfig, Recovery, SortOrder, StoreConfig,
};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&LoggingConfig::default())?;

    let root = std::env::temp_dir().join("emberdb-quickstart");
    let mut config = StoreConfig::with_root(root.join("data"));
    config.storage.backup_dir = root.join("backups");
    let store = EmberDb::open(config)?;

    let orders = store.database("shop")?.collection("orders")?;
    orders.insert_many(
        vec![
            json!({"item": "pen", "qty": 3, "status": "open"}),
            json!({"item": "ink", "qty": 1, "status": "open"}),
            json!({"item": "pad", "qty": 7, "status": "closed"}),
        ],
        false,
    )?;

    let open = orders
        .find()
        .filter(json!({"status": "open"}))
        .sort("qty", SortOrder::Descending)
        .execute()?;
    println!("Open orders: {}", serde_json::to_string_pretty(&open)?);

    orders.update_many(&json!({"status": "open"}), &json!({"$inc": {"qty": 1}}))?;

    let by_status = orders.aggregation(&json!([{"$group": {"_id": "status"}}]))?;
    println!("Grouped: {}", by_status.into_value());

    let recovery = Recovery::new(&store);
    let info = recovery.backup("shop", None, ArchiveFormat::Compressed)?;
    println!("Backup written to {}", info.path.display());
    recovery.restore_as(&info.path, ArchiveFormat::Compressed, "shop_copy")?;
    println!("Databases: {:?}", store.list_databases()?);

    Ok(())
}
