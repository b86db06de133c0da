//! Store and database handles
//!
//! [`EmberDb`] owns the root directory, the configuration and the registry of
//! per-collection mutexes. Every handle for the same collection file shares one mutex, so
//! writers inside the process queue up before they contend for the file lock.

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::monitoring::logging::SlowOperationLog;
use crate::storage::async_collection::AsyncCollection;
use crate::storage::collection::{Collection, CollectionCore};
use crate::storage::file::CollectionFile;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reject names that are empty or would leave their parent directory
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.starts_with('.');
    if invalid {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Names of the sub-directories of `dir`, sorted
fn list_dirs(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| StoreError::storage(dir, e))? {
        let entry = entry.map_err(|e| StoreError::storage(dir, e))?;
        let is_dir = entry
            .file_type()
            .map_err(|e| StoreError::storage(entry.path(), e))?
            .is_dir();
        if is_dir {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

struct StoreInner {
    config: StoreConfig,
    locks: DashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>,
    slow_log: Arc<SlowOperationLog>,
}

impl StoreInner {
    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn forget_locks(&self, under: &Path) {
        self.locks.retain(|path, _| !path.starts_with(under));
    }
}

/// Handle on a store root directory
#[derive(Clone)]
pub struct EmberDb {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for EmberDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmberDb")
            .field("root", &self.inner.config.storage.root_dir)
            .finish()
    }
}

impl EmberDb {
    /// Open the store, creating the root directory if needed
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let root = &config.storage.root_dir;
        std::fs::create_dir_all(root).map_err(|e| StoreError::storage(root, e))?;
        info!("Opened EmberDB store at {}", root.display());

        let slow_log = Arc::new(SlowOperationLog::from_config(&config.logging));
        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                locks: DashMap::new(),
                slow_log,
            }),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn root(&self) -> &Path {
        &self.inner.config.storage.root_dir
    }

    /// Operations that exceeded the slow-operation threshold
    pub fn slow_operations(&self) -> &SlowOperationLog {
        &self.inner.slow_log
    }

    /// Handle on a database; nothing is created until it is used
    pub fn database(&self, name: &str) -> Result<Database> {
        validate_name(name)?;
        Ok(Database {
            name: name.to_string(),
            path: self.root().join(name),
            inner: self.inner.clone(),
        })
    }

    pub fn list_databases(&self) -> Result<Vec<String>> {
        list_dirs(self.root())
    }

    pub fn database_exists(&self, name: &str) -> Result<bool> {
        Ok(self.database(name)?.exists())
    }

    pub fn create_database(&self, name: &str) -> Result<Database> {
        let db = self.database(name)?;
        db.create()?;
        Ok(db)
    }

    pub fn drop_database(&self, name: &str) -> Result<()> {
        self.database(name)?.remove()
    }

    pub fn rename_database(&self, name: &str, new_name: &str) -> Result<Database> {
        self.database(name)?.rename(new_name)
    }
}

/// Handle on one database directory
#[derive(Clone)]
pub struct Database {
    name: String,
    path: PathBuf,
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    fn require(&self) -> Result<()> {
        if self.exists() {
            Ok(())
        } else {
            Err(StoreError::DatabaseNotFound(self.name.clone()))
        }
    }

    /// Create the database directory; existing databases are left alone
    pub fn create(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path).map_err(|e| StoreError::storage(&self.path, e))?;
        debug!(database = %self.name, "database created");
        Ok(())
    }

    /// Remove the database and every collection in it
    pub fn remove(&self) -> Result<()> {
        self.require()?;
        std::fs::remove_dir_all(&self.path).map_err(|e| StoreError::storage(&self.path, e))?;
        self.inner.forget_locks(&self.path);
        info!(database = %self.name, "database dropped");
        Ok(())
    }

    pub fn rename(&self, new_name: &str) -> Result<Database> {
        self.require()?;
        let target = self.database_handle(new_name)?;
        if target.path.exists() {
            return Err(StoreError::AlreadyExists(new_name.to_string()));
        }
        std::fs::rename(&self.path, &target.path).map_err(|e| StoreError::storage(&self.path, e))?;
        self.inner.forget_locks(&self.path);
        info!(database = %self.name, new_name, "database renamed");
        Ok(target)
    }

    fn database_handle(&self, name: &str) -> Result<Database> {
        validate_name(name)?;
        Ok(Database {
            name: name.to_string(),
            path: self.path.with_file_name(name),
            inner: self.inner.clone(),
        })
    }

    pub fn list_collections(&self) -> Result<Vec<String>> {
        self.require()?;
        list_dirs(&self.path)
    }

    pub fn collection_exists(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        Ok(self.collection_file(name).path().is_file())
    }

    fn collection_file(&self, name: &str) -> CollectionFile {
        CollectionFile::new(&self.path, name, &self.inner.config.storage)
    }

    fn core(&self, name: &str) -> Result<CollectionCore> {
        validate_name(name)?;
        let file = self.collection_file(name);
        let lock = self.inner.lock_for(file.path());
        Ok(CollectionCore {
            database: self.name.clone(),
            name: name.to_string(),
            database_dir: self.path.clone(),
            file,
            lock,
            slow_log: self.inner.slow_log.clone(),
            settings: self.inner.config.storage.clone(),
        })
    }

    /// Blocking handle; the collection file is created on first access
    pub fn collection(&self, name: &str) -> Result<Collection> {
        let collection = Collection::new(self.core(name)?);
        collection.create()?;
        Ok(collection)
    }

    /// Async handle; the collection file is created by the first operation
    pub fn async_collection(&self, name: &str) -> Result<AsyncCollection> {
        Ok(AsyncCollection::new(self.core(name)?))
    }

    /// Create an empty collection; fails if it already exists
    pub fn create_collection(&self, name: &str) -> Result<Collection> {
        if self.collection_exists(name)? {
            return Err(StoreError::AlreadyExists(format!("{}.{}", self.name, name)));
        }
        self.collection(name)
    }

    pub fn drop_collection(&self, name: &str) -> Result<()> {
        if !self.collection_exists(name)? {
            return Err(StoreError::CollectionNotFound {
                database: self.name.clone(),
                collection: name.to_string(),
            });
        }
        let dir = self.path.join(name);
        std::fs::remove_dir_all(&dir).map_err(|e| StoreError::storage(&dir, e))?;
        self.inner.forget_locks(&dir);
        info!(database = %self.name, collection = name, "collection dropped");
        Ok(())
    }

    /// Rename a collection directory and its backing file
    pub fn rename_collection(&self, name: &str, new_name: &str) -> Result<Collection> {
        if !self.collection_exists(name)? {
            return Err(StoreError::CollectionNotFound {
                database: self.name.clone(),
                collection: name.to_string(),
            });
        }
        validate_name(new_name)?;
        let old_dir = self.path.join(name);
        let new_dir = self.path.join(new_name);
        if new_dir.exists() {
            return Err(StoreError::AlreadyExists(format!("{}.{}", self.name, new_name)));
        }

        // hold the old collection's mutex so no in-process writer is mid-cycle
        let lock = self.inner.lock_for(self.collection_file(name).path());
        let _guard = lock.blocking_lock();
        std::fs::rename(&old_dir, &new_dir).map_err(|e| StoreError::storage(&old_dir, e))?;
        let old_file = new_dir.join(format!("{}.{}", name, crate::storage::file::COLLECTION_EXT));
        let new_file = self.collection_file(new_name);
        std::fs::rename(&old_file, new_file.path()).map_err(|e| StoreError::storage(&old_file, e))?;
        let stale_lock = crate::storage::lock::FileLock::lock_path(&old_file);
        if stale_lock.exists() {
            if let Err(e) = std::fs::remove_file(&stale_lock) {
                warn!(path = %stale_lock.display(), error = %e, "failed to remove stale lock file");
            }
        }
        self.inner.forget_locks(&old_dir);
        info!(database = %self.name, collection = name, new_name, "collection renamed");
        self.collection(new_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> EmberDb {
        let mut config = StoreConfig::with_root(dir.path());
        config.storage.fsync = false;
        EmberDb::open(config).unwrap()
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("orders").is_ok());
        assert!(validate_name("order_2024").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", ".hidden"] {
            assert!(matches!(validate_name(bad), Err(StoreError::InvalidName(_))), "{}", bad);
        }
    }

    #[test]
    fn test_database_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        assert!(store.list_databases().unwrap().is_empty());

        store.create_database("b").unwrap();
        store.create_database("a").unwrap();
        assert_eq!(store.list_databases().unwrap(), vec!["a", "b"]);
        assert!(store.database_exists("a").unwrap());

        let renamed = store.rename_database("a", "c").unwrap();
        assert_eq!(renamed.name(), "c");
        assert!(!store.database_exists("a").unwrap());
        assert!(matches!(
            store.rename_database("b", "c"),
            Err(StoreError::AlreadyExists(_))
        ));

        store.drop_database("c").unwrap();
        assert_eq!(store.list_databases().unwrap(), vec!["b"]);
        assert!(matches!(
            store.drop_database("c"),
            Err(StoreError::DatabaseNotFound(_))
        ));

        store.database("b").unwrap().remove().unwrap();
        assert!(store.list_databases().unwrap().is_empty());
    }

    #[test]
    fn test_collection_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let db = store.database("shop").unwrap();
        assert!(matches!(db.list_collections(), Err(StoreError::DatabaseNotFound(_))));

        let orders = db.collection("orders").unwrap();
        assert_eq!(std::fs::read_to_string(orders.path()).unwrap(), "[]");
        assert!(db.collection_exists("orders").unwrap());
        assert!(matches!(
            db.create_collection("orders"),
            Err(StoreError::AlreadyExists(_))
        ));

        orders.insert_one(json!({"item": "pen"}), false).unwrap();
        let archived = db.rename_collection("orders", "archive").unwrap();
        assert_eq!(archived.path(), dir.path().join("shop/archive/archive.json"));
        assert!(!dir.path().join("shop/archive/orders.json.lock").exists());
        assert_eq!(archived.count_documents(&json!({})).unwrap(), 1);
        assert_eq!(db.list_collections().unwrap(), vec!["archive"]);

        db.drop_collection("archive").unwrap();
        assert!(db.list_collections().unwrap().is_empty());
        assert!(db.drop_collection("archive").unwrap_err().is_not_found());
    }
}
