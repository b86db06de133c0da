//! Collection handles for EmberDB
//!
//! [`Collection`] is the blocking facade. It shares [`CollectionCore`] with
//! [`crate::storage::AsyncCollection`]; both parse their arguments first and then run the
//! functions in [`crate::storage::engine`] inside one read-modify-write cycle guarded by the
//! per-collection mutex and the advisory file lock.

use crate::aggregation::{AggregationResult, Pipeline};
use crate::document::{into_document, Document};
use crate::error::{Result, StoreError};
use crate::monitoring::logging::{OperationTimer, SlowOperationLog};
use crate::query::ast::{Filter, FindOptions};
use crate::query::cursor::Cursor;
use crate::query::parser::QueryParser;
use crate::storage::bulk::{self, BulkWriteResult};
use crate::storage::engine::{self, ImportMode, InsertOutcome};
use crate::storage::file::{self, CollectionFile};
use crate::update::UpdateExpression;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// State shared by the blocking and async handles of one collection
#[derive(Debug, Clone)]
pub(crate) struct CollectionCore {
    pub(crate) database: String,
    pub(crate) name: String,
    pub(crate) database_dir: PathBuf,
    pub(crate) file: CollectionFile,
    pub(crate) lock: Arc<tokio::sync::Mutex<()>>,
    pub(crate) slow_log: Arc<SlowOperationLog>,
    pub(crate) settings: crate::config::StorageSettings,
}

impl CollectionCore {
    pub(crate) fn timer(&self, operation: &'static str) -> OperationTimer {
        self.slow_log.start(operation, &self.database, &self.name)
    }

    /// File handle of a sibling collection, used by `$lookup`
    pub(crate) fn sibling(&self, name: &str) -> Result<CollectionFile> {
        crate::storage::database::validate_name(name)?;
        Ok(CollectionFile::new(&self.database_dir, name, &self.settings))
    }

    /// Sibling collections a pipeline joins against
    pub(crate) fn lookup_files(&self, pipeline: &Pipeline) -> Result<Vec<(String, CollectionFile)>> {
        pipeline
            .lookup_collections()
            .into_iter()
            .map(|name| Ok((name.clone(), self.sibling(&name)?)))
            .collect()
    }

    /// Blocking read-modify-write cycle; the file is rewritten only when `f` reports a change
    pub(crate) fn transact<T>(
        &self,
        f: impl FnOnce(&mut Vec<Document>) -> Result<(T, bool)>,
    ) -> Result<T> {
        let _guard = self.lock.blocking_lock();
        let _flock = self.file.lock_exclusive()?;
        let mut docs = self.file.read_unlocked()?;
        let (out, dirty) = f(&mut docs)?;
        if dirty {
            self.file.write_unlocked(&docs)?;
        }
        Ok(out)
    }
}

/// Read a JSON file holding an array of documents (or a single document)
pub(crate) fn read_import_file(path: &Path) -> Result<Vec<Document>> {
    let bytes = std::fs::read(path).map_err(|e| StoreError::storage(path, e))?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|e| StoreError::corrupt(path, e))?;
    match value {
        Value::Array(items) => items.into_iter().map(into_document).collect(),
        Value::Object(doc) => Ok(vec![doc]),
        _ => Err(StoreError::malformed(format!(
            "{} must hold an array of documents",
            path.display()
        ))),
    }
}

/// Write documents to an external file in the collection file format
pub(crate) fn write_export_file(path: &Path, docs: &[Document], pretty: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::storage(parent, e))?;
    }
    let bytes = file::encode_documents(path, docs, pretty)?;
    file::write_atomic(path, &bytes, true)
}

pub(crate) fn parse_documents(documents: Vec<Value>) -> Result<Vec<Document>> {
    documents.into_iter().map(into_document).collect()
}

/// Blocking handle on one collection
///
/// Must not be used from inside an async runtime; use
/// [`crate::storage::AsyncCollection`] there.
#[derive(Debug, Clone)]
pub struct Collection {
    core: CollectionCore,
}

impl Collection {
    pub(crate) fn new(core: CollectionCore) -> Self {
        Self { core }
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Name of the owning database
    pub fn database(&self) -> &str {
        &self.core.database
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        self.core.file.path()
    }

    /// Create the backing file if it does not exist yet
    pub fn create(&self) -> Result<()> {
        self.core.file.ensure()
    }

    /// Insert one document
    pub fn insert_one(&self, document: Value, overwrite: bool) -> Result<InsertOutcome> {
        let _timer = self.core.timer("insert_one");
        let doc = into_document(document)?;
        let outcome = self.core.transact(|docs| {
            let outcome = engine::insert(docs, doc, overwrite)?;
            let dirty = outcome.is_success();
            Ok((outcome, dirty))
        })?;
        debug!(collection = %self.core.name, ?outcome, "insert_one");
        Ok(outcome)
    }

    /// Insert several documents in one write
    pub fn insert_many(&self, documents: Vec<Value>, overwrite: bool) -> Result<Vec<InsertOutcome>> {
        let _timer = self.core.timer("insert_many");
        let parsed = parse_documents(documents)?;
        let outcomes = self.core.transact(|docs| {
            let outcomes: Vec<InsertOutcome> = parsed
                .into_iter()
                .map(|doc| engine::insert(docs, doc, overwrite))
                .collect::<Result<_>>()?;
            let dirty = outcomes.iter().any(InsertOutcome::is_success);
            Ok((outcomes, dirty))
        })?;
        debug!(collection = %self.core.name, count = outcomes.len(), "insert_many");
        Ok(outcomes)
    }

    fn update(&self, operation: &'static str, filter: &Value, update: &Value, many: bool) -> Result<usize> {
        let _timer = self.core.timer(operation);
        let filter = QueryParser::parse_filter(filter)?;
        let update = UpdateExpression::parse(update)?;
        let updated = self.core.transact(|docs| {
            let n = engine::update(docs, &filter, &update, many)?;
            Ok((n, n > 0))
        })?;
        debug!(collection = %self.core.name, updated, "{}", operation);
        Ok(updated)
    }

    /// Update the first matching document; returns whether one was updated
    pub fn update_one(&self, filter: &Value, update: &Value) -> Result<bool> {
        Ok(self.update("update_one", filter, update, false)? > 0)
    }

    /// Update every matching document; returns how many were updated
    pub fn update_many(&self, filter: &Value, update: &Value) -> Result<usize> {
        self.update("update_many", filter, update, true)
    }

    fn delete(&self, operation: &'static str, filter: &Value, many: bool) -> Result<usize> {
        let _timer = self.core.timer(operation);
        let filter = QueryParser::parse_filter(filter)?;
        let deleted = self.core.transact(|docs| {
            let n = engine::delete(docs, &filter, many)?;
            Ok((n, n > 0))
        })?;
        debug!(collection = %self.core.name, deleted, "{}", operation);
        Ok(deleted)
    }

    /// Delete the first matching document; returns whether one was removed
    pub fn delete_one(&self, filter: &Value) -> Result<bool> {
        Ok(self.delete("delete_one", filter, false)? > 0)
    }

    /// Delete every matching document; returns how many were removed
    pub fn delete_many(&self, filter: &Value) -> Result<usize> {
        self.delete("delete_many", filter, true)
    }

    /// First matching document after sort and skip; any limit in `options` is ignored
    pub fn find_one(&self, filter: &Value, options: &FindOptions) -> Result<Option<Document>> {
        let _timer = self.core.timer("find_one");
        let filter = QueryParser::parse_filter(filter)?;
        engine::find_one(self.core.file.load()?, &filter, options)
    }

    /// Matching documents after sort, skip, limit and projection
    pub fn find_many(&self, filter: &Value, options: &FindOptions) -> Result<Vec<Document>> {
        let _timer = self.core.timer("find_many");
        let filter = QueryParser::parse_filter(filter)?;
        self.find_parsed(&filter, options)
    }

    pub(crate) fn find_parsed(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<Document>> {
        let found = engine::find(self.core.file.load()?, filter, options)?;
        debug!(collection = %self.core.name, found = found.len(), "find");
        Ok(found)
    }

    /// Every document, after sort, skip, limit and projection
    pub fn fetch_all(&self, options: &FindOptions) -> Result<Vec<Document>> {
        let _timer = self.core.timer("fetch_all");
        self.find_parsed(&Filter::new(), options)
    }

    /// Query builder over this collection
    pub fn find(&self) -> Cursor {
        Cursor::new(self.clone(), self.core.settings.default_page_size)
    }

    /// Number of matching documents
    pub fn count_documents(&self, filter: &Value) -> Result<usize> {
        let _timer = self.core.timer("count_documents");
        let filter = QueryParser::parse_filter(filter)?;
        engine::count(&self.core.file.load()?, &filter)
    }

    /// Distinct values of `field` among matching documents
    pub fn distinct(&self, field: &str, filter: &Value, sort: bool) -> Result<Vec<Value>> {
        let _timer = self.core.timer("distinct");
        let filter = QueryParser::parse_filter(filter)?;
        engine::distinct(&self.core.file.load()?, field, &filter, sort)
    }

    /// Apply a batch of insert/update/delete operations in one write
    pub fn bulk_operation(&self, operations: &[Value]) -> Result<BulkWriteResult> {
        let _timer = self.core.timer("bulk_operation");
        let ops = bulk::parse_batch(operations)?;
        let result = self.core.transact(|docs| {
            let result = bulk::apply_batch(docs, ops)?;
            Ok((result, result.modified()))
        })?;
        debug!(collection = %self.core.name, ?result, "bulk_operation");
        Ok(result)
    }

    /// Load documents from a JSON file
    pub fn import_data(&self, path: &Path, mode: ImportMode) -> Result<usize> {
        let _timer = self.core.timer("import_data");
        let incoming = read_import_file(path)?;
        let imported = self.core.transact(|docs| {
            let n = engine::import(docs, incoming, mode);
            Ok((n, true))
        })?;
        debug!(collection = %self.core.name, imported, ?mode, "import_data");
        Ok(imported)
    }

    /// Write the current documents to a JSON file
    pub fn export_data(&self, path: &Path) -> Result<usize> {
        let _timer = self.core.timer("export_data");
        let docs = self.core.file.load()?;
        write_export_file(path, &docs, self.core.settings.pretty_print)?;
        debug!(collection = %self.core.name, exported = docs.len(), "export_data");
        Ok(docs.len())
    }

    /// Run an aggregation pipeline over the collection
    pub fn aggregation(&self, pipeline: &Value) -> Result<AggregationResult> {
        let _timer = self.core.timer("aggregation");
        let pipeline = Pipeline::parse(pipeline)?;
        let mut joined = HashMap::new();
        for (name, file) in self.core.lookup_files(&pipeline)? {
            joined.insert(name, file.load()?);
        }
        pipeline.execute(self.core.file.load()?, &joined)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::StoreConfig;
    use crate::storage::EmberDb;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_unchanged_update_does_not_rewrite() {
        let dir = TempDir::new().unwrap();
        let db = EmberDb::open(StoreConfig::with_root(dir.path())).unwrap();
        let coll = db.database("shop").unwrap().collection("orders").unwrap();
        coll.insert_one(json!({"n": 1}), false).unwrap();

        let before = std::fs::read(coll.path()).unwrap();
        assert!(!coll.update_one(&json!({"n": 99}), &json!({"$set": {"n": 2}})).unwrap());
        assert_eq!(std::fs::read(coll.path()).unwrap(), before);
    }

    #[test]
    fn test_malformed_update_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let db = EmberDb::open(StoreConfig::with_root(dir.path())).unwrap();
        let coll = db.database("shop").unwrap().collection("orders").unwrap();
        coll.insert_one(json!({"n": 1}), false).unwrap();

        let before = std::fs::read(coll.path()).unwrap();
        assert!(coll.update_many(&json!({}), &json!({"n": 2})).is_err());
        assert!(coll.update_many(&json!({}), &json!({"$push": {"n": 2}})).is_err());
        assert_eq!(std::fs::read(coll.path()).unwrap(), before);
    }
}
