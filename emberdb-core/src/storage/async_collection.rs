//! Async collection handle
//!
//! Same operations as [`crate::storage::Collection`]. The per-collection mutex is awaited,
//! file reads and writes run on the blocking pool, and filter/update evaluation stays on the
//! calling task. The mutex guard and the file lock travel into the write task, so a dropped
//! future never leaves a half-written cycle behind.

use crate::aggregation::{AggregationResult, Pipeline};
use crate::document::{into_document, Document};
use crate::error::Result;
use crate::query::ast::{Filter, FindOptions};
use crate::query::cursor::AsyncCursor;
use crate::query::parser::QueryParser;
use crate::storage::bulk::{self, BulkWriteResult};
use crate::storage::collection::{parse_documents, read_import_file, write_export_file, CollectionCore};
use crate::storage::engine::{self, ImportMode, InsertOutcome};
use crate::storage::file::CollectionFile;
use crate::update::UpdateExpression;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::debug;

async fn load(file: CollectionFile) -> Result<Vec<Document>> {
    spawn_blocking(move || file.load()).await?
}

/// Async handle on one collection
#[derive(Debug, Clone)]
pub struct AsyncCollection {
    core: CollectionCore,
}

impl AsyncCollection {
    pub(crate) fn new(core: CollectionCore) -> Self {
        Self { core }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn database(&self) -> &str {
        &self.core.database
    }

    pub fn path(&self) -> &Path {
        self.core.file.path()
    }

    /// Create the backing file if it does not exist yet
    pub async fn create(&self) -> Result<()> {
        let file = self.core.file.clone();
        spawn_blocking(move || file.ensure()).await?
    }

    /// Read-modify-write cycle; only the file I/O leaves the calling task
    async fn transact<T>(&self, f: impl FnOnce(&mut Vec<Document>) -> Result<(T, bool)>) -> Result<T> {
        let guard = self.core.lock.clone().lock_owned().await;
        let file = self.core.file.clone();
        let (flock, mut docs) = spawn_blocking(move || {
            let flock = file.lock_exclusive()?;
            let docs = file.read_unlocked()?;
            Ok::<_, crate::error::StoreError>((flock, docs))
        })
        .await??;

        let (out, dirty) = f(&mut docs)?;
        if dirty {
            let file = self.core.file.clone();
            spawn_blocking(move || {
                let written = file.write_unlocked(&docs);
                drop(flock);
                drop(guard);
                written
            })
            .await??;
        }
        Ok(out)
    }

    pub async fn insert_one(&self, document: Value, overwrite: bool) -> Result<InsertOutcome> {
        let _timer = self.core.timer("insert_one");
        let doc = into_document(document)?;
        let outcome = self
            .transact(|docs| {
                let outcome = engine::insert(docs, doc, overwrite)?;
                let dirty = outcome.is_success();
                Ok((outcome, dirty))
            })
            .await?;
        debug!(collection = %self.core.name, ?outcome, "insert_one");
        Ok(outcome)
    }

    pub async fn insert_many(&self, documents: Vec<Value>, overwrite: bool) -> Result<Vec<InsertOutcome>> {
        let _timer = self.core.timer("insert_many");
        let parsed = parse_documents(documents)?;
        self.transact(|docs| {
            let outcomes: Vec<InsertOutcome> = parsed
                .into_iter()
                .map(|doc| engine::insert(docs, doc, overwrite))
                .collect::<Result<_>>()?;
            let dirty = outcomes.iter().any(InsertOutcome::is_success);
            Ok((outcomes, dirty))
        })
        .await
    }

    async fn update(&self, operation: &'static str, filter: &Value, update: &Value, many: bool) -> Result<usize> {
        let _timer = self.core.timer(operation);
        let filter = QueryParser::parse_filter(filter)?;
        let update = UpdateExpression::parse(update)?;
        let updated = self
            .transact(|docs| {
                let n = engine::update(docs, &filter, &update, many)?;
                Ok((n, n > 0))
            })
            .await?;
        debug!(collection = %self.core.name, updated, "{}", operation);
        Ok(updated)
    }

    pub async fn update_one(&self, filter: &Value, update: &Value) -> Result<bool> {
        Ok(self.update("update_one", filter, update, false).await? > 0)
    }

    pub async fn update_many(&self, filter: &Value, update: &Value) -> Result<usize> {
        self.update("update_many", filter, update, true).await
    }

    async fn delete(&self, operation: &'static str, filter: &Value, many: bool) -> Result<usize> {
        let _timer = self.core.timer(operation);
        let filter = QueryParser::parse_filter(filter)?;
        self.transact(|docs| {
            let n = engine::delete(docs, &filter, many)?;
            Ok((n, n > 0))
        })
        .await
    }

    pub async fn delete_one(&self, filter: &Value) -> Result<bool> {
        Ok(self.delete("delete_one", filter, false).await? > 0)
    }

    pub async fn delete_many(&self, filter: &Value) -> Result<usize> {
        self.delete("delete_many", filter, true).await
    }

    pub async fn find_one(&self, filter: &Value, options: &FindOptions) -> Result<Option<Document>> {
        let _timer = self.core.timer("find_one");
        let filter = QueryParser::parse_filter(filter)?;
        engine::find_one(load(self.core.file.clone()).await?, &filter, options)
    }

    pub async fn find_many(&self, filter: &Value, options: &FindOptions) -> Result<Vec<Document>> {
        let _timer = self.core.timer("find_many");
        let filter = QueryParser::parse_filter(filter)?;
        self.find_parsed(&filter, options).await
    }

    pub(crate) async fn find_parsed(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<Document>> {
        engine::find(load(self.core.file.clone()).await?, filter, options)
    }

    pub async fn fetch_all(&self, options: &FindOptions) -> Result<Vec<Document>> {
        let _timer = self.core.timer("fetch_all");
        self.find_parsed(&Filter::new(), options).await
    }

    /// Query builder over this collection
    pub fn find(&self) -> AsyncCursor {
        AsyncCursor::new(self.clone(), self.core.settings.default_page_size)
    }

    pub async fn count_documents(&self, filter: &Value) -> Result<usize> {
        let _timer = self.core.timer("count_documents");
        let filter = QueryParser::parse_filter(filter)?;
        engine::count(&load(self.core.file.clone()).await?, &filter)
    }

    pub async fn distinct(&self, field: &str, filter: &Value, sort: bool) -> Result<Vec<Value>> {
        let _timer = self.core.timer("distinct");
        let filter = QueryParser::parse_filter(filter)?;
        engine::distinct(&load(self.core.file.clone()).await?, field, &filter, sort)
    }

    pub async fn bulk_operation(&self, operations: &[Value]) -> Result<BulkWriteResult> {
        let _timer = self.core.timer("bulk_operation");
        let ops = bulk::parse_batch(operations)?;
        let result = self
            .transact(|docs| {
                let result = bulk::apply_batch(docs, ops)?;
                Ok((result, result.modified()))
            })
            .await?;
        debug!(collection = %self.core.name, ?result, "bulk_operation");
        Ok(result)
    }

    pub async fn import_data(&self, path: impl Into<PathBuf>, mode: ImportMode) -> Result<usize> {
        let _timer = self.core.timer("import_data");
        let path = path.into();
        let incoming = spawn_blocking(move || read_import_file(&path)).await??;
        self.transact(|docs| Ok((engine::import(docs, incoming, mode), true)))
            .await
    }

    pub async fn export_data(&self, path: impl Into<PathBuf>) -> Result<usize> {
        let _timer = self.core.timer("export_data");
        let path = path.into();
        let file = self.core.file.clone();
        let pretty = self.core.settings.pretty_print;
        spawn_blocking(move || {
            let docs = file.load()?;
            write_export_file(&path, &docs, pretty)?;
            Ok(docs.len())
        })
        .await?
    }

    pub async fn aggregation(&self, pipeline: &Value) -> Result<AggregationResult> {
        let _timer = self.core.timer("aggregation");
        let pipeline = Pipeline::parse(pipeline)?;
        let mut joined = HashMap::new();
        for (name, file) in self.core.lookup_files(&pipeline)? {
            joined.insert(name, load(file).await?);
        }
        pipeline.execute(load(self.core.file.clone()).await?, &joined)
    }
}
