//! EmberDB Core - embedded file-backed document store
//!
//! This crate provides the building blocks of EmberDB:
//! - JSON documents with generated identifiers
//! - Filter, update and aggregation evaluation over document arrays
//! - Collections stored as one JSON file each, with blocking and async handles
//! - Whole-database backup and restore

pub mod aggregation;
pub mod backup;
pub mod config;
pub mod document;
pub mod error;
pub mod monitoring;
pub mod query;
pub mod storage;
pub mod update;

pub use aggregation::{AggregationResult, Pipeline, PipelineStage};
pub use backup::{ArchiveFormat, BackupInfo, Recovery};
pub use config::{StorageSettings, StoreConfig};
pub use document::{generate_id, Document, ObjectId};
pub use error::{ErrorKind, Result, StoreError};
pub use monitoring::{init_logging, LoggingConfig, SlowOperation, SlowOperationLog};
pub use query::{evaluate, AsyncCursor, Cursor, Filter, FindOptions, Projection, Sort, SortOrder};
pub use storage::{
    AsyncCollection, BulkWriteResult, Collection, Database, EmberDb, ImportMode, InsertOutcome,
};
pub use update::{apply as apply_update, UpdateExpression};
