//! File-backed storage layer for EmberDB
//!
//! Each collection is one JSON array file guarded by an advisory lock sidecar. The
//! operations in [`engine`] work on the loaded array; [`Collection`] and [`AsyncCollection`]
//! wrap them in locked read-modify-write cycles.

pub mod async_collection;
pub mod bulk;
pub mod collection;
pub mod database;
pub mod engine;
pub mod file;
pub mod lock;

pub use async_collection::AsyncCollection;
pub use bulk::{BulkOperation, BulkWriteResult};
pub use collection::Collection;
pub use database::{validate_name, Database, EmberDb};
pub use engine::{ImportMode, InsertOutcome};
pub use file::CollectionFile;
pub use lock::FileLock;
