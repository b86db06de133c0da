//! Collection file I/O
//!
//! A collection lives in `{root}/{database}/{collection}/{collection}.json` as a JSON array of
//! documents. Writes go to a temporary file in the same directory which is flushed and then
//! renamed over the previous version, so readers see either the old or the new array.

use crate::config::StorageSettings;
use crate::document::Document;
use crate::error::{Result, StoreError};
use crate::storage::lock::FileLock;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Extension of collection files
pub const COLLECTION_EXT: &str = "json";

/// Suffix of in-flight temporary files
pub const TEMP_SUFFIX: &str = ".tmp";

/// Serialize documents the way collection files are stored
pub fn encode_documents(path: &Path, docs: &[Document], pretty: bool) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let encoded = if pretty {
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        docs.serialize(&mut ser)
    } else {
        serde_json::to_writer(&mut buf, docs)
    };
    encoded.map_err(|e| StoreError::corrupt(path, e))?;
    Ok(buf)
}

/// Parse a collection file body; an empty file is an empty collection
pub fn decode_documents(path: &Path, bytes: &[u8]) -> Result<Vec<Document>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(bytes).map_err(|e| StoreError::corrupt(path, e))
}

/// Replace `path` with `contents` through a temporary file in the same directory
pub fn write_atomic(path: &Path, contents: &[u8], fsync: bool) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Config(format!("{} has no parent directory", path.display())))?;
    let prefix = format!(
        ".{}.",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    );

    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)
        .map_err(|e| StoreError::storage(dir, e))?;
    tmp.write_all(contents)
        .map_err(|e| StoreError::storage(tmp.path(), e))?;
    if fsync {
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::storage(tmp.path(), e))?;
    }
    tmp.persist(path)
        .map_err(|e| StoreError::storage(path, e.error))?;
    Ok(())
}

/// True for lock sidecars and in-flight temporary files
pub fn is_sidecar(name: &str) -> bool {
    name.ends_with(crate::storage::lock::LOCK_SUFFIX)
        || (name.starts_with('.') && name.ends_with(TEMP_SUFFIX))
}

/// Backing file of one collection
#[derive(Debug, Clone)]
pub struct CollectionFile {
    path: PathBuf,
    pretty: bool,
    fsync: bool,
}

impl CollectionFile {
    /// File for `collection` inside `database_dir`
    pub fn new(database_dir: &Path, collection: &str, settings: &StorageSettings) -> Self {
        let path = database_dir
            .join(collection)
            .join(format!("{}.{}", collection, COLLECTION_EXT));
        Self {
            path,
            pretty: settings.pretty_print,
            fsync: settings.fsync,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the file and its sidecars
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Create the directory and an empty `[]` file if missing
    pub fn ensure(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        std::fs::create_dir_all(self.dir()).map_err(|e| StoreError::storage(self.dir(), e))?;
        let _lock = FileLock::exclusive(&self.path)?;
        if !self.path.exists() {
            self.write_unlocked(&[])?;
        }
        Ok(())
    }

    /// Read under a shared lock
    pub fn load(&self) -> Result<Vec<Document>> {
        self.ensure()?;
        let _lock = FileLock::shared(&self.path)?;
        self.read_unlocked()
    }

    /// Read without taking the lock; the caller holds it
    pub fn read_unlocked(&self) -> Result<Vec<Document>> {
        let bytes = std::fs::read(&self.path).map_err(|e| StoreError::storage(&self.path, e))?;
        decode_documents(&self.path, &bytes)
    }

    /// Atomically replace the file; the caller holds the exclusive lock
    pub fn write_unlocked(&self, docs: &[Document]) -> Result<()> {
        let bytes = encode_documents(&self.path, docs, self.pretty)?;
        write_atomic(&self.path, &bytes, self.fsync)
    }

    /// Take the exclusive lock used by read-modify-write cycles
    pub fn lock_exclusive(&self) -> Result<FileLock> {
        self.ensure()?;
        FileLock::exclusive(&self.path)
    }
}
