//! Backup and restore for EmberDB
//!
//! Works on the file tree of one database directory, independent of the collection handles:
//! - Zstandard compressed tar archives (`.tar.zst`)
//! - Plain tar archives (`.tar`)
//! - JSON manifests embedding every file as text (`.json`)
//!
//! Archive entries are paths relative to the database directory. Lock sidecars and
//! in-flight temporary files are never archived.

use crate::error::{Result, StoreError};
use crate::storage::database::validate_name;
use crate::storage::file::{is_sidecar, write_atomic};
use crate::storage::EmberDb;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::info;

const ZSTD_LEVEL: i32 = 3;

/// Archive format of a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// Zstandard compressed tar archive
    #[default]
    Compressed,
    /// Uncompressed tar archive
    Tar,
    /// Self-describing JSON manifest
    Json,
}

impl ArchiveFormat {
    /// File name suffix, without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Compressed => "tar.zst",
            Self::Tar => "tar",
            Self::Json => "json",
        }
    }

    /// Format implied by a file name, if any
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        [Self::Compressed, Self::Tar, Self::Json]
            .into_iter()
            .find(|format| name.ends_with(&format!(".{}", format.extension())))
    }

    fn stem(&self, path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        name.strip_suffix(&format!(".{}", self.extension()))
            .map(str::to_string)
    }
}

impl std::str::FromStr for ArchiveFormat {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "compressed" | "zst" | "tar.zst" => Ok(Self::Compressed),
            "tar" => Ok(Self::Tar),
            "json" => Ok(Self::Json),
            other => Err(StoreError::Archive(format!("unsupported backup format: {}", other))),
        }
    }
}

/// Backup metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Database the archive holds
    pub database: String,
    pub format: ArchiveFormat,
    /// Archive file path
    pub path: PathBuf,
    /// Archive size in bytes
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    /// Number of files in the archive, when known
    pub files: Option<usize>,
}

/// Relative path and contents of one database file
type TreeEntry = (PathBuf, Vec<u8>);

/// Backup manager for the databases of one store
#[derive(Debug, Clone)]
pub struct Recovery {
    root: PathBuf,
    backup_dir: PathBuf,
    fsync: bool,
}

impl Recovery {
    pub fn new(store: &EmberDb) -> Self {
        let storage = &store.config().storage;
        Self {
            root: storage.root_dir.clone(),
            backup_dir: storage.backup_dir.clone(),
            fsync: storage.fsync,
        }
    }

    /// Archive `database` into `{dest_dir}/{database}.{ext}`
    ///
    /// `dest_dir` defaults to the configured backup directory.
    pub fn backup(&self, database: &str, dest_dir: Option<&Path>, format: ArchiveFormat) -> Result<BackupInfo> {
        validate_name(database)?;
        let source = self.root.join(database);
        if !source.is_dir() {
            return Err(StoreError::DatabaseNotFound(database.to_string()));
        }

        let dest_dir = dest_dir.unwrap_or(self.backup_dir.as_path());
        std::fs::create_dir_all(dest_dir).map_err(|e| StoreError::storage(dest_dir, e))?;
        let path = dest_dir.join(format!("{}.{}", database, format.extension()));

        let tree = read_tree(&source)?;
        let bytes = match format {
            ArchiveFormat::Compressed => {
                let tar = encode_tar(&tree)?;
                zstd::encode_all(&tar[..], ZSTD_LEVEL).map_err(|e| StoreError::storage(&path, e))?
            }
            ArchiveFormat::Tar => encode_tar(&tree)?,
            ArchiveFormat::Json => encode_manifest(database, &tree)?,
        };
        write_atomic(&path, &bytes, self.fsync)?;

        info!(
            database,
            format = format.extension(),
            files = tree.len(),
            "Backup written to {}",
            path.display()
        );
        Ok(BackupInfo {
            database: database.to_string(),
            format,
            path,
            size_bytes: bytes.len() as u64,
            created_at: Utc::now(),
            files: Some(tree.len()),
        })
    }

    /// Restore an archive under the store root; returns the restored database name
    ///
    /// Manifests carry their database name; tar archives are named after the archive file.
    pub fn restore(&self, archive: &Path, format: ArchiveFormat) -> Result<String> {
        let (name, tree) = self.read_archive(archive, format)?;
        let name = name.ok_or_else(|| {
            StoreError::Archive(format!(
                "cannot derive a database name from {}",
                archive.display()
            ))
        })?;
        self.write_tree(&name, tree)?;
        Ok(name)
    }

    /// Restore an archive as `database`, whatever name it was taken from
    pub fn restore_as(&self, archive: &Path, format: ArchiveFormat, database: &str) -> Result<String> {
        let (_, tree) = self.read_archive(archive, format)?;
        self.write_tree(database, tree)?;
        Ok(database.to_string())
    }

    /// Archives in `dir` (default: the configured backup directory), newest first
    pub fn list_backups(&self, dir: Option<&Path>) -> Result<Vec<BackupInfo>> {
        let dir = dir.unwrap_or(self.backup_dir.as_path());
        let mut backups = Vec::new();
        if !dir.exists() {
            return Ok(backups);
        }

        for entry in std::fs::read_dir(dir).map_err(|e| StoreError::storage(dir, e))? {
            let entry = entry.map_err(|e| StoreError::storage(dir, e))?;
            let path = entry.path();
            let Some(format) = ArchiveFormat::detect(&path) else {
                continue;
            };
            let Some(database) = format.stem(&path) else {
                continue;
            };
            let metadata = entry.metadata().map_err(|e| StoreError::storage(&path, e))?;
            if !metadata.is_file() {
                continue;
            }
            backups.push(BackupInfo {
                database,
                format,
                path,
                size_bytes: metadata.len(),
                created_at: metadata
                    .modified()
                    .map(DateTime::from)
                    .unwrap_or_else(|_| Utc::now()),
                files: None,
            });
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    fn read_archive(&self, archive: &Path, format: ArchiveFormat) -> Result<(Option<String>, Vec<TreeEntry>)> {
        let bytes = std::fs::read(archive).map_err(|e| StoreError::storage(archive, e))?;
        match format {
            ArchiveFormat::Compressed => {
                let tar = zstd::decode_all(&bytes[..]).map_err(|e| StoreError::storage(archive, e))?;
                Ok((format.stem(archive), decode_tar(archive, &tar)?))
            }
            ArchiveFormat::Tar => Ok((format.stem(archive), decode_tar(archive, &bytes)?)),
            ArchiveFormat::Json => {
                let (name, tree) = decode_manifest(archive, &bytes)?;
                Ok((Some(name), tree))
            }
        }
    }

    fn write_tree(&self, database: &str, tree: Vec<TreeEntry>) -> Result<()> {
        validate_name(database)?;
        let target = self.root.join(database);
        std::fs::create_dir_all(&target).map_err(|e| StoreError::storage(&target, e))?;

        let files = tree.len();
        for (relative, contents) in tree {
            let path = target.join(&relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::storage(parent, e))?;
            }
            write_atomic(&path, &contents, self.fsync)?;
        }
        info!(database, files, "Database restored to {}", target.display());
        Ok(())
    }
}

/// Every regular file under `dir` except sidecars, sorted by path
fn read_tree(dir: &Path) -> Result<Vec<TreeEntry>> {
    let mut tree = Vec::new();
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| StoreError::Archive(e.to_string()))?;
        if !entry.file_type().is_file() || is_sidecar(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| StoreError::Archive(e.to_string()))?
            .to_path_buf();
        let contents = std::fs::read(entry.path()).map_err(|e| StoreError::storage(entry.path(), e))?;
        tree.push((relative, contents));
    }
    Ok(tree)
}

/// Reject absolute paths and paths that climb out of the restore target
fn checked_relative(path: &Path) -> Result<PathBuf> {
    let safe = path.components().count() > 0
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(StoreError::Archive(format!(
            "archive entry escapes the database directory: {}",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}

/// Manifest keys always use `/` separators
fn manifest_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn encode_tar(tree: &[TreeEntry]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for (relative, contents) in tree {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_entry_type(tar::EntryType::Regular);
        builder
            .append_data(&mut header, relative, &contents[..])
            .map_err(|e| StoreError::Archive(format!("{}: {}", relative.display(), e)))?;
    }
    builder
        .into_inner()
        .map_err(|e| StoreError::Archive(e.to_string()))
}

fn decode_tar(archive: &Path, bytes: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut reader = tar::Archive::new(bytes);
    let mut tree = Vec::new();
    let entries = reader.entries().map_err(|e| StoreError::storage(archive, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| StoreError::storage(archive, e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let relative = checked_relative(&entry.path().map_err(|e| StoreError::storage(archive, e))?)?;
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| StoreError::storage(archive, e))?;
        tree.push((relative, contents));
    }
    Ok(tree)
}

fn encode_manifest(database: &str, tree: &[TreeEntry]) -> Result<Vec<u8>> {
    let mut files = Map::new();
    for (relative, contents) in tree {
        let text = String::from_utf8(contents.clone()).map_err(|_| {
            StoreError::Archive(format!("{} is not valid UTF-8", relative.display()))
        })?;
        files.insert(manifest_key(relative), Value::String(text));
    }
    let mut manifest = Map::new();
    manifest.insert("database".to_string(), Value::from(database));
    manifest.insert("files".to_string(), Value::Object(files));

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    serde::Serialize::serialize(&manifest, &mut ser)
        .map_err(|e| StoreError::Archive(format!("failed to encode manifest: {}", e)))?;
    Ok(buf)
}

fn decode_manifest(archive: &Path, bytes: &[u8]) -> Result<(String, Vec<TreeEntry>)> {
    let manifest: Value = serde_json::from_slice(bytes).map_err(|e| StoreError::corrupt(archive, e))?;
    let database = manifest
        .get("database")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::Archive("manifest has no 'database' name".to_string()))?;
    let files = manifest
        .get("files")
        .and_then(Value::as_object)
        .ok_or_else(|| StoreError::Archive("manifest has no 'files' mapping".to_string()))?;

    let mut tree = Vec::with_capacity(files.len());
    for (key, contents) in files {
        let text = contents
            .as_str()
            .ok_or_else(|| StoreError::Archive(format!("manifest entry {} is not text", key)))?;
        tree.push((checked_relative(Path::new(key))?, text.as_bytes().to_vec()));
    }
    Ok((database.to_string(), tree))
}
