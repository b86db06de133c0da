//! Error types for EmberDB
//!
//! Every fallible operation in the crate returns [`StoreError`]. Low-level I/O and JSON
//! failures are wrapped together with the path they happened on, so the original cause
//! stays reachable through [`std::error::Error::source`].

use std::path::PathBuf;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, StoreError>;

/// Coarse classification of a [`StoreError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing database, collection or file
    NotFound,
    /// Unknown operator, update without operators, bad stage syntax
    MalformedExpression,
    /// Unreadable, unwritable or corrupt backing file
    Storage,
    /// Operands that cannot be compared or combined
    TypeMismatch,
    /// Caller misuse: wrong pipeline shape, existing target, bad configuration
    Usage,
}

/// Errors raised by the document store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database '{0}' does not exist")]
    DatabaseNotFound(String),

    #[error("Collection '{collection}' does not exist in database '{database}'")]
    CollectionNotFound { database: String, collection: String },

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Malformed expression: {0}")]
    MalformedExpression(String),

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Invalid name '{0}'")]
    InvalidName(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Stage '{stage}' expects {expected} input, got {actual}")]
    ShapeMismatch {
        stage: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt data in {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Blocking I/O task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StoreError {
    /// Wrap an I/O error with the path it occurred on
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::FileNotFound(path.into());
        }
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Wrap a JSON error with the path of the file being decoded or encoded
    pub fn corrupt(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Corrupt {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedExpression(msg.into())
    }

    pub(crate) fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::TypeMismatch(msg.into())
    }

    /// Which part of the error taxonomy this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DatabaseNotFound(_) | Self::CollectionNotFound { .. } | Self::FileNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::UnknownOperator(_)
            | Self::MalformedExpression(_)
            | Self::InvalidPipeline(_)
            | Self::InvalidName(_) => ErrorKind::MalformedExpression,
            Self::Storage { .. } | Self::Corrupt { .. } | Self::Archive(_) | Self::Task(_) => {
                ErrorKind::Storage
            }
            Self::TypeMismatch(_) => ErrorKind::TypeMismatch,
            Self::ShapeMismatch { .. } | Self::AlreadyExists(_) | Self::Config(_) => {
                ErrorKind::Usage
            }
        }
    }

    /// True for the not-found family
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
