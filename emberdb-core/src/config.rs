//! Configuration management for EmberDB
//!
//! The store never reads ambient settings: a [`StoreConfig`] is built (or loaded from a
//! TOML file) by the caller and handed to [`crate::EmberDb::open`].

use crate::error::{Result, StoreError};
use crate::monitoring::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Page size used by the query builder when no limit is given
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// EmberDB configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Storage settings
    pub storage: StorageSettings,
    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Root directory holding one sub-directory per database
    pub root_dir: PathBuf,
    /// Default destination for backup archives
    pub backup_dir: PathBuf,
    /// Write collection files as 4-space indented JSON
    pub pretty_print: bool,
    /// Flush collection files to disk before they replace the previous version
    pub fsync: bool,
    /// Query builder page size when `limit` is not set
    pub default_page_size: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./data"),
            backup_dir: PathBuf::from("./backups"),
            pretty_print: true,
            fsync: true,
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl StoreConfig {
    /// Configuration rooted at `root_dir`, everything else defaulted
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.storage.root_dir = root_dir.into();
        config
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| StoreError::storage(path, e))?;
        let config: StoreConfig = toml::from_str(&content)
            .map_err(|e| StoreError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| StoreError::Config(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| StoreError::storage(path, e))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.storage.root_dir.as_os_str().is_empty() {
            return Err(StoreError::Config("storage.root_dir must not be empty".into()));
        }
        if self.storage.default_page_size == 0 {
            return Err(StoreError::Config(
                "storage.default_page_size must be greater than 0".into(),
            ));
        }
        self.logging.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.default_page_size, 10);
        assert!(config.storage.pretty_print);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let mut config = StoreConfig::default();
        config.storage.default_page_size = 0;
        assert!(matches!(config.validate(), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("emberdb.toml");

        let mut config = StoreConfig::with_root(dir.path().join("data"));
        config.storage.fsync = false;
        config.save(&path).unwrap();

        let loaded = StoreConfig::load(&path).unwrap();
        assert_eq!(loaded.storage.root_dir, dir.path().join("data"));
        assert!(!loaded.storage.fsync);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[storage]\nroot_dir = \"/srv/ember\"\n").unwrap();

        let config = StoreConfig::load(&path).unwrap();
        assert_eq!(config.storage.root_dir, PathBuf::from("/srv/ember"));
        assert_eq!(config.storage.backup_dir, PathBuf::from("./backups"));
        assert_eq!(config.logging.level, "INFO");
    }
}
