//! Configuration module for storage backend selection and log encoding
//!
//! This module provides configuration structures and enums for selecting
//! between the storage backends (SQLite, filesystem, ephemeral memory) and
//! for the options that change how log items are encoded.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default location of the disk-resident backing store
pub const DEFAULT_DATABASE_PATH: &str = "/var/keep/keep.db";

/// Enumeration of supported storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite database file
    Sqlite,
    /// One directory per domain, one file per key
    Filesystem,
    /// In-process memory, lost on exit
    Ephemeral,
}

impl StorageBackend {
    /// Registry name of the plugin implementing this backend
    pub fn plugin_name(self) -> &'static str {
        match self {
            StorageBackend::Sqlite => "sqlite",
            StorageBackend::Filesystem => "filesystem",
            StorageBackend::Ephemeral => "ephemeral",
        }
    }
}

/// Configuration structure for storage backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// The storage backend to use
    pub backend: StorageBackend,
    /// Location of the disk-resident backing store
    pub database_path: PathBuf,
    /// Keep the backing store in memory
    pub in_memory: bool,
    /// Disable persistent storage and force the ephemeral backend
    pub disable_database: bool,
    /// Fail health checks when the backend opens read-only
    pub require_write: bool,
}

impl StorageConfig {
    /// Default configuration: SQLite at [`DEFAULT_DATABASE_PATH`]
    pub fn default_sqlite() -> Self {
        StorageConfig {
            backend: StorageBackend::Sqlite,
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            in_memory: false,
            disable_database: false,
            require_write: false,
        }
    }

    /// Configuration for a disk-resident backend at the given path
    pub fn with_path<P: Into<PathBuf>>(backend: StorageBackend, path: P) -> Self {
        StorageConfig {
            backend,
            database_path: path.into(),
            ..Self::default_sqlite()
        }
    }

    /// Configuration that never touches the disk
    pub fn ephemeral() -> Self {
        StorageConfig {
            backend: StorageBackend::Ephemeral,
            ..Self::default_sqlite()
        }
    }

    /// Load a configuration document, filling absent fields with defaults
    pub fn from_json_str(text: &str) -> crate::Result<Self> {
        let config: StorageConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Name of the plugin that should become active
    ///
    /// Disabling the database forces the ephemeral plugin regardless of the
    /// configured backend. The filesystem backend has no in-memory mode, so
    /// `in_memory` also selects the ephemeral plugin there.
    pub fn active_plugin_name(&self) -> &'static str {
        if self.disable_database {
            return StorageBackend::Ephemeral.plugin_name();
        }
        match self.backend {
            StorageBackend::Filesystem if self.in_memory => StorageBackend::Ephemeral.plugin_name(),
            backend => backend.plugin_name(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        let needs_path = !self.disable_database
            && !self.in_memory
            && self.backend != StorageBackend::Ephemeral;
        if needs_path && self.database_path.as_os_str().is_empty() {
            return Err(crate::KeepError::validation(format!(
                "{} backend requires a database path",
                self.backend.plugin_name()
            )));
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::default_sqlite()
    }
}

/// Options controlling the shape of logged result documents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Merge decorations into the top level instead of nesting them
    pub decorations_top_level: bool,
}
