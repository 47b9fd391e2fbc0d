//! Database configuration
//!
//! Loaded from YAML; every field has a default, so an empty document is a
//! valid in-memory configuration:
//!
//! ```yaml
//! storage:
//!   backend: directory
//!   path: /var/lib/blockgraph
//! index_fanout: 64
//! block_cache_capacity: 4096
//! plan_cache_capacity: 256
//! max_variable_hops: 15
//! default_isolation: snapshot
//! wal_sync: true
//! ```

use crate::graph::EngineOptions;
use crate::transaction::IsolationLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Largest accepted index fanout
pub const MAX_INDEX_FANOUT: usize = 65_536;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A field holds a value the database cannot run with
    #[error("Invalid value for '{field}': {message}")]
    Invalid { field: &'static str, message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Where blocks, the WAL and the root pointer live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Nothing survives the process
    #[default]
    Memory,
    /// One file per block under `path/blocks`
    Directory { path: PathBuf },
    /// Blocks in a RocksDB instance under `path/blocks`; needs the `rocksdb` feature
    RocksDb { path: PathBuf },
}

impl StorageConfig {
    /// Data directory of a durable backend
    pub fn path(&self) -> Option<&Path> {
        match self {
            StorageConfig::Memory => None,
            StorageConfig::Directory { path } | StorageConfig::RocksDb { path } => Some(path),
        }
    }
}

/// Top-level configuration for [`Database::open`](crate::Database::open)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub storage: StorageConfig,
    /// Buckets per index node; fixed once the database is created
    pub index_fanout: usize,
    pub block_cache_capacity: usize,
    /// Compiled plans kept; 0 disables the plan cache
    pub plan_cache_capacity: usize,
    /// Cap for open-ended variable-length patterns
    pub max_variable_hops: usize,
    pub default_isolation: IsolationLevel,
    /// fsync the WAL after every record
    pub wal_sync: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let engine = EngineOptions::default();
        Self {
            storage: StorageConfig::Memory,
            index_fanout: engine.index_fanout,
            block_cache_capacity: engine.block_cache_capacity,
            plan_cache_capacity: 256,
            max_variable_hops: engine.max_variable_hops,
            default_isolation: IsolationLevel::Snapshot,
            wal_sync: true,
        }
    }
}

impl DatabaseConfig {
    /// Default configuration for a durable database in `path`
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig::Directory { path: path.into() },
            ..Self::default()
        }
    }

    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        // An empty document deserializes as unit, not as an empty mapping
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject values the database cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.index_fanout == 0 || self.index_fanout > MAX_INDEX_FANOUT {
            return Err(ConfigError::invalid(
                "index_fanout",
                format!("{} not in 1..={}", self.index_fanout, MAX_INDEX_FANOUT),
            ));
        }
        if self.block_cache_capacity == 0 {
            return Err(ConfigError::invalid("block_cache_capacity", "must be at least 1"));
        }
        if self.max_variable_hops == 0 {
            return Err(ConfigError::invalid("max_variable_hops", "must be at least 1"));
        }
        if let Some(path) = self.storage.path() {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::invalid("storage.path", "must not be empty"));
            }
        }
        if matches!(self.storage, StorageConfig::RocksDb { .. }) && !cfg!(feature = "rocksdb") {
            return Err(ConfigError::invalid(
                "storage.backend",
                "rocks_db requires building with the `rocksdb` feature",
            ));
        }
        Ok(())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            index_fanout: self.index_fanout,
            block_cache_capacity: self.block_cache_capacity,
            max_variable_hops: self.max_variable_hops,
        }
    }
}
