//! Store configuration, read from and written to TOML.
//!
//! ```toml
//! [database]
//! backend = "file"
//! params = ["./data", "on-close"]
//!
//! [executor]
//! threads = 0
//! thread_name = "keyed-worker"
//! ```

use std::fs;
use std::hash::Hash;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::database::Database;
use crate::error::{ConfigError, ExecutorError};
use crate::executor::{ExecutorConfig, KeyedExecutor};
use crate::storage::{Backend, Durability, FileBackend, MemoryBackend};

/// Which storage engine a database uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    File,
}

/// Backend selection plus the parameters passed to `Database::load`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: BackendKind,
    pub params: Vec<String>,
}

impl DatabaseConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn file(directory: impl AsRef<Path>, durability: Durability) -> Self {
        DatabaseConfig {
            backend: BackendKind::File,
            params: vec![
                directory.as_ref().to_string_lossy().into_owned(),
                durability.as_str().to_string(),
            ],
        }
    }

    /// A fresh, unconnected backend of the configured kind.
    pub fn create_backend(&self) -> Box<dyn Backend> {
        match self.backend {
            BackendKind::Memory => Box::new(MemoryBackend::new()),
            BackendKind::File => Box::new(FileBackend::new()),
        }
    }

    /// An unloaded database over a fresh backend.
    pub fn create_database(&self) -> Database {
        Database::with_backend(self.create_backend())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database: DatabaseConfig,
    pub executor: ExecutorConfig,
}

impl StoreConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Start a keyed executor sized and named by the `[executor]` section.
    pub fn create_executor<K>(&self) -> Result<KeyedExecutor<K>, ExecutorError>
    where
        K: Eq + Hash + Clone + Send + 'static,
    {
        KeyedExecutor::new(self.executor.clone())
    }

    /// Write the file atomically, replacing any previous version.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = self.to_toml_string()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| ConfigError::Io(e.error))?;
        Ok(())
    }
}
