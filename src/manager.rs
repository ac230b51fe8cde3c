//! DatabaseManager - owns the active database and its start/stop lifecycle.
//!
//! The manager is an ordinary value: construct one, call `startup`, pass it
//! (or the `Arc<Database>` it hands out) to whatever needs storage, and call
//! `shutdown` when done.
//!
//! A backend change is two-phase. `request_database_change` trial-loads the
//! candidate and keeps it loaded; nothing else changes. At `shutdown` the
//! candidate receives a copy of every tree and map, the new configuration is
//! persisted, and both databases are closed. A failed copy leaves the stored
//! configuration untouched.
//!
//! ## Example
//!
//! ```ignore
//! use keypath_store::{DatabaseConfig, DatabaseManager, Durability, StoreConfig};
//!
//! let manager = DatabaseManager::new(StoreConfig::default());
//! manager.startup()?;
//! let db = manager.database()?;
//! // ...
//! manager.request_database_change(DatabaseConfig::file("./data", Durability::OnClose))?;
//! manager.shutdown()?; // migrates into ./data
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::config::{DatabaseConfig, StoreConfig};
use crate::database::Database;
use crate::error::{ConfigError, DatabaseError};

struct PendingChange {
    config: DatabaseConfig,
    database: Database,
}

pub struct DatabaseManager {
    config: Mutex<StoreConfig>,
    config_path: Option<PathBuf>,
    active: RwLock<Option<Arc<Database>>>,
    pending: Mutex<Option<PendingChange>>,
}

impl DatabaseManager {
    pub fn new(config: StoreConfig) -> Self {
        DatabaseManager {
            config: Mutex::new(config),
            config_path: None,
            active: RwLock::new(None),
            pending: Mutex::new(None),
        }
    }

    /// Load the configuration from `path`; a completed migration writes the
    /// new configuration back to it.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = StoreConfig::load(path.as_ref())?;
        Ok(Self::new(config).with_config_path(path))
    }

    /// Persist migrated configuration to `path`.
    pub fn with_config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn config(&self) -> StoreConfig {
        self.config.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.active.read().is_some()
    }

    /// Create and load the configured database.
    pub fn startup(&self) -> Result<(), DatabaseError> {
        let mut active = self.active.write();
        if active.is_some() {
            return Err(DatabaseError::IllegalState("database manager is already running".into()));
        }

        let config = self.config.lock().database.clone();
        let database = config.create_database();
        if !database.load(&config.params)? {
            return Err(DatabaseError::Backend(format!(
                "{} backend could not connect",
                database.backend_name()
            )));
        }
        info!(backend = database.backend_name(), "database manager started");
        *active = Some(Arc::new(database));
        Ok(())
    }

    /// The active database. Valid between `startup` and `shutdown`.
    pub fn database(&self) -> Result<Arc<Database>, DatabaseError> {
        self.active
            .read()
            .clone()
            .ok_or_else(|| DatabaseError::IllegalState("database manager is not running".into()))
    }

    /// Trial-load `config` and, if it connects, schedule a migration to it
    /// for the next `shutdown`. Returns `false` when the candidate cannot
    /// connect; invalid parameters are an `InvalidArgument`. A previously
    /// requested change is discarded.
    pub fn request_database_change(&self, config: DatabaseConfig) -> Result<bool, DatabaseError> {
        if !self.is_running() {
            return Err(DatabaseError::IllegalState("database manager is not running".into()));
        }

        let database = config.create_database();
        if !database.load(&config.params)? {
            warn!(backend = database.backend_name(), "candidate database failed to connect");
            return Ok(false);
        }

        let previous = self.pending.lock().replace(PendingChange { config, database });
        if let Some(previous) = previous {
            if let Err(e) = previous.database.close() {
                warn!(error = %e, "failed to close superseded candidate database");
            }
        }
        info!("database change scheduled for shutdown");
        Ok(true)
    }

    /// Drop a scheduled change. Returns whether one was pending.
    pub fn cancel_database_change(&self) -> Result<bool, DatabaseError> {
        let pending = self.pending.lock().take();
        match pending {
            Some(change) => {
                change.database.close()?;
                info!("database change cancelled");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn has_pending_change(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Run any scheduled migration, then close the active database.
    pub fn shutdown(&self) -> Result<(), DatabaseError> {
        let current = self
            .active
            .write()
            .take()
            .ok_or_else(|| DatabaseError::IllegalState("database manager is not running".into()))?;

        let pending = self.pending.lock().take();
        let migrated = match pending {
            Some(change) => self.migrate(&current, change),
            None => Ok(()),
        };
        let closed = current.close();
        info!("database manager shut down");
        migrated.and(closed)
    }

    fn migrate(&self, current: &Database, change: PendingChange) -> Result<(), DatabaseError> {
        let PendingChange { config, database } = change;
        info!(
            from = current.backend_name(),
            to = database.backend_name(),
            "migrating database"
        );

        if let Err(e) = database.copy_data(current) {
            error!(error = %e, "database migration failed, keeping current configuration");
            if let Err(close_err) = database.close() {
                warn!(error = %close_err, "failed to close candidate database");
            }
            return Err(e);
        }

        let persisted = {
            let mut stored = self.config.lock();
            stored.database = config;
            match &self.config_path {
                Some(path) => stored.save(path).map_err(DatabaseError::from),
                None => Ok(()),
            }
        };
        let closed = database.close();
        persisted.and(closed)
    }
}
