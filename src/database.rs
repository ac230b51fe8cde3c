//! Database - lifecycle-managed registry of named trees and maps.
//!
//! A database wraps one [`Backend`] and hands out typed handles over its
//! units. Each name is bound to one kind (tree or map) and one pair of
//! translator types for as long as the database is loaded.
//!
//! ```text
//! Unloaded --load(params)--> Loaded --close()--> Closed
//! ```
//!
//! Everything except `load`, `load_params`, `state` and `backend_name`
//! requires the `Loaded` state. Handles obtained from a database fail with
//! `IllegalState` once it is closed.
//!
//! ## Example
//!
//! ```ignore
//! use keypath_store::{Database, LongTranslator, Map, MemoryBackend, StringTranslator};
//!
//! let db = Database::new(MemoryBackend::new());
//! db.load(&[])?;
//! let balances = db.data_map("balances", StringTranslator, LongTranslator)?;
//! balances.set(&"alice".to_string(), 100)?;
//! ```

use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::data::Data;
use crate::error::DatabaseError;
use crate::storage::{Backend, LoadParam, StorageUnit, UnitKind};
use crate::tree::{Tree, TreeMap};
use crate::translator::Translator;

/// Lifecycle state of a [`Database`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseState {
    Unloaded,
    Loaded,
    Closed,
}

impl fmt::Display for DatabaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseState::Unloaded => f.write_str("unloaded"),
            DatabaseState::Loaded => f.write_str("loaded"),
            DatabaseState::Closed => f.write_str("closed"),
        }
    }
}

/// Shared between a database and every handle it gave out.
struct Lifecycle {
    state: RwLock<DatabaseState>,
}

impl Lifecycle {
    /// Hold the lifecycle in the `Loaded` state for the guard's lifetime.
    /// `close` waits for outstanding guards.
    fn loaded(&self, action: &str) -> Result<RwLockReadGuard<'_, DatabaseState>, DatabaseError> {
        let state = self.state.read_recursive();
        match *state {
            DatabaseState::Loaded => Ok(state),
            other => Err(DatabaseError::IllegalState(format!(
                "cannot {} while the database is {}",
                action, other
            ))),
        }
    }
}

struct Entry {
    kind: UnitKind,
    key_translator: Arc<dyn Any + Send + Sync>,
    value_translator: Arc<dyn Any + Send + Sync>,
    key_type: &'static str,
    value_type: &'static str,
    unit: Arc<dyn StorageUnit>,
}

// ============================================================================
// DataTree / DataMap
// ============================================================================

/// Typed handle over one named unit of a [`Database`].
///
/// Paths must contain at least one key, and values translating to
/// `Data::Null` are rejected.
pub struct DataTree<KT, VT> {
    name: Arc<str>,
    unit: Arc<dyn StorageUnit>,
    key: Arc<KT>,
    value: Arc<VT>,
    lifecycle: Arc<Lifecycle>,
}

/// Depth-1 view handed out by [`Database::data_map`].
pub type DataMap<KT, VT> = TreeMap<DataTree<KT, VT>>;

impl<KT, VT> Clone for DataTree<KT, VT> {
    fn clone(&self) -> Self {
        DataTree {
            name: self.name.clone(),
            unit: self.unit.clone(),
            key: self.key.clone(),
            value: self.value.clone(),
            lifecycle: self.lifecycle.clone(),
        }
    }
}

impl<KT, VT> fmt::Debug for DataTree<KT, VT> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTree")
            .field("name", &self.name)
            .field("key", &type_name::<KT>())
            .field("value", &type_name::<VT>())
            .finish()
    }
}

impl<KT: Translator, VT: Translator> DataTree<KT, VT> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_translator(&self) -> &KT {
        &self.key
    }

    pub fn value_translator(&self) -> &VT {
        &self.value
    }

    fn encode_path(&self, path: &[KT::Value]) -> Result<Vec<String>, DatabaseError> {
        if path.is_empty() {
            return Err(DatabaseError::InvalidArgument(format!(
                "empty path for '{}'",
                self.name
            )));
        }
        path.iter()
            .map(|key| self.key.encode(key).map_err(DatabaseError::from))
            .collect()
    }

    fn decode_path(&self, path: &[String]) -> Result<Vec<KT::Value>, DatabaseError> {
        path.iter()
            .map(|key| self.key.decode(key).map_err(DatabaseError::from))
            .collect()
    }

    fn encode_value(&self, value: &VT::Value) -> Result<Data, DatabaseError> {
        let data = self.value.to_data(value)?;
        if data.is_null() {
            return Err(DatabaseError::InvalidArgument(format!(
                "null value for '{}'",
                self.name
            )));
        }
        if !data.is_finite() {
            return Err(DatabaseError::InvalidArgument(format!(
                "non-finite number in value for '{}'",
                self.name
            )));
        }
        Ok(data)
    }
}

impl<KT: Translator, VT: Translator> Tree<KT::Value, VT::Value> for DataTree<KT, VT> {
    fn get(&self, path: &[KT::Value]) -> Result<Option<VT::Value>, DatabaseError> {
        let _loaded = self.lifecycle.loaded("read")?;
        let path = self.encode_path(path)?;
        match self.unit.get(&path)? {
            Some(data) => Ok(Some(self.value.from_data(&data)?)),
            None => Ok(None),
        }
    }

    fn set(&self, value: VT::Value, path: &[KT::Value]) -> Result<(), DatabaseError> {
        let _loaded = self.lifecycle.loaded("write")?;
        let path = self.encode_path(path)?;
        let data = self.encode_value(&value)?;
        self.unit.set(data, &path)
    }

    fn add(&self, value: VT::Value, path: &[KT::Value]) -> Result<bool, DatabaseError> {
        let _loaded = self.lifecycle.loaded("write")?;
        let path = self.encode_path(path)?;
        let data = self.encode_value(&value)?;
        self.unit.add(data, &path)
    }

    fn remove(&self, path: &[KT::Value]) -> Result<Option<VT::Value>, DatabaseError> {
        let _loaded = self.lifecycle.loaded("remove")?;
        let path = self.encode_path(path)?;
        match self.unit.remove(&path)? {
            Some(data) => Ok(Some(self.value.from_data(&data)?)),
            None => Ok(None),
        }
    }

    fn entries(&self, depth: usize) -> Result<Vec<(Vec<KT::Value>, VT::Value)>, DatabaseError> {
        let _loaded = self.lifecycle.loaded("read")?;
        self.unit
            .entries(depth)?
            .into_iter()
            .map(|(path, data)| -> Result<_, DatabaseError> {
                Ok((self.decode_path(&path)?, self.value.from_data(&data)?))
            })
            .collect()
    }

    fn clear(&self) -> Result<(), DatabaseError> {
        let _loaded = self.lifecycle.loaded("clear")?;
        self.unit.clear()
    }

    fn contains(&self, path: &[KT::Value]) -> Result<bool, DatabaseError> {
        let _loaded = self.lifecycle.loaded("read")?;
        let path = self.encode_path(path)?;
        self.unit.contains(&path)
    }

    fn size(&self, depth: usize) -> Result<usize, DatabaseError> {
        let _loaded = self.lifecycle.loaded("read")?;
        self.unit.size(depth)
    }
}

// ============================================================================
// Database
// ============================================================================

pub struct Database {
    backend: Box<dyn Backend>,
    lifecycle: Arc<Lifecycle>,
    registry: Mutex<BTreeMap<String, Entry>>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.backend.name())
            .field("state", &self.state())
            .field("entries", &self.registry.lock().len())
            .finish()
    }
}

impl Database {
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self::with_backend(Box::new(backend))
    }

    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        Database {
            backend,
            lifecycle: Arc::new(Lifecycle {
                state: RwLock::new(DatabaseState::Unloaded),
            }),
            registry: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn state(&self) -> DatabaseState {
        *self.lifecycle.state.read_recursive()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Parameters `load` expects, in order.
    pub fn load_params(&self) -> Vec<LoadParam> {
        self.backend.load_params()
    }

    /// Connect the backend.
    ///
    /// Parameters that do not match [`Database::load_params`] in count or
    /// choice are an `InvalidArgument`. A backend that cannot connect yields
    /// `Ok(false)` and leaves the database unloaded so the caller may retry.
    pub fn load(&self, params: &[String]) -> Result<bool, DatabaseError> {
        let mut state = self.lifecycle.state.write();
        if *state != DatabaseState::Unloaded {
            return Err(DatabaseError::IllegalState(format!(
                "cannot load a database that is {}",
                *state
            )));
        }

        let expected = self.backend.load_params();
        if params.len() != expected.len() {
            return Err(DatabaseError::InvalidArgument(format!(
                "{} backend expects {} load parameters, got {}",
                self.backend.name(),
                expected.len(),
                params.len()
            )));
        }
        for (param, value) in expected.iter().zip(params) {
            if !param.validate(value) {
                return Err(DatabaseError::InvalidArgument(format!(
                    "'{}' is not a valid value for parameter '{}'",
                    value, param.name
                )));
            }
        }

        if !self.backend.connect(params)? {
            warn!(backend = self.backend.name(), "database failed to connect");
            return Ok(false);
        }
        *state = DatabaseState::Loaded;
        info!(backend = self.backend.name(), "database loaded");
        Ok(true)
    }

    /// Flush then disconnect. Every handle becomes unusable. Closing twice is
    /// an error.
    pub fn close(&self) -> Result<(), DatabaseError> {
        let mut state = self.lifecycle.state.write();
        if *state != DatabaseState::Loaded {
            return Err(DatabaseError::IllegalState(format!(
                "cannot close a database that is {}",
                *state
            )));
        }
        let flushed = self.backend.flush();
        let disconnected = self.backend.disconnect();
        *state = DatabaseState::Closed;
        let entries = {
            let mut registry = self.registry.lock();
            let n = registry.len();
            registry.clear();
            n
        };
        info!(backend = self.backend.name(), entries, "database closed");
        flushed.and(disconnected)
    }

    /// Persist pending writes without closing.
    pub fn flush(&self) -> Result<(), DatabaseError> {
        let _loaded = self.lifecycle.loaded("flush")?;
        self.backend.flush()
    }

    /// Tree named `name`, bound to the given translators.
    pub fn data_tree<KT, VT>(&self, name: &str, key: KT, value: VT) -> Result<DataTree<KT, VT>, DatabaseError>
    where
        KT: Translator,
        VT: Translator,
    {
        self.checkout(name, UnitKind::Tree, key, value)
    }

    /// Map named `name`, bound to the given translators.
    pub fn data_map<KT, VT>(&self, name: &str, key: KT, value: VT) -> Result<DataMap<KT, VT>, DatabaseError>
    where
        KT: Translator,
        VT: Translator,
    {
        self.checkout(name, UnitKind::Map, key, value).map(TreeMap::new)
    }

    /// Return the registered handle for `name`, or open and register one.
    ///
    /// A repeat request must match the registered kind and translator types;
    /// the translators passed on the first request are the ones used.
    fn checkout<KT, VT>(&self, name: &str, kind: UnitKind, key: KT, value: VT) -> Result<DataTree<KT, VT>, DatabaseError>
    where
        KT: Translator,
        VT: Translator,
    {
        let _loaded = self.lifecycle.loaded("open a tree or map")?;
        if name.is_empty() {
            return Err(DatabaseError::InvalidArgument("empty tree or map name".into()));
        }

        let mut registry = self.registry.lock();
        if let Some(entry) = registry.get(name) {
            if entry.kind != kind {
                return Err(DatabaseError::InvalidArgument(format!(
                    "'{}' is already registered as a {}",
                    name, entry.kind
                )));
            }
            let mismatch = || {
                DatabaseError::InvalidArgument(format!(
                    "'{}' is bound to ({}, {}), requested ({}, {})",
                    name,
                    entry.key_type,
                    entry.value_type,
                    type_name::<KT>(),
                    type_name::<VT>()
                ))
            };
            let key = entry
                .key_translator
                .clone()
                .downcast::<KT>()
                .map_err(|_| mismatch())?;
            let value = entry
                .value_translator
                .clone()
                .downcast::<VT>()
                .map_err(|_| mismatch())?;
            return Ok(DataTree {
                name: Arc::from(name),
                unit: entry.unit.clone(),
                key,
                value,
                lifecycle: self.lifecycle.clone(),
            });
        }

        let unit = self.backend.open_unit(name, kind)?;
        let key = Arc::new(key);
        let value = Arc::new(value);
        registry.insert(
            name.to_string(),
            Entry {
                kind,
                key_translator: key.clone(),
                value_translator: value.clone(),
                key_type: type_name::<KT>(),
                value_type: type_name::<VT>(),
                unit: unit.clone(),
            },
        );
        debug!(name, %kind, "registered");
        Ok(DataTree {
            name: Arc::from(name),
            unit,
            key,
            value,
            lifecycle: self.lifecycle.clone(),
        })
    }

    /// Number of trees and maps checked out since `load`.
    pub fn size(&self) -> Result<usize, DatabaseError> {
        let _loaded = self.lifecycle.loaded("inspect")?;
        Ok(self.registry.lock().len())
    }

    /// Names of trees checked out since `load`. Not a backend-wide listing.
    pub fn data_trees(&self) -> Result<Vec<String>, DatabaseError> {
        self.names_of(UnitKind::Tree)
    }

    /// Names of maps checked out since `load`. Not a backend-wide listing.
    pub fn data_maps(&self) -> Result<Vec<String>, DatabaseError> {
        self.names_of(UnitKind::Map)
    }

    fn names_of(&self, kind: UnitKind) -> Result<Vec<String>, DatabaseError> {
        let _loaded = self.lifecycle.loaded("inspect")?;
        Ok(self
            .registry
            .lock()
            .iter()
            .filter(|(_, entry)| entry.kind == kind)
            .map(|(name, _)| name.clone())
            .collect())
    }

    /// Copy every tree and map `other` holds into this database.
    ///
    /// Values already present here are kept; the source only fills paths
    /// that are empty in the destination. This database must not have any
    /// tree or map checked out. A failure part way leaves this database
    /// partially written but still closeable.
    pub fn copy_data(&self, other: &Database) -> Result<(), DatabaseError> {
        let _mine = self.lifecycle.loaded("copy into")?;
        let _theirs = other.lifecycle.loaded("copy from")?;
        if !self.registry.lock().is_empty() {
            return Err(DatabaseError::IllegalState(
                "cannot copy into a database with trees or maps checked out".into(),
            ));
        }

        let units = other.backend.unit_names()?;
        info!(
            from = other.backend.name(),
            to = self.backend.name(),
            units = units.len(),
            "copying database"
        );
        for (name, kind) in &units {
            let source = other.backend.open_unit(name, *kind)?;
            let target = self.backend.open_unit(name, *kind)?;
            let mut copied = 0usize;
            let mut kept = 0usize;
            for (path, data) in source.all_entries()? {
                if target.add(data, &path)? {
                    copied += 1;
                } else {
                    kept += 1;
                }
            }
            debug!(unit = %name, %kind, copied, kept, "copied unit");
        }
        self.backend.flush()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if self.state() == DatabaseState::Loaded {
            if let Err(e) = self.close() {
                warn!(error = %e, "failed to close database on drop");
            }
        }
    }
}
