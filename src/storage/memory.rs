//! MemoryBackend - HashMap-backed units for testing and development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{Backend, LoadParam, StorageUnit, UnitKind};
use crate::data::Data;
use crate::error::DatabaseError;
use crate::tree::{PathTree, Tree};

struct MemoryUnit {
    tree: RwLock<PathTree<String, Data>>,
}

impl MemoryUnit {
    fn new() -> Self {
        MemoryUnit {
            tree: RwLock::new(PathTree::new()),
        }
    }
}

impl Tree<String, Data> for MemoryUnit {
    fn get(&self, path: &[String]) -> Result<Option<Data>, DatabaseError> {
        Tree::get(&self.tree, path)
    }

    fn set(&self, value: Data, path: &[String]) -> Result<(), DatabaseError> {
        Tree::set(&self.tree, value, path)
    }

    fn add(&self, value: Data, path: &[String]) -> Result<bool, DatabaseError> {
        Tree::add(&self.tree, value, path)
    }

    fn remove(&self, path: &[String]) -> Result<Option<Data>, DatabaseError> {
        Tree::remove(&self.tree, path)
    }

    fn entries(&self, depth: usize) -> Result<Vec<(Vec<String>, Data)>, DatabaseError> {
        Tree::entries(&self.tree, depth)
    }

    fn clear(&self) -> Result<(), DatabaseError> {
        Tree::clear(&self.tree)
    }

    fn size(&self, depth: usize) -> Result<usize, DatabaseError> {
        Tree::size(&self.tree, depth)
    }
}

impl StorageUnit for MemoryUnit {
    fn all_entries(&self) -> Result<Vec<(Vec<String>, Data)>, DatabaseError> {
        Ok(self
            .tree
            .read()
            .all_entries()
            .into_iter()
            .map(|(path, value)| (path, value.clone()))
            .collect())
    }

    fn flush(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

/// Non-persistent backend. Takes no load parameters; everything it holds
/// is dropped on disconnect.
pub struct MemoryBackend {
    units: Mutex<HashMap<(UnitKind, String), Arc<MemoryUnit>>>,
    connected: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            units: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
        }
    }

    /// Pre-populate a unit. Seeded units survive `connect` and are listed by
    /// `unit_names`.
    pub fn seed<I>(&self, name: &str, kind: UnitKind, entries: I)
    where
        I: IntoIterator<Item = (Vec<String>, Data)>,
    {
        let mut units = self.units.lock();
        let unit = units
            .entry((kind, name.to_string()))
            .or_insert_with(|| Arc::new(MemoryUnit::new()));
        let mut tree = unit.tree.write();
        for (path, value) in entries {
            tree.set(value, &path);
        }
    }

    fn require_connected(&self) -> Result<(), DatabaseError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DatabaseError::Backend("memory backend is not connected".into()))
        }
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load_params(&self) -> Vec<LoadParam> {
        Vec::new()
    }

    fn connect(&self, _params: &[String]) -> Result<bool, DatabaseError> {
        self.connected.store(true, Ordering::Release);
        Ok(true)
    }

    fn open_unit(&self, name: &str, kind: UnitKind) -> Result<Arc<dyn StorageUnit>, DatabaseError> {
        self.require_connected()?;
        let mut units = self.units.lock();
        let unit = units
            .entry((kind, name.to_string()))
            .or_insert_with(|| {
                debug!(unit = name, %kind, "creating memory unit");
                Arc::new(MemoryUnit::new())
            })
            .clone();
        Ok(unit)
    }

    fn unit_names(&self) -> Result<Vec<(String, UnitKind)>, DatabaseError> {
        self.require_connected()?;
        let units = self.units.lock();
        let mut names: Vec<_> = units
            .keys()
            .map(|(kind, name)| (name.clone(), *kind))
            .collect();
        names.sort();
        Ok(names)
    }

    fn flush(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    fn disconnect(&self) -> Result<(), DatabaseError> {
        self.connected.store(false, Ordering::Release);
        self.units.lock().clear();
        Ok(())
    }
}
