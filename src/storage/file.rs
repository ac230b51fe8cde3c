//! FileBackend - one JSON document per unit under a data directory.
//!
//! ```text
//! <directory>/
//!   trees/<name>.json
//!   maps/<name>.json
//! ```
//!
//! Units are loaded on first open and written back atomically (temp file in
//! the same directory, then rename), either on every mutation or only on
//! flush/disconnect depending on [`Durability`].

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{Backend, LoadParam, StorageUnit, UnitKind};
use crate::data::Data;
use crate::error::DatabaseError;
use crate::tree::{PathTree, Tree};

const EXTENSION: &str = "json";

/// When a [`FileBackend`] writes units back to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// Write dirty units on `flush` and `disconnect` only.
    #[default]
    OnClose,
    /// Write the unit after every mutation.
    EveryWrite,
}

impl Durability {
    pub const CHOICES: [&'static str; 2] = ["on-close", "every-write"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Durability::OnClose => "on-close",
            Durability::EveryWrite => "every-write",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "on-close" => Some(Durability::OnClose),
            "every-write" => Some(Durability::EveryWrite),
            _ => None,
        }
    }
}

fn kind_dir(kind: UnitKind) -> &'static str {
    match kind {
        UnitKind::Tree => "trees",
        UnitKind::Map => "maps",
    }
}

fn validate_name(name: &str) -> Result<(), DatabaseError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(DatabaseError::InvalidArgument(format!(
            "unit name '{}' must be non-empty and use only [A-Za-z0-9_.-]",
            name
        )))
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), DatabaseError> {
    let dir = path
        .parent()
        .ok_or_else(|| DatabaseError::Backend(format!("{} has no parent directory", path.display())))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| DatabaseError::Io(e.error))?;
    Ok(())
}

// ============================================================================
// FileUnit
// ============================================================================

struct FileUnit {
    path: PathBuf,
    durability: Durability,
    tree: RwLock<PathTree<String, Data>>,
    dirty: AtomicBool,
}

/// How to take back a mutation whose write to disk failed.
enum Undo {
    Restore {
        path: Vec<String>,
        previous: Option<Data>,
    },
    Replace(PathTree<String, Data>),
}

impl Undo {
    fn apply(self, tree: &mut PathTree<String, Data>) {
        match self {
            Undo::Restore {
                path,
                previous: Some(value),
            } => {
                tree.set(value, &path);
            }
            Undo::Restore { path, previous: None } => {
                tree.remove(&path);
            }
            Undo::Replace(previous) => *tree = previous,
        }
    }
}

impl FileUnit {
    fn open(path: PathBuf, durability: Durability) -> Result<Self, DatabaseError> {
        let tree = if path.exists() {
            let text = fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                PathTree::new()
            } else {
                serde_json::from_str(&text)?
            }
        } else {
            PathTree::new()
        };
        debug!(path = %path.display(), "opened unit file");
        Ok(FileUnit {
            path,
            durability,
            tree: RwLock::new(tree),
            dirty: AtomicBool::new(false),
        })
    }

    /// Apply a mutation under the write lock. `op` returns `None` for the
    /// undo when nothing changed.
    ///
    /// With [`Durability::EveryWrite`] the file is written before the lock
    /// is released; if that fails the mutation is undone, so readers never
    /// see a value the file does not hold.
    fn mutate<R>(
        &self,
        op: impl FnOnce(&mut PathTree<String, Data>) -> (R, Option<Undo>),
    ) -> Result<R, DatabaseError> {
        let mut tree = self.tree.write();
        let (result, undo) = op(&mut *tree);
        let Some(undo) = undo else {
            return Ok(result);
        };
        match self.durability {
            Durability::OnClose => {
                self.dirty.store(true, Ordering::Release);
                Ok(result)
            }
            Durability::EveryWrite => match self.write(&tree) {
                Ok(()) => Ok(result),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "write failed, mutation rolled back");
                    undo.apply(&mut tree);
                    Err(e)
                }
            },
        }
    }

    fn write(&self, tree: &PathTree<String, Data>) -> Result<(), DatabaseError> {
        let bytes = serde_json::to_vec_pretty(tree)?;
        write_atomic(&self.path, &bytes)
    }

    fn persist(&self) -> Result<(), DatabaseError> {
        // The read guard is held through the write so a concurrent mutation
        // cannot land between the snapshot and the rename.
        let tree = self.tree.read();
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.write(&tree);
        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        result
    }
}

impl Tree<String, Data> for FileUnit {
    fn get(&self, path: &[String]) -> Result<Option<Data>, DatabaseError> {
        Tree::get(&self.tree, path)
    }

    fn set(&self, value: Data, path: &[String]) -> Result<(), DatabaseError> {
        self.mutate(|tree| {
            let previous = tree.set(value, path);
            let undo = Undo::Restore {
                path: path.to_vec(),
                previous,
            };
            ((), Some(undo))
        })
    }

    fn add(&self, value: Data, path: &[String]) -> Result<bool, DatabaseError> {
        self.mutate(|tree| {
            if tree.add(value, path) {
                let undo = Undo::Restore {
                    path: path.to_vec(),
                    previous: None,
                };
                (true, Some(undo))
            } else {
                (false, None)
            }
        })
    }

    fn remove(&self, path: &[String]) -> Result<Option<Data>, DatabaseError> {
        self.mutate(|tree| {
            let removed = tree.remove(path);
            let undo = removed.clone().map(|value| Undo::Restore {
                path: path.to_vec(),
                previous: Some(value),
            });
            (removed, undo)
        })
    }

    fn entries(&self, depth: usize) -> Result<Vec<(Vec<String>, Data)>, DatabaseError> {
        Tree::entries(&self.tree, depth)
    }

    fn clear(&self) -> Result<(), DatabaseError> {
        self.mutate(|tree| {
            if tree.is_empty() {
                ((), None)
            } else {
                ((), Some(Undo::Replace(std::mem::take(tree))))
            }
        })
    }

    fn size(&self, depth: usize) -> Result<usize, DatabaseError> {
        Tree::size(&self.tree, depth)
    }
}

impl StorageUnit for FileUnit {
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
        self.persist()
    }
}

// ============================================================================
// FileBackend
// ============================================================================

struct FileState {
    root: PathBuf,
    durability: Durability,
    units: HashMap<(UnitKind, String), Arc<FileUnit>>,
}

/// Local file store.
///
/// Load parameters: `[directory, durability]` where durability is one of
/// `"on-close"` or `"every-write"`.
#[derive(Default)]
pub struct FileBackend {
    state: Mutex<Option<FileState>>,
}

impl FileBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Data directory while connected.
    pub fn directory(&self) -> Option<PathBuf> {
        self.state.lock().as_ref().map(|s| s.root.clone())
    }

    fn not_connected() -> DatabaseError {
        DatabaseError::Backend("file backend is not connected".into())
    }

    fn flush_units(units: &HashMap<(UnitKind, String), Arc<FileUnit>>) -> Result<(), DatabaseError> {
        let mut first_err = None;
        for ((kind, name), unit) in units {
            if let Err(e) = unit.persist() {
                warn!(unit = %name, %kind, error = %e, "failed to persist unit");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Backend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn load_params(&self) -> Vec<LoadParam> {
        vec![
            LoadParam::text("directory"),
            LoadParam::choice("durability", Durability::CHOICES),
        ]
    }

    fn connect(&self, params: &[String]) -> Result<bool, DatabaseError> {
        let (directory, durability) = match params {
            [directory, durability] => (directory, durability),
            _ => {
                return Err(DatabaseError::InvalidArgument(format!(
                    "file backend expects 2 parameters, got {}",
                    params.len()
                )))
            }
        };
        let durability = Durability::parse(durability).ok_or_else(|| {
            DatabaseError::InvalidArgument(format!("unknown durability '{}'", durability))
        })?;

        let root = PathBuf::from(directory);
        for kind in [UnitKind::Tree, UnitKind::Map] {
            if let Err(e) = fs::create_dir_all(root.join(kind_dir(kind))) {
                warn!(directory = %root.display(), error = %e, "cannot prepare data directory");
                return Ok(false);
            }
        }

        info!(directory = %root.display(), durability = durability.as_str(), "file backend connected");
        *self.state.lock() = Some(FileState {
            root,
            durability,
            units: HashMap::new(),
        });
        Ok(true)
    }

    fn open_unit(&self, name: &str, kind: UnitKind) -> Result<Arc<dyn StorageUnit>, DatabaseError> {
        validate_name(name)?;
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or_else(Self::not_connected)?;

        let key = (kind, name.to_string());
        if let Some(unit) = state.units.get(&key) {
            return Ok(unit.clone());
        }
        let path = state
            .root
            .join(kind_dir(kind))
            .join(format!("{}.{}", name, EXTENSION));
        let unit = Arc::new(FileUnit::open(path, state.durability)?);
        state.units.insert(key, unit.clone());
        Ok(unit)
    }

    fn unit_names(&self) -> Result<Vec<(String, UnitKind)>, DatabaseError> {
        let guard = self.state.lock();
        let state = guard.as_ref().ok_or_else(Self::not_connected)?;

        let mut names: Vec<(String, UnitKind)> = state
            .units
            .keys()
            .map(|(kind, name)| (name.clone(), *kind))
            .collect();
        for kind in [UnitKind::Tree, UnitKind::Map] {
            for entry in fs::read_dir(state.root.join(kind_dir(kind)))? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if validate_name(stem).is_ok() {
                        names.push((stem.to_string(), kind));
                    }
                }
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn flush(&self) -> Result<(), DatabaseError> {
        let guard = self.state.lock();
        let state = guard.as_ref().ok_or_else(Self::not_connected)?;
        Self::flush_units(&state.units)
    }

    fn disconnect(&self) -> Result<(), DatabaseError> {
        let state = self.state.lock().take();
        match state {
            Some(state) => {
                let result = Self::flush_units(&state.units);
                info!(directory = %state.root.display(), "file backend disconnected");
                result
            }
            None => Ok(()),
        }
    }
}
