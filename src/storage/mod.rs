//! Storage backends - the pluggable engines behind a [`Database`](crate::Database).
//!
//! A backend stores named units, each a tree from string paths to [`Data`].
//! Key and value translation, name registration and lifecycle rules live in
//! the database; a backend only has to persist raw units and be safe for
//! concurrent use from many threads.

mod file;
mod memory;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::data::Data;
use crate::error::DatabaseError;
use crate::tree::Tree;

pub use file::{Durability, FileBackend};
pub use memory::MemoryBackend;

/// Whether a named unit is used as a tree or as a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Tree,
    Map,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Tree => f.write_str("tree"),
            UnitKind::Map => f.write_str("map"),
        }
    }
}

/// How a load parameter is entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadParamKind {
    /// Free text.
    Text,
    /// One of a fixed set of named choices.
    Choice(Vec<String>),
}

/// One parameter a backend needs to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadParam {
    pub name: String,
    pub kind: LoadParamKind,
}

impl LoadParam {
    pub fn text(name: impl Into<String>) -> Self {
        LoadParam {
            name: name.into(),
            kind: LoadParamKind::Text,
        }
    }

    pub fn choice<I, S>(name: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LoadParam {
            name: name.into(),
            kind: LoadParamKind::Choice(choices.into_iter().map(Into::into).collect()),
        }
    }

    pub fn validate(&self, value: &str) -> bool {
        match &self.kind {
            LoadParamKind::Text => true,
            LoadParamKind::Choice(choices) => choices.iter().any(|c| c == value),
        }
    }
}

/// Raw storage for one named unit.
pub trait StorageUnit: Tree<String, Data> + Send + Sync {
    /// Every entry at every depth, used for bulk copies.
    fn all_entries(&self) -> Result<Vec<(Vec<String>, Data)>, DatabaseError>;

    /// Persist pending writes.
    fn flush(&self) -> Result<(), DatabaseError>;
}

/// A storage engine.
///
/// `open_unit` must return the same unit for repeated calls with the same
/// name and kind while connected.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Parameters `connect` expects, in order.
    fn load_params(&self) -> Vec<LoadParam>;

    /// Connect using structurally valid parameters. `Ok(false)` means the
    /// connection could not be established and may be retried.
    fn connect(&self, params: &[String]) -> Result<bool, DatabaseError>;

    fn open_unit(&self, name: &str, kind: UnitKind) -> Result<Arc<dyn StorageUnit>, DatabaseError>;

    /// Every unit the backend holds, including ones never opened in this run.
    fn unit_names(&self) -> Result<Vec<(String, UnitKind)>, DatabaseError>;

    fn flush(&self) -> Result<(), DatabaseError>;

    /// Flush and release resources.
    fn disconnect(&self) -> Result<(), DatabaseError>;
}
