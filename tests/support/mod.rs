//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod card;

use keypath_store::{Database, DatabaseConfig, Durability, MemoryBackend};
use tempfile::TempDir;

pub fn path(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

pub fn key(k: &str) -> String {
    k.to_string()
}

/// A loaded database over a fresh memory backend.
pub fn memory_database() -> Database {
    let db = Database::new(MemoryBackend::new());
    assert!(db.load(&[]).unwrap());
    db
}

/// A loaded file database rooted in `dir`.
pub fn file_database(dir: &TempDir, durability: Durability) -> Database {
    let config = DatabaseConfig::file(dir.path(), durability);
    let db = config.create_database();
    assert!(db.load(&config.params).unwrap());
    db
}
