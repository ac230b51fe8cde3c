//! Database lifecycle, registry rules, backends and bulk copy.

#[path = "../support/mod.rs"]
mod support;

use std::sync::{Arc, Barrier};
use std::thread;

use keypath_store::{
    Backend, Data, DataTranslator, Database, DatabaseError, DatabaseState, DoubleTranslator,
    Durability, FileBackend, LoadParamKind, LongTranslator, Map, MemoryBackend,
    StorableTranslator, StringTranslator, Tree, UnitKind,
};
use support::card::Card;
use support::{file_database, key, memory_database, path};
use tempfile::TempDir;

fn is_illegal_state<T>(result: Result<T, DatabaseError>) -> bool {
    matches!(result, Err(DatabaseError::IllegalState(_)))
}

fn is_invalid_argument<T>(result: Result<T, DatabaseError>) -> bool {
    matches!(result, Err(DatabaseError::InvalidArgument(_)))
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn everything_but_load_needs_a_loaded_database() {
    let db = Database::new(MemoryBackend::new());
    assert_eq!(db.state(), DatabaseState::Unloaded);

    assert!(is_illegal_state(db.data_tree("t", StringTranslator, LongTranslator)));
    assert!(is_illegal_state(db.data_map("m", StringTranslator, LongTranslator)));
    assert!(is_illegal_state(db.size()));
    assert!(is_illegal_state(db.data_trees()));
    assert!(is_illegal_state(db.data_maps()));
    assert!(is_illegal_state(db.flush()));
    assert!(is_illegal_state(db.close()));

    let other = memory_database();
    assert!(is_illegal_state(db.copy_data(&other)));
    assert!(is_illegal_state(other.copy_data(&db)));
}

#[test]
fn closed_database_rejects_everything() {
    let db = memory_database();
    let tree = db.data_tree("t", StringTranslator, LongTranslator).unwrap();
    let map = db.data_map("m", StringTranslator, LongTranslator).unwrap();
    db.close().unwrap();
    assert_eq!(db.state(), DatabaseState::Closed);

    assert!(is_illegal_state(db.data_tree("t", StringTranslator, LongTranslator)));
    assert!(is_illegal_state(db.size()));
    assert!(is_illegal_state(db.load(&[])));
    assert!(is_illegal_state(db.close()));

    assert!(is_illegal_state(tree.get(&path(&["a"]))));
    assert!(is_illegal_state(tree.set(1, &path(&["a"]))));
    assert!(is_illegal_state(tree.entries(1)));
    assert!(is_illegal_state(map.len()));
    assert!(is_illegal_state(map.clear()));
}

#[test]
fn load_params_are_validated() {
    let dir = TempDir::new().unwrap();
    let db = Database::new(FileBackend::new());

    let params = db.load_params();
    assert_eq!(params.len(), 2);
    assert_eq!(params[0].kind, LoadParamKind::Text);
    assert!(matches!(&params[1].kind, LoadParamKind::Choice(choices) if choices.len() == 2));

    let dir_param = dir.path().to_string_lossy().into_owned();
    assert!(is_invalid_argument(db.load(&[dir_param.clone()])));
    assert!(is_invalid_argument(db.load(&[dir_param.clone(), "weekly".into()])));
    assert_eq!(db.state(), DatabaseState::Unloaded);

    assert!(db.load(&[dir_param, "on-close".into()]).unwrap());
    assert_eq!(db.state(), DatabaseState::Loaded);
}

#[test]
fn failed_connection_can_be_retried() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("occupied");
    std::fs::write(&blocker, "not a directory").unwrap();

    let db = Database::new(FileBackend::new());
    let bad = vec![blocker.to_string_lossy().into_owned(), "on-close".to_string()];
    assert!(!db.load(&bad).unwrap());
    assert_eq!(db.state(), DatabaseState::Unloaded);

    let good = vec![dir.path().to_string_lossy().into_owned(), "on-close".to_string()];
    assert!(db.load(&good).unwrap());
}

// ============================================================================
// Registry
// ============================================================================

#[test]
fn same_translators_share_one_tree() {
    let db = memory_database();
    let first = db.data_tree("X", StringTranslator, LongTranslator).unwrap();
    let second = db.data_tree("X", StringTranslator, LongTranslator).unwrap();

    first.set(5, &path(&["k"])).unwrap();
    assert_eq!(second.get(&path(&["k"])).unwrap(), Some(5));
    assert_eq!(db.size().unwrap(), 1);
}

#[test]
fn different_translators_are_rejected() {
    let db = memory_database();
    db.data_tree("X", StringTranslator, LongTranslator).unwrap();

    assert!(is_invalid_argument(db.data_tree("X", StringTranslator, DoubleTranslator)));
    assert!(is_invalid_argument(db.data_tree("X", LongTranslator, LongTranslator)));
    assert!(is_invalid_argument(db.data_map("X", StringTranslator, LongTranslator)));
}

#[test]
fn empty_names_are_rejected() {
    let db = memory_database();
    assert!(is_invalid_argument(db.data_map("", StringTranslator, LongTranslator)));
}

#[test]
fn introspection_only_covers_this_run() {
    let dir = TempDir::new().unwrap();
    {
        let db = file_database(&dir, Durability::OnClose);
        let old = db.data_map("old", StringTranslator, LongTranslator).unwrap();
        old.set(&key("a"), 1).unwrap();
        db.close().unwrap();
    }

    let db = file_database(&dir, Durability::OnClose);
    assert_eq!(db.size().unwrap(), 0);
    db.data_tree("fresh", StringTranslator, LongTranslator).unwrap();
    assert_eq!(db.data_trees().unwrap(), vec!["fresh".to_string()]);
    assert!(db.data_maps().unwrap().is_empty());
}

#[test]
fn values_that_translate_to_null_are_rejected() {
    let db = memory_database();
    let raw = db.data_tree("raw", StringTranslator, DataTranslator).unwrap();
    assert!(is_invalid_argument(raw.set(Data::Null, &path(&["a"]))));
    assert!(is_invalid_argument(raw.add(Data::Null, &path(&["a"]))));
    assert_eq!(raw.get(&path(&["a"])).unwrap(), None);
}

#[test]
fn non_finite_numbers_are_refused() {
    let dir = TempDir::new().unwrap();
    for db in [memory_database(), file_database(&dir, Durability::EveryWrite)] {
        let rates = db.data_map("rates", StringTranslator, DoubleTranslator).unwrap();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                rates.set(&key("x"), bad),
                Err(DatabaseError::Translation(_))
            ));
        }
        assert_eq!(rates.get(&key("x")).unwrap(), None);

        let raw = db.data_tree("raw", StringTranslator, DataTranslator).unwrap();
        let list = Data::List(vec![Data::from(1i64), Data::from(f64::NAN)]);
        assert!(is_invalid_argument(raw.set(list, &path(&["a"]))));
        assert_eq!(raw.get(&path(&["a"])).unwrap(), None);
        db.close().unwrap();
    }
}

#[test]
fn mismatched_stored_data_is_a_translation_error() {
    let backend = MemoryBackend::new();
    backend.seed("mixed", UnitKind::Map, vec![(path(&["a"]), Data::from("text"))]);
    let db = Database::new(backend);
    db.load(&[]).unwrap();
    let numbers = db.data_map("mixed", StringTranslator, LongTranslator).unwrap();
    assert!(matches!(
        numbers.get(&key("a")),
        Err(DatabaseError::Translation(_))
    ));
}

// ============================================================================
// File backend
// ============================================================================

#[test]
fn storables_persist_across_reloads() {
    let dir = TempDir::new().unwrap();
    let db = file_database(&dir, Durability::OnClose);
    let cards = db
        .data_tree("cards", StringTranslator, StorableTranslator::<Card>::default())
        .unwrap();
    cards
        .set(Card::new("Dragon", 5, &["fire"]), &path(&["alice", "c1"]))
        .unwrap();
    cards
        .set(Card::new("Slime", 1, &[]), &path(&["alice", "c2"]))
        .unwrap();
    db.close().unwrap();

    let db = file_database(&dir, Durability::OnClose);
    let cards = db
        .data_tree("cards", StringTranslator, StorableTranslator::<Card>::default())
        .unwrap();
    assert_eq!(cards.size(2).unwrap(), 2);
    assert_eq!(
        cards.get(&path(&["alice", "c1"])).unwrap(),
        Some(Card::new("Dragon", 5, &["fire"]))
    );
}

#[test]
fn every_write_survives_without_close() {
    let dir = TempDir::new().unwrap();
    let db = file_database(&dir, Durability::EveryWrite);
    let levels = db.data_map("levels", StringTranslator, LongTranslator).unwrap();
    levels.set(&key("bob"), 3).unwrap();

    // A second backend over the same directory sees the write immediately.
    let peek = file_database(&dir, Durability::OnClose);
    let seen = peek.data_map("levels", StringTranslator, LongTranslator).unwrap();
    assert_eq!(seen.get(&key("bob")).unwrap(), Some(3));
}

#[test]
fn doubles_reload_exactly() {
    let dir = TempDir::new().unwrap();
    let db = file_database(&dir, Durability::OnClose);
    let rates = db.data_map("rates", StringTranslator, DoubleTranslator).unwrap();
    rates.set(&key("tiny"), 0.75).unwrap();
    rates.set(&key("huge"), 1234.5e100).unwrap();
    rates.set(&key("neg"), -0.1).unwrap();
    assert!(rates.set(&key("inf"), f64::INFINITY).is_err());
    db.close().unwrap();

    let db = file_database(&dir, Durability::OnClose);
    let rates = db.data_map("rates", StringTranslator, DoubleTranslator).unwrap();
    assert_eq!(rates.len().unwrap(), 3);
    assert_eq!(rates.get(&key("tiny")).unwrap(), Some(0.75));
    assert_eq!(rates.get(&key("huge")).unwrap(), Some(1234.5e100));
    assert_eq!(rates.get(&key("neg")).unwrap(), Some(-0.1));
    assert_eq!(rates.get(&key("inf")).unwrap(), None);
}

#[test]
fn failed_every_write_keeps_the_old_value() {
    let dir = TempDir::new().unwrap();
    let db = file_database(&dir, Durability::EveryWrite);
    let levels = db.data_tree("levels", StringTranslator, LongTranslator).unwrap();
    levels.set(1, &path(&["a"])).unwrap();

    std::fs::remove_dir_all(dir.path().join("trees")).unwrap();
    assert!(levels.set(2, &path(&["a"])).is_err());
    assert_eq!(levels.get(&path(&["a"])).unwrap(), Some(1));
    assert!(levels.remove(&path(&["a"])).is_err());
    assert_eq!(levels.get(&path(&["a"])).unwrap(), Some(1));
}

#[test]
fn flush_persists_without_closing() {
    let dir = TempDir::new().unwrap();
    let db = file_database(&dir, Durability::OnClose);
    let levels = db.data_map("levels", StringTranslator, LongTranslator).unwrap();
    levels.set(&key("eve"), 8).unwrap();
    db.flush().unwrap();

    assert!(dir.path().join("maps").join("levels.json").exists());
    assert_eq!(db.state(), DatabaseState::Loaded);
    levels.set(&key("eve"), 9).unwrap();
}

#[test]
fn file_names_are_checked() {
    let dir = TempDir::new().unwrap();
    let db = file_database(&dir, Durability::OnClose);
    assert!(is_invalid_argument(db.data_tree("a/b", StringTranslator, LongTranslator)));
    assert!(is_invalid_argument(db.data_tree("..", StringTranslator, LongTranslator)));
    assert!(db.data_tree("guild.v2_x-y", StringTranslator, LongTranslator).is_ok());
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn parallel_writers_on_distinct_paths() {
    let db = Arc::new(memory_database());
    let counters = db.data_tree("counters", StringTranslator, LongTranslator).unwrap();
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let counters = counters.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..200 {
                    counters
                        .set(i, &[format!("t{}", t), format!("k{}", i)])
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(counters.size(2).unwrap(), 8 * 200);
}

#[test]
fn close_waits_for_handles_then_stops_them() {
    let db = Arc::new(memory_database());
    let tree = db.data_tree("t", StringTranslator, LongTranslator).unwrap();

    let writer = {
        let tree = tree.clone();
        thread::spawn(move || {
            let mut written = 0;
            for i in 0..10_000 {
                match tree.set(i, &path(&["k"])) {
                    Ok(()) => written += 1,
                    Err(DatabaseError::IllegalState(_)) => break,
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
            written
        })
    };
    db.close().unwrap();
    writer.join().unwrap();
    assert!(is_illegal_state(tree.get(&path(&["k"]))));
}

// ============================================================================
// copy_data
// ============================================================================

#[test]
fn copy_moves_every_unit_between_backends() {
    let source = memory_database();
    let balances = source.data_map("balances", StringTranslator, LongTranslator).unwrap();
    balances.set(&key("alice"), 10).unwrap();
    let votes = source.data_tree("votes", StringTranslator, StringTranslator).unwrap();
    votes.set("up".to_string(), &path(&["alice", "bob"])).unwrap();

    let dir = TempDir::new().unwrap();
    let dest = file_database(&dir, Durability::OnClose);
    dest.copy_data(&source).unwrap();
    dest.close().unwrap();

    let reopened = file_database(&dir, Durability::OnClose);
    let balances = reopened.data_map("balances", StringTranslator, LongTranslator).unwrap();
    let votes = reopened.data_tree("votes", StringTranslator, StringTranslator).unwrap();
    assert_eq!(balances.get(&key("alice")).unwrap(), Some(10));
    assert_eq!(votes.get(&path(&["alice", "bob"])).unwrap(), Some("up".to_string()));
}

#[test]
fn copy_prefers_destination_values() {
    let source = memory_database();
    let balances = source.data_map("balances", StringTranslator, LongTranslator).unwrap();
    balances.set(&key("alice"), 10).unwrap();
    balances.set(&key("bob"), 20).unwrap();

    let backend = MemoryBackend::new();
    backend.seed("balances", UnitKind::Map, vec![(path(&["alice"]), Data::from(500i64))]);
    let dest = Database::new(backend);
    dest.load(&[]).unwrap();
    dest.copy_data(&source).unwrap();

    let merged = dest.data_map("balances", StringTranslator, LongTranslator).unwrap();
    assert_eq!(merged.get(&key("alice")).unwrap(), Some(500));
    assert_eq!(merged.get(&key("bob")).unwrap(), Some(20));
}

#[test]
fn copy_includes_units_never_checked_out() {
    let dir = TempDir::new().unwrap();
    {
        let db = file_database(&dir, Durability::OnClose);
        let legacy = db.data_map("legacy", StringTranslator, LongTranslator).unwrap();
        legacy.set(&key("x"), 1).unwrap();
        db.close().unwrap();
    }

    let source = file_database(&dir, Durability::OnClose);
    let dest = memory_database();
    dest.copy_data(&source).unwrap();
    let legacy = dest.data_map("legacy", StringTranslator, LongTranslator).unwrap();
    assert_eq!(legacy.get(&key("x")).unwrap(), Some(1));
}

#[test]
fn memory_backend_describes_itself() {
    let backend = MemoryBackend::new();
    assert_eq!(backend.name(), "memory");
    assert!(backend.load_params().is_empty());
}
