//! Integration tests for the in-memory datastore
//!
//! Tests point reads and writes, key completion, handles, and call counters.

use ancestry_foundation::{Key, KeyId};
use ancestry_storage::{Datastore, MemoryDatastore, Record};

// =============================================================================
// Point Operations
// =============================================================================

#[test]
fn put_then_get() {
    let mut datastore = MemoryDatastore::new();
    let key = Key::root("Author", 1);
    datastore
        .put(Record::new(key.clone()).with("name", "Le Guin"))
        .unwrap();

    let record = datastore.get(&key).unwrap();
    assert_eq!(record.get("name").and_then(|v| v.as_str()), Some("Le Guin"));
    assert_eq!(datastore.len(), 1);
}

#[test]
fn get_missing_is_not_found() {
    let mut datastore = MemoryDatastore::new();
    let err = datastore.get(&Key::root("Author", 1)).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn get_many_skips_missing_keys() {
    let mut datastore = MemoryDatastore::new();
    let present = Key::root("Author", 1);
    datastore.put(Record::new(present.clone())).unwrap();

    let records = datastore
        .get_many(&[Key::root("Author", 9), present.clone()])
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key, present);
}

#[test]
fn delete_removes_the_record() {
    let mut datastore = MemoryDatastore::new();
    let key = Key::root("Author", 1);
    datastore.put(Record::new(key.clone())).unwrap();
    datastore.delete(&key).unwrap();
    assert!(datastore.is_empty());
    datastore.delete(&key).unwrap();
}

// =============================================================================
// Key Completion
// =============================================================================

#[test]
fn incomplete_keys_are_assigned_ids() {
    let mut datastore = MemoryDatastore::new();
    let author = datastore.put(Record::new(Key::incomplete("Author"))).unwrap();
    assert!(author.is_complete());

    let book = datastore
        .put(Record::new(author.incomplete_child("Book")))
        .unwrap();
    assert_eq!(book.parent(), Some(author.clone()));
    assert_ne!(book.id(), author.id());
    assert!(matches!(book.id(), KeyId::Id(_)));
}

#[test]
fn child_of_incomplete_parent_is_rejected() {
    let mut datastore = MemoryDatastore::new();
    let orphan = Key::incomplete("Author").incomplete_child("Book");
    assert!(datastore.put(Record::new(orphan)).is_err());
}

// =============================================================================
// Handles and Stats
// =============================================================================

#[test]
fn handles_share_committed_data() {
    let mut first = MemoryDatastore::new();
    let mut second = first.handle();
    let key = first.put(Record::new(Key::incomplete("Author"))).unwrap();
    assert!(second.get(&key).is_ok());
}

#[test]
fn stats_count_calls() {
    let mut datastore = MemoryDatastore::new();
    let key = Key::root("Author", 1);
    datastore.put(Record::new(key.clone())).unwrap();
    datastore.get(&key).unwrap();
    datastore.get_many(&[key.clone(), key.clone()]).unwrap();
    datastore.delete(&key).unwrap();

    let stats = datastore.stats().snapshot();
    assert_eq!(stats.puts, 1);
    assert_eq!(stats.gets, 3);
    assert_eq!(stats.deletes, 1);
    assert_eq!(stats.writes(), 2);
}
