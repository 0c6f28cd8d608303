//! Integration tests for datastore queries
//!
//! Tests ancestor scoping, filters, sorts, limits, and keys-only results.

use ancestry_foundation::{Key, Value};
use ancestry_storage::{
    Datastore, Filter, FilterOp, KEY_PROPERTY, MemoryDatastore, Query, Record, Sort,
};

// =============================================================================
// Helper Functions
// =============================================================================

/// Two authors with books at positions 2, 0, 1 and one nested chapter.
fn library() -> (MemoryDatastore, Key) {
    let mut datastore = MemoryDatastore::new();
    let author = Key::root("Author", 1);
    let other = Key::root("Author", 2);
    for record in [
        Record::new(author.clone()),
        Record::new(other.clone()).with("books", vec![author.child("Book", 2)]),
        Record::new(author.child("Book", 1)).with("idx", 2i64),
        Record::new(author.child("Book", 2)).with("idx", 0i64),
        Record::new(author.child("Book", 3)).with("idx", 1i64),
        Record::new(author.child("Book", 2).child("Book", 4)).with("idx", 0i64),
        Record::new(other.child("Book", 5)).with("idx", 0i64),
    ] {
        datastore.put(record).unwrap();
    }
    (datastore, author)
}

fn keys(records: &[Record]) -> Vec<Key> {
    records.iter().map(|record| record.key.clone()).collect()
}

// =============================================================================
// Ancestor Queries
// =============================================================================

#[test]
fn ancestor_query_covers_all_descendants() {
    let (mut datastore, author) = library();
    let records = datastore
        .query(&Query::new("Book").with_ancestor(author.clone()))
        .unwrap();
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|record| author.is_ancestor_of(&record.key)));
}

#[test]
fn sorted_by_position_then_key() {
    let (mut datastore, author) = library();
    let query = Query::new("Book")
        .with_ancestor(author.clone())
        .with_sort(Sort::ascending("idx"));
    let found = keys(&datastore.query(&query).unwrap());
    assert_eq!(
        found,
        [
            author.child("Book", 2),
            author.child("Book", 2).child("Book", 4),
            author.child("Book", 3),
            author.child("Book", 1),
        ]
    );
}

#[test]
fn range_filters_select_positions() {
    let (mut datastore, author) = library();
    let query = Query::new("Book")
        .with_ancestor(author.clone())
        .with_filter(Filter::new("idx", FilterOp::Ge, 1i64))
        .with_sort(Sort::descending("idx"));
    assert_eq!(
        keys(&datastore.query(&query).unwrap()),
        [author.child("Book", 1), author.child("Book", 3)]
    );
}

#[test]
fn equality_on_a_key_list_matches_any_member() {
    let (mut datastore, author) = library();
    let query = Query::new("Author").with_filter(Filter::new(
        "books",
        FilterOp::Eq,
        author.child("Book", 2),
    ));
    assert_eq!(
        keys(&datastore.query(&query).unwrap()),
        [Key::root("Author", 2)]
    );
}

#[test]
fn key_sort_and_limit() {
    let (mut datastore, _) = library();
    let query = Query::new("Book")
        .with_sort(Sort::descending(KEY_PROPERTY))
        .with_limit(2)
        .keys_only();
    let records = datastore.query(&query).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].key, Key::root("Author", 2).child("Book", 5));
    assert!(records.iter().all(|record| record.properties.is_empty()));
}

#[test]
fn records_without_a_sorted_property_are_excluded() {
    let mut datastore = MemoryDatastore::new();
    let author = Key::root("Author", 1);
    datastore.put(Record::new(author.child("Book", 1))).unwrap();
    datastore
        .put(Record::new(author.child("Book", 2)).with("idx", Value::Int(0)))
        .unwrap();

    let query = Query::new("Book")
        .with_ancestor(author.clone())
        .with_sort(Sort::ascending("idx"));
    assert_eq!(
        keys(&datastore.query(&query).unwrap()),
        [author.child("Book", 2)]
    );
}
