//! Integration tests for storage-version upgrades
//!
//! Data written by an older storage version is read by a newer one, before
//! and after migrating owners to child key lists.

use ancestry_collections::{Migrator, Session};
use ancestry_foundation::Value;
use ancestry_storage::{Datastore, StorageVersion};

use crate::{library, named, session, stored, texts};

#[test]
fn upgraded_sessions_read_legacy_data() {
    let legacy = library(StorageVersion::ParentsDoNotReferToChildren);
    let mut old = session(&legacy);
    let books = legacy.list_store("Author", "books").unwrap().clone();
    let author = stored(&mut old, "Author");
    let [a, b, c] = ["a", "b", "c"].map(|t| named(&mut old, "Book", "title", t));
    books.add_all(&mut old, author, &[a, c]).unwrap();
    books.insert(&mut old, author, 1, b).unwrap();
    let author_key = old.key(author).unwrap();

    for version in [
        StorageVersion::WriteOwnedChildKeysToParents,
        StorageVersion::ReadOwnedChildKeysFromParents,
    ] {
        let manager = library(version);
        let books = manager.list_store("Author", "books").unwrap().clone();
        let mut new = Session::new(old.datastore().handle(), manager);
        let author = new.find(&author_key).unwrap();
        let elements = books.elements(&mut new, author).unwrap();
        assert_eq!(texts(&new, &elements, "title"), ["a", "b", "c"], "{version}");
    }
}

#[test]
fn migrated_owners_read_from_their_key_list() {
    let legacy = library(StorageVersion::ParentsDoNotReferToChildren);
    let mut old = session(&legacy);
    let books = legacy.list_store("Author", "books").unwrap().clone();
    let author = stored(&mut old, "Author");
    let [a, b] = ["a", "b"].map(|t| named(&mut old, "Book", "title", t));
    books.add_all(&mut old, author, &[b, a]).unwrap();
    let author_key = old.key(author).unwrap();

    let current = library(StorageVersion::ReadOwnedChildKeysFromParents);
    let mut datastore = old.datastore().handle();
    let migrated = Migrator::new(std::sync::Arc::clone(&current))
        .migrate_all(&mut datastore, "Author")
        .unwrap();
    assert_eq!(migrated, 1);

    let record = datastore.get(&author_key).unwrap();
    let expected = vec![old.key(b).unwrap(), old.key(a).unwrap()];
    assert_eq!(record.get("books"), Some(&Value::from(expected)));

    let books = current.list_store("Author", "books").unwrap().clone();
    let mut new = Session::new(datastore, current);
    let author = new.find(&author_key).unwrap();
    let before = new.datastore().stats().snapshot().queries;
    let elements = books.elements(&mut new, author).unwrap();
    assert_eq!(texts(&new, &elements, "title"), ["b", "a"]);
    assert_eq!(new.datastore().stats().snapshot().queries, before);
}

#[test]
fn writing_version_keeps_both_representations() {
    let writing = library(StorageVersion::WriteOwnedChildKeysToParents);
    let mut session = session(&writing);
    let books = writing.list_store("Author", "books").unwrap().clone();
    let author = stored(&mut session, "Author");
    let [a, b, c] = ["a", "b", "c"].map(|t| named(&mut session, "Book", "title", t));
    books.add_all(&mut session, author, &[a, b, c]).unwrap();
    books.remove_at(&mut session, author, 0).unwrap();

    for (index, book) in [b, c].into_iter().enumerate() {
        assert_eq!(session.get(book, "idx"), Some(&Value::Int(index as i64)));
    }
    let author_key = session.key(author).unwrap();
    let record = session.datastore_mut().get(&author_key).unwrap();
    let expected = vec![session.key(b).unwrap(), session.key(c).unwrap()];
    assert_eq!(record.get("books"), Some(&Value::from(expected)));
}
