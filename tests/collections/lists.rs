//! Integration tests for list stores
//!
//! Tests ordered membership under every storage version, deferred child
//! writes, and field-ordered lists.

use ancestry_collections::ObjectState;
use ancestry_foundation::{ErrorKind, Type, Value};
use ancestry_storage::{
    ClassMeta, ClassRegistry, Datastore, FieldOrder, FieldSchema, RelationSchema, StorageVersion,
};

use crate::{library, manager, named, session, stored, texts};

// =============================================================================
// Ordered Membership
// =============================================================================

#[test]
fn edits_keep_order_under_every_version() {
    for version in StorageVersion::ALL {
        let manager = library(version);
        let mut session = session(&manager);
        let books = manager.list_store("Author", "books").unwrap().clone();
        let author = stored(&mut session, "Author");

        let [a, b, c, d] = ["a", "b", "c", "d"].map(|t| named(&mut session, "Book", "title", t));
        books.add_all(&mut session, author, &[a, c]).unwrap();
        books.insert(&mut session, author, 1, b).unwrap();
        books.insert(&mut session, author, 0, d).unwrap();
        assert_eq!(books.remove_at(&mut session, author, 0).unwrap(), d);
        books.add(&mut session, author, d).unwrap();

        let elements = books.elements(&mut session, author).unwrap();
        assert_eq!(texts(&session, &elements, "title"), ["a", "b", "c", "d"], "{version}");
        assert_eq!(books.index_of(&mut session, author, c).unwrap(), Some(2));
    }
}

#[test]
fn positions_are_contiguous_without_key_lists() {
    let manager = library(StorageVersion::ParentsDoNotReferToChildren);
    let mut session = session(&manager);
    let books = manager.list_store("Author", "books").unwrap().clone();
    let author = stored(&mut session, "Author");

    let titles = ["a", "b", "c", "d", "e"];
    let all = titles.map(|t| named(&mut session, "Book", "title", t));
    books.add_all(&mut session, author, &all).unwrap();
    books.remove_all(&mut session, author, &[all[1], all[3]]).unwrap();

    let author_key = session.key(author).unwrap();
    let record = session.datastore_mut().get(&author_key).unwrap();
    assert!(record.get("books").is_none());
    for (index, book) in books.elements(&mut session, author).unwrap().into_iter().enumerate() {
        assert_eq!(session.get(book, "idx"), Some(&Value::Int(index as i64)));
    }
}

#[test]
fn key_list_matches_membership() {
    for version in [
        StorageVersion::WriteOwnedChildKeysToParents,
        StorageVersion::ReadOwnedChildKeysFromParents,
    ] {
        let manager = library(version);
        let mut session = session(&manager);
        let books = manager.list_store("Author", "books").unwrap().clone();
        let author = stored(&mut session, "Author");
        let [a, b] = ["a", "b"].map(|t| named(&mut session, "Book", "title", t));
        books.add_all(&mut session, author, &[b, a]).unwrap();

        let author_key = session.key(author).unwrap();
        let record = session.datastore_mut().get(&author_key).unwrap();
        let expected = vec![session.key(b).unwrap(), session.key(a).unwrap()];
        assert_eq!(record.get("books"), Some(&Value::from(expected)));
    }
}

// =============================================================================
// Deferred Child Writes
// =============================================================================

#[test]
fn children_wait_for_their_owner() {
    let manager = library(StorageVersion::default());
    let mut session = session(&manager);
    let books = manager.list_store("Author", "books").unwrap().clone();
    let author = session.new_object("Author").unwrap();
    session.persist(author).unwrap();

    let [a, b] = ["a", "b"].map(|t| named(&mut session, "Book", "title", t));
    books.add_all(&mut session, author, &[a, b]).unwrap();
    assert_eq!(session.datastore().stats().snapshot().puts, 0);
    assert_eq!(books.size(&mut session, author).unwrap(), 2);
    assert_eq!(session.state(a).unwrap(), ObjectState::New);

    session.flush().unwrap();
    let author_key = session.key(author).unwrap();
    assert!(author_key.is_parent_of(&session.key(a).unwrap()));
    assert!(author_key.is_parent_of(&session.key(b).unwrap()));
    let elements = books.elements(&mut session, author).unwrap();
    assert_eq!(elements, [a, b]);
}

#[test]
fn keying_a_child_writes_its_owner_first() {
    let manager = library(StorageVersion::default());
    let mut session = session(&manager);
    let books = manager.list_store("Author", "books").unwrap().clone();
    let author = session.new_object("Author").unwrap();
    session.persist(author).unwrap();
    let book = named(&mut session, "Book", "title", "a");
    books.add(&mut session, author, book).unwrap();

    let book_key = session.ensure_key(book).unwrap();
    assert_eq!(book_key.parent(), session.key(author));
    assert!(session.pending_child_writes().is_empty());
}

#[test]
fn transient_owners_reject_members() {
    let manager = library(StorageVersion::default());
    let mut session = session(&manager);
    let books = manager.list_store("Author", "books").unwrap().clone();
    let author = session.new_object("Author").unwrap();
    let book = named(&mut session, "Book", "title", "a");

    let err = books.add(&mut session, author, book).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidArgument(_)));
    assert!(session.pending_child_writes().is_empty());
}

// =============================================================================
// Field-Ordered Lists
// =============================================================================

#[test]
fn field_ordered_lists_sort_on_read() {
    for version in StorageVersion::ALL {
        let registry = ClassRegistry::new()
            .with_class(ClassMeta::new("Shelf").with_field(FieldSchema::collection(
                "books",
                RelationSchema::list("Book").ordered_by(FieldOrder::desc("title")),
            )))
            .unwrap()
            .with_class(ClassMeta::new("Book").with_field(FieldSchema::value("title", Type::Text)))
            .unwrap();
        let manager = manager(registry, version);
        let mut session = session(&manager);
        let books = manager.list_store("Shelf", "books").unwrap().clone();
        let shelf = stored(&mut session, "Shelf");

        for title in ["b", "c", "a"] {
            let book = named(&mut session, "Book", "title", title);
            books.add(&mut session, shelf, book).unwrap();
        }
        let elements = books.elements(&mut session, shelf).unwrap();
        assert_eq!(texts(&session, &elements, "title"), ["c", "b", "a"], "{version}");
        let first = books.get(&mut session, shelf, 0).unwrap();
        assert_eq!(texts(&session, &[first], "title"), ["c"]);
    }
}

// =============================================================================
// Rejected Mutations
// =============================================================================

/// Novels own a unidirectional list of chapters positioned by `pos`.
fn novels(version: StorageVersion) -> std::sync::Arc<ancestry_collections::StoreManager> {
    let registry = ClassRegistry::new()
        .with_class(ClassMeta::new("Novel").with_field(FieldSchema::collection(
            "chapters",
            RelationSchema::list("Chapter").with_order_field("pos"),
        )))
        .unwrap()
        .with_class(
            ClassMeta::new("Chapter")
                .with_field(FieldSchema::value("pos", Type::option(Type::Int)))
                .with_field(FieldSchema::value("title", Type::Text)),
        )
        .unwrap();
    manager(registry, version)
}

/// Stored members, their stored positions, and the stored key list.
fn stored_state(
    session: &mut ancestry_collections::Session<ancestry_storage::MemoryDatastore>,
    novel: ancestry_collections::ObjectId,
) -> (Vec<String>, Vec<Option<Value>>, Option<Value>) {
    let chapters = session.manager().list_store("Novel", "chapters").unwrap().clone();
    let elements = chapters.elements(session, novel).unwrap();
    let titles = texts(session, &elements, "title");
    let positions = elements
        .iter()
        .map(|chapter| {
            let key = session.key(*chapter).unwrap();
            session.datastore_mut().get(&key).unwrap().get("pos").cloned()
        })
        .collect();
    let novel_key = session.key(novel).unwrap();
    let key_list = session.datastore_mut().get(&novel_key).unwrap().get("chapters").cloned();
    (titles, positions, key_list)
}

#[test]
fn rejected_insert_writes_nothing() {
    for version in StorageVersion::ALL {
        let manager = novels(version);
        let mut session = session(&manager);
        let chapters = manager.list_store("Novel", "chapters").unwrap().clone();
        let first = stored(&mut session, "Novel");
        let second = stored(&mut session, "Novel");
        let [a, b, c] = ["a", "b", "c"].map(|t| named(&mut session, "Chapter", "title", t));
        chapters.add_all(&mut session, first, &[a, b, c]).unwrap();
        let foreign = named(&mut session, "Chapter", "title", "z");
        chapters.add(&mut session, second, foreign).unwrap();

        let before = stored_state(&mut session, first);
        let writes = session.datastore().stats().snapshot().writes();
        let err = chapters.insert(&mut session, first, 0, foreign).unwrap_err();
        assert!(err.is_ownership_violation(), "{version}");
        assert_eq!(session.datastore().stats().snapshot().writes(), writes, "{version}");

        assert_eq!(stored_state(&mut session, first), before, "{version}");
        assert_eq!(chapters.get(&mut session, first, 0).unwrap(), a, "{version}");
        assert_eq!(chapters.index_of(&mut session, first, a).unwrap(), Some(0), "{version}");
    }
}

#[test]
fn rejected_batch_leaves_no_orphans() {
    for version in StorageVersion::ALL {
        let manager = novels(version);
        let mut session = session(&manager);
        let chapters = manager.list_store("Novel", "chapters").unwrap().clone();
        let first = stored(&mut session, "Novel");
        let second = stored(&mut session, "Novel");
        let foreign = named(&mut session, "Chapter", "title", "z");
        chapters.add(&mut session, second, foreign).unwrap();

        let writes = session.datastore().stats().snapshot().writes();
        let fresh = named(&mut session, "Chapter", "title", "a");
        let err = chapters.add_all(&mut session, first, &[fresh, foreign]).unwrap_err();
        assert!(err.is_ownership_violation(), "{version}");
        assert_eq!(session.datastore().stats().snapshot().writes(), writes, "{version}");

        assert_eq!(session.state(fresh).unwrap(), ObjectState::Transient, "{version}");
        assert!(session.key(fresh).is_none(), "{version}");
        assert_eq!(chapters.size(&mut session, first).unwrap(), 0, "{version}");
        let novel_key = session.key(first).unwrap();
        let children = session
            .datastore_mut()
            .query(&ancestry_storage::Query::new("Chapter").with_ancestor(novel_key))
            .unwrap();
        assert!(children.is_empty(), "{version}");
    }
}

#[test]
fn rejected_set_keeps_the_displaced_element() {
    for version in StorageVersion::ALL {
        let manager = novels(version);
        let mut session = session(&manager);
        let chapters = manager.list_store("Novel", "chapters").unwrap().clone();
        let first = stored(&mut session, "Novel");
        let second = stored(&mut session, "Novel");
        let [a, b] = ["a", "b"].map(|t| named(&mut session, "Chapter", "title", t));
        chapters.add_all(&mut session, first, &[a, b]).unwrap();
        let foreign = named(&mut session, "Chapter", "title", "z");
        chapters.add(&mut session, second, foreign).unwrap();

        let before = stored_state(&mut session, first);
        let writes = session.datastore().stats().snapshot().writes();
        let err = chapters.set(&mut session, first, 0, foreign).unwrap_err();
        assert!(err.is_ownership_violation(), "{version}");
        assert_eq!(session.datastore().stats().snapshot().writes(), writes, "{version}");

        assert_eq!(session.state(a).unwrap(), ObjectState::Persistent, "{version}");
        assert_eq!(stored_state(&mut session, first), before, "{version}");
    }
}
