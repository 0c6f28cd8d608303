//! Integration tests for session transactions

use ancestry_collections::{ObjectState, Session};
use ancestry_storage::StorageVersion;

use crate::{library, named, session, stored};

#[test]
fn committed_members_are_visible_to_other_sessions() {
    let manager = library(StorageVersion::default());
    let mut writer = session(&manager);
    let books = manager.list_store("Author", "books").unwrap().clone();
    let author = stored(&mut writer, "Author");
    let author_key = writer.key(author).unwrap();
    let mut reader = Session::new(writer.datastore().handle(), std::sync::Arc::clone(&manager));
    let seen = reader.find(&author_key).unwrap();

    writer.begin().unwrap();
    let book = named(&mut writer, "Book", "title", "a");
    books.add(&mut writer, author, book).unwrap();
    reader.refresh(seen).unwrap();
    assert_eq!(books.size(&mut reader, seen).unwrap(), 0);

    writer.commit().unwrap();
    reader.refresh(seen).unwrap();
    assert_eq!(books.size(&mut reader, seen).unwrap(), 1);
}

#[test]
fn losing_a_conflict_resets_the_session() {
    let manager = library(StorageVersion::default());
    let mut first = session(&manager);
    let books = manager.list_store("Author", "books").unwrap().clone();
    let author = stored(&mut first, "Author");
    let author_key = first.key(author).unwrap();
    let mut second = Session::new(first.datastore().handle(), std::sync::Arc::clone(&manager));
    let other = second.find(&author_key).unwrap();

    first.begin().unwrap();
    let mine = named(&mut first, "Book", "title", "mine");
    books.add(&mut first, author, mine).unwrap();

    let theirs = named(&mut second, "Book", "title", "theirs");
    books.add(&mut second, other, theirs).unwrap();

    let err = first.commit().unwrap_err();
    assert!(err.is_concurrent_modification());
    assert_eq!(first.state(mine).unwrap(), ObjectState::Transient);
    assert!(first.key(mine).is_none());
    assert_eq!(books.size(&mut first, author).unwrap(), 1);
}

#[test]
fn rollback_restores_membership() {
    let manager = library(StorageVersion::ParentsDoNotReferToChildren);
    let mut session = session(&manager);
    let books = manager.list_store("Author", "books").unwrap().clone();
    let author = stored(&mut session, "Author");
    let [a, b] = ["a", "b"].map(|t| named(&mut session, "Book", "title", t));
    books.add_all(&mut session, author, &[a, b]).unwrap();

    session.begin().unwrap();
    books.remove_at(&mut session, author, 0).unwrap();
    assert_eq!(session.state(a).unwrap(), ObjectState::Deleted);
    session.rollback().unwrap();

    assert_eq!(session.state(a).unwrap(), ObjectState::Persistent);
    assert_eq!(books.elements(&mut session, author).unwrap(), [a, b]);
}
