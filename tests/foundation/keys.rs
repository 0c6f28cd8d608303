//! Integration tests for datastore keys
//!
//! Tests key paths, ancestry predicates, ordering, and display.

use ancestry_foundation::{Key, KeyId};

// =============================================================================
// Construction
// =============================================================================

#[test]
fn root_key_has_no_parent() {
    let key = Key::root("Author", 7);
    assert_eq!(key.kind(), "Author");
    assert_eq!(key.id(), &KeyId::Id(7));
    assert_eq!(key.depth(), 1);
    assert!(key.parent().is_none());
}

#[test]
fn child_key_extends_the_path() {
    let author = Key::root("Author", 7);
    let book = author.child("Book", "intro");
    assert_eq!(book.depth(), 2);
    assert_eq!(book.parent(), Some(author));
    assert_eq!(book.kind(), "Book");
}

#[test]
fn incomplete_keys_complete_with_an_id() {
    let author = Key::root("Author", 1);
    let pending = author.incomplete_child("Book");
    assert!(!pending.is_complete());

    let complete = pending.with_id(12);
    assert!(complete.is_complete());
    assert_eq!(complete.parent(), Some(author));
}

// =============================================================================
// Ancestry
// =============================================================================

#[test]
fn parent_and_ancestor_predicates() {
    let author = Key::root("Author", 1);
    let book = author.child("Book", 2);
    let chapter = book.child("Chapter", 3);

    assert!(author.is_parent_of(&book));
    assert!(!author.is_parent_of(&chapter));
    assert!(author.is_ancestor_of(&chapter));
    assert!(!author.is_ancestor_of(&author));
    assert!(author.contains(&author));
    assert!(!book.contains(&author));
}

#[test]
fn entity_group_is_the_root() {
    let author = Key::root("Author", 1);
    let chapter = author.child("Book", 2).child("Chapter", 3);
    assert_eq!(chapter.entity_group(), author);
    assert_eq!(author.entity_group(), author);
}

#[test]
fn descendants_sort_directly_after_their_ancestor() {
    let first = Key::root("Author", 1);
    let second = Key::root("Author", 2);
    let child = first.child("Book", 99);

    let mut keys = vec![second.clone(), child.clone(), first.clone()];
    keys.sort();
    assert_eq!(keys, [first, child, second]);
}

// =============================================================================
// Display
// =============================================================================

#[test]
fn display_shows_the_path() {
    let key = Key::root("Author", 1).child("Book", "intro");
    assert_eq!(key.to_string(), "Author(1)/Book(\"intro\")");
    assert_eq!(format!("{:?}", Key::root("A", 3)), "Key(A(3))");
}
