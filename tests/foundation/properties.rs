//! Integration tests for property maps

use ancestry_foundation::{PropertyMap, Value};

#[test]
fn insert_get_and_remove() {
    let mut map = PropertyMap::new();
    assert!(map.is_empty());

    assert!(map.insert("title", Value::from("Dune")).is_none());
    assert_eq!(map.insert("title", Value::from("Emma")), Some(Value::from("Dune")));
    assert_eq!(map.get("title"), Some(&Value::from("Emma")));
    assert!(map.contains("title"));

    assert!(map.remove("title").is_some());
    assert!(!map.contains("title"));
}

#[test]
fn clones_are_independent() {
    let original = PropertyMap::new().with("idx", 1i64);
    let mut copy = original.clone();
    copy.insert("idx", Value::Int(2));

    assert_eq!(original.get("idx"), Some(&Value::Int(1)));
    assert_eq!(copy.get("idx"), Some(&Value::Int(2)));
}

#[test]
fn iteration_is_sorted_by_name() {
    let map = PropertyMap::new().with("b", 2i64).with("a", 1i64);
    let names: Vec<_> = map.iter().map(|(name, _)| name.to_string()).collect();
    assert_eq!(names, ["a", "b"]);
    assert_eq!(map.len(), 2);
}
