//! Integration tests for property values and types
//!
//! Tests conversions, accessors, ordering, and type acceptance.

use ancestry_foundation::{Key, Type, Value};

// =============================================================================
// Conversions
// =============================================================================

#[test]
fn conversions_pick_the_matching_variant() {
    assert_eq!(Value::from(true), Value::Bool(true));
    assert_eq!(Value::from(3i64).as_int(), Some(3));
    assert_eq!(Value::from("title").as_str(), Some("title"));

    let key = Key::root("Author", 1);
    assert_eq!(Value::from(key.clone()).as_key(), Some(&key));

    let list = Value::from(vec![key.clone(), key.child("Book", 2)]);
    assert_eq!(list.as_key_list().map(|keys| keys.len()), Some(2));
}

#[test]
fn value_types() {
    assert_eq!(Value::Null.value_type(), Type::Null);
    assert_eq!(Value::from(1.5).value_type(), Type::Float);
    assert_eq!(Value::from(Vec::<Key>::new()).value_type(), Type::KeyList);
    assert!(Value::Null.is_null());
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn values_order_within_and_across_variants() {
    assert!(Value::Int(1) < Value::Int(2));
    assert!(Value::Null < Value::Int(i64::MIN));
    assert!(Value::from("a") < Value::from("b"));
}

// =============================================================================
// Type acceptance
// =============================================================================

#[test]
fn nullable_wrapper_accepts_null_and_inner() {
    let ty = Type::option(Type::Int);
    assert!(ty.accepts(&Type::Null));
    assert!(ty.accepts(&Type::Int));
    assert!(!ty.accepts(&Type::Text));
    assert!(!Type::Int.accepts(&Type::Null));
}

#[test]
fn wrapper_equivalence_ignores_nullability() {
    assert!(Type::option(Type::Int).is_wrapper_equivalent(&Type::Int));
    assert!(!Type::option(Type::Int).is_wrapper_equivalent(&Type::Float));
    assert_eq!(Type::option(Type::Int).erased(), &Type::Int);
}

#[test]
fn float_fields_accept_integers() {
    assert!(Type::Float.accepts(&Type::Int));
    assert!(!Type::Int.accepts(&Type::Float));
    assert!(Type::Any.accepts(&Type::KeyList));
}

#[test]
fn type_display() {
    assert_eq!(Type::option(Type::Int).to_string(), "int?");
    assert_eq!(Type::KeyList.to_string(), "key-list");
}
