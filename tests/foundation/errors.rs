//! Integration tests for Error types
//!
//! Tests error construction, display, context, and error kinds.

use ancestry_foundation::{Error, ErrorContext, ErrorKind, Key, Type};

// =============================================================================
// Error Construction
// =============================================================================

#[test]
fn error_type_mismatch() {
    let err = Error::type_mismatch(Type::Int, Type::Text);
    assert!(err.is_type_mismatch());
    let msg = format!("{err}");
    assert!(msg.contains("int") && msg.contains("text"));
}

#[test]
fn error_ownership_violation() {
    let err = Error::ownership("Book(1) already belongs to Author(2)");
    assert!(err.is_ownership_violation());
    assert!(format!("{err}").contains("Author(2)"));
}

#[test]
fn error_not_found_kinds() {
    assert!(Error::key_not_found(Key::root("Author", 1)).is_not_found());
    assert!(Error::index_out_of_bounds(3, 2).is_not_found());
    assert!(!Error::store("boom").is_not_found());
}

#[test]
fn error_concurrent_modification() {
    let err = Error::concurrent_modification(Key::root("Author", 4));
    assert!(err.is_concurrent_modification());
    assert!(format!("{err}").contains("Author(4)"));
}

#[test]
fn error_configuration() {
    let err = Error::configuration("bad version");
    assert!(err.is_configuration());
    assert!(matches!(err.kind, ErrorKind::Configuration(_)));
}

// =============================================================================
// Error Display
// =============================================================================

#[test]
fn error_display_index_out_of_bounds() {
    let err = Error::index_out_of_bounds(5, 3);
    let msg = format!("{err}");
    assert!(msg.contains('5'));
    assert!(msg.contains('3'));
}

// =============================================================================
// Error Context
// =============================================================================

#[test]
fn innermost_context_is_kept() {
    let inner = ErrorContext::new()
        .with_operation("list.remove_at")
        .with_field("books");
    let outer = ErrorContext::new().with_operation("list.update");

    let err = Error::invalid_argument("nested")
        .with_context(inner)
        .with_context(outer);
    let context = err.context.unwrap();
    assert_eq!(context.operation.as_deref(), Some("list.remove_at"));
    assert_eq!(context.field.as_deref(), Some("books"));
}

#[test]
fn context_records_owner() {
    let owner = Key::root("Author", 1);
    let context = ErrorContext::new().with_owner(Some(owner.clone()));
    assert_eq!(context.owner, Some(owner));
}
