//! Integration tests for Layer 2: Collections
//!
//! Tests for list and set stores across storage versions, cascades, migration,
//! transactions, and relation validation.

mod configuration;
mod lists;
mod migration;
mod transactions;

use std::sync::Arc;

use ancestry_collections::{ObjectId, Session, StoreManager};
use ancestry_foundation::{Type, Value};
use ancestry_storage::{
    ClassMeta, ClassRegistry, FieldSchema, MemoryDatastore, RelationSchema, StorageVersion,
    StoreConfig,
};

// =============================================================================
// Shared Fixtures
// =============================================================================

/// Authors own an indexed list of books and an unowned set of awards.
pub fn library(version: StorageVersion) -> Arc<StoreManager> {
    let registry = ClassRegistry::new()
        .with_class(
            ClassMeta::new("Author")
                .with_field(FieldSchema::collection(
                    "books",
                    RelationSchema::list("Book")
                        .with_order_field("idx")
                        .mapped_by("author"),
                ))
                .with_field(FieldSchema::collection(
                    "awards",
                    RelationSchema::set("Award").unowned(),
                )),
        )
        .unwrap()
        .with_class(
            ClassMeta::new("Book")
                .with_field(FieldSchema::value("idx", Type::option(Type::Int)))
                .with_field(FieldSchema::value("title", Type::Text))
                .with_field(FieldSchema::parent("author", "Author")),
        )
        .unwrap()
        .with_class(ClassMeta::new("Award").with_field(FieldSchema::value("name", Type::Text)))
        .unwrap();
    manager(registry, version)
}

pub fn manager(registry: ClassRegistry, version: StorageVersion) -> Arc<StoreManager> {
    let config = StoreConfig::default().with_storage_version(version);
    Arc::new(StoreManager::new(registry, config).unwrap())
}

pub fn session(manager: &Arc<StoreManager>) -> Session<MemoryDatastore> {
    Session::new(MemoryDatastore::new(), Arc::clone(manager))
}

/// Creates and flushes an object of `class`.
pub fn stored(session: &mut Session<MemoryDatastore>, class: &str) -> ObjectId {
    let object = session.new_object(class).unwrap();
    session.persist(object).unwrap();
    session.flush().unwrap();
    object
}

/// Creates a transient object with a text field set.
pub fn named(
    session: &mut Session<MemoryDatastore>,
    class: &str,
    field: &str,
    text: &str,
) -> ObjectId {
    let object = session.new_object(class).unwrap();
    session.set(object, field, text).unwrap();
    object
}

pub fn texts(
    session: &Session<MemoryDatastore>,
    objects: &[ObjectId],
    field: &str,
) -> Vec<String> {
    objects
        .iter()
        .map(|object| {
            session
                .get(*object, field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        })
        .collect()
}
