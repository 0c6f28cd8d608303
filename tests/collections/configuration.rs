//! Integration tests for relation validation
//!
//! Relation metadata is checked once, when the store manager is built.

use ancestry_collections::StoreManager;
use ancestry_foundation::{Result, Type};
use ancestry_storage::{
    ClassMeta, ClassRegistry, FieldOrder, FieldSchema, RelationSchema, StorageVersion, StoreConfig,
};

fn build(owner: ClassMeta, element: ClassMeta, config: StoreConfig) -> Result<StoreManager> {
    let registry = ClassRegistry::new()
        .with_class(element)
        .unwrap()
        .with_class(owner)
        .unwrap();
    StoreManager::new(registry, config)
}

fn legacy() -> StoreConfig {
    StoreConfig::legacy()
}

fn page() -> ClassMeta {
    ClassMeta::new("Page").with_field(FieldSchema::value("number", Type::Int))
}

// =============================================================================
// Relations of the Same Element Type
// =============================================================================

#[test]
fn two_owned_relations_of_one_type_need_key_lists() {
    let owner = ClassMeta::new("Book")
        .with_field(FieldSchema::collection(
            "front",
            RelationSchema::list("Page").with_order_field("number"),
        ))
        .with_field(FieldSchema::collection(
            "back",
            RelationSchema::list("Page").with_order_field("number"),
        ));

    let err = build(owner.clone(), page(), legacy()).unwrap_err();
    assert!(err.is_configuration());
    let msg = err.to_string();
    assert!(msg.contains("front") && msg.contains("back"));

    let allowed = legacy().with_multiple_relations_of_same_type(true);
    assert!(build(owner.clone(), page(), allowed).is_ok());
    assert!(build(owner, page(), StoreConfig::default()).is_ok());
}

// =============================================================================
// Order Mappings
// =============================================================================

#[test]
fn indexed_lists_need_an_order_without_key_lists() {
    let owner = ClassMeta::new("Book")
        .with_field(FieldSchema::collection("pages", RelationSchema::list("Page")));
    assert!(build(owner.clone(), page(), legacy()).unwrap_err().is_configuration());
    assert!(build(owner, page(), StoreConfig::default()).is_ok());
}

#[test]
fn order_field_must_be_an_integer() {
    let element = ClassMeta::new("Page").with_field(FieldSchema::value("label", Type::Text));
    let owner = ClassMeta::new("Book").with_field(FieldSchema::collection(
        "pages",
        RelationSchema::list("Page").with_order_field("label"),
    ));
    let err = build(owner, element, StoreConfig::default()).unwrap_err();
    assert!(err.to_string().contains("label"));
}

#[test]
fn ordering_fields_must_exist() {
    let owner = ClassMeta::new("Book").with_field(FieldSchema::collection(
        "pages",
        RelationSchema::list("Page").ordered_by(FieldOrder::asc("missing")),
    ));
    assert!(build(owner, page(), legacy()).unwrap_err().is_configuration());
}

// =============================================================================
// Element Classes and Back References
// =============================================================================

#[test]
fn unknown_element_class_is_rejected() {
    let owner = ClassMeta::new("Book")
        .with_field(FieldSchema::collection("pages", RelationSchema::set("Leaf")));
    assert!(build(owner, page(), StoreConfig::default()).unwrap_err().is_configuration());
}

#[test]
fn mapped_by_must_name_a_matching_reference() {
    let element = page().with_field(FieldSchema::reference("book", "Book"));
    let owned = ClassMeta::new("Book").with_field(FieldSchema::collection(
        "pages",
        RelationSchema::set("Page").mapped_by("book"),
    ));
    assert!(build(owned, element.clone(), StoreConfig::default()).is_err());

    let unowned = ClassMeta::new("Book").with_field(FieldSchema::collection(
        "pages",
        RelationSchema::set("Page").unowned().mapped_by("book"),
    ));
    assert!(build(unowned, element, StoreConfig::default()).is_ok());
}

#[test]
fn every_collection_field_gets_a_store() {
    let owner = ClassMeta::new("Book")
        .with_field(FieldSchema::collection(
            "pages",
            RelationSchema::list("Page").with_order_field("number"),
        ))
        .with_field(FieldSchema::collection(
            "notes",
            RelationSchema::set("Page").unowned(),
        ));
    let config =
        StoreConfig::default().with_storage_version(StorageVersion::WriteOwnedChildKeysToParents);
    let manager = build(owner, page(), config).unwrap();
    assert_eq!(manager.stores().count(), 2);
    assert_eq!(manager.relations_of("Book").len(), 2);
    assert_eq!(manager.relations_holding("Page").len(), 2);
}
