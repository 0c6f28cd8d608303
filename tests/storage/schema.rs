//! Integration tests for class metadata and configuration
//!
//! Tests class registration, inheritance, discriminators, storage versions,
//! and configuration properties.

use ancestry_foundation::Value;
use ancestry_storage::{
    ClassMeta, ClassRegistry, FieldSchema, RelationSchema, StorageVersion, StoreConfig,
    config::{MAX_ENTITY_GROUPS_PROPERTY, STORAGE_VERSION_PROPERTY},
};

// =============================================================================
// Class Registry
// =============================================================================

fn shapes() -> ClassRegistry {
    ClassRegistry::new()
        .with_class(ClassMeta::interface("Drawable"))
        .unwrap()
        .with_class(ClassMeta::new("Shape").implements("Drawable"))
        .unwrap()
        .with_class(
            ClassMeta::new("Circle")
                .extends("Shape")
                .with_discriminator("circle"),
        )
        .unwrap()
}

#[test]
fn subclasses_share_the_superclass_kind() {
    let registry = shapes();
    assert_eq!(registry.require("Circle").unwrap().kind(), "Shape");
}

#[test]
fn assignability_follows_supertypes() {
    let registry = shapes();
    assert!(registry.is_assignable("Circle", "Shape"));
    assert!(registry.is_assignable("Circle", "Drawable"));
    assert!(!registry.is_assignable("Shape", "Circle"));

    let names: Vec<_> = registry
        .implementations("Drawable")
        .into_iter()
        .map(|meta| meta.name.to_string())
        .collect();
    assert_eq!(names, ["Shape", "Circle"]);
}

#[test]
fn discriminator_selects_the_subclass() {
    let registry = shapes();
    let circle = registry.resolve("Shape", Some(&Value::from("circle"))).unwrap();
    assert_eq!(&*circle.name, "Circle");
    let shape = registry.resolve("Shape", None).unwrap();
    assert_eq!(&*shape.name, "Shape");
    assert!(registry.resolve("Shape", Some(&Value::from("square"))).is_none());
}

#[test]
fn invalid_registrations_are_rejected() {
    let registry = shapes();
    assert!(registry.clone().with_class(ClassMeta::new("Circle")).is_err());
    assert!(
        registry
            .clone()
            .with_class(ClassMeta::new("Square").extends("Polygon"))
            .is_err()
    );
    assert!(
        registry
            .with_class(ClassMeta::new("Square").extends("Shape").with_kind("Other"))
            .unwrap_err()
            .is_configuration()
    );
}

#[test]
fn fields_are_inherited() {
    let registry = ClassRegistry::new()
        .with_class(ClassMeta::new("Author").with_field(FieldSchema::collection(
            "books",
            RelationSchema::list("Book"),
        )))
        .unwrap()
        .with_class(ClassMeta::new("Poet").extends("Author"))
        .unwrap();
    let (declaring, field) = registry.field("Poet", "books").unwrap();
    assert_eq!(&*declaring.name, "Author");
    assert!(field.relation().is_some());
    assert_eq!(registry.all_fields("Poet").len(), 1);
}

// =============================================================================
// Storage Versions
// =============================================================================

#[test]
fn owned_relations_follow_the_version() {
    let legacy = StorageVersion::ParentsDoNotReferToChildren;
    let writing = StorageVersion::WriteOwnedChildKeysToParents;
    let reading = StorageVersion::ReadOwnedChildKeysFromParents;

    assert!(!legacy.writes_child_keys(true));
    assert!(writing.writes_child_keys(true));
    assert!(!writing.reads_child_keys(true));
    assert!(reading.reads_child_keys(true));
    assert!(legacy.reads_child_keys(false));
    assert_eq!(StorageVersion::default(), reading);
}

#[test]
fn versions_parse_by_name() {
    for version in StorageVersion::ALL {
        assert_eq!(version.name().parse::<StorageVersion>().unwrap(), version);
    }
    let err = "NEWEST".parse::<StorageVersion>().unwrap_err();
    assert!(err.to_string().contains("PARENTS_DO_NOT_REFER_TO_CHILDREN"));
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn config_from_properties() {
    let config = StoreConfig::from_properties([
        (STORAGE_VERSION_PROPERTY, "WRITE_OWNED_CHILD_KEYS_TO_PARENTS"),
        (MAX_ENTITY_GROUPS_PROPERTY, "5"),
        ("unrelated", "x"),
    ])
    .unwrap();
    assert_eq!(
        config.storage_version,
        StorageVersion::WriteOwnedChildKeysToParents
    );
    assert_eq!(config.max_entity_groups, 5);
}

#[test]
fn bad_config_values_are_rejected() {
    assert!(StoreConfig::from_properties([(MAX_ENTITY_GROUPS_PROPERTY, "0")]).is_err());
    assert!(StoreConfig::from_properties([(STORAGE_VERSION_PROPERTY, "latest")]).is_err());
}
