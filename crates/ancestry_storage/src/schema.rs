//! Class and relationship metadata.
//!
//! Classes map onto datastore kinds. Subclasses share their superclass's kind
//! and are told apart by a discriminator property. Collection-valued fields
//! carry a [`RelationSchema`] describing how membership is stored.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use ancestry_foundation::{Error, Result, Type, Value};

/// Property holding a record's discriminator value.
pub const DISCRIMINATOR_PROPERTY: &str = "__discriminator__";

// =============================================================================
// Storage version
// =============================================================================

/// On-disk encoding of owned relationships.
///
/// Versions are ordered; each is read-compatible with the one before it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StorageVersion {
    /// Children are discovered by ancestor query and filtered by depth.
    ParentsDoNotReferToChildren,
    /// Parents also store child key lists, but reads still use ancestor
    /// queries.
    WriteOwnedChildKeysToParents,
    /// Parent-held key lists are the source of truth.
    #[default]
    ReadOwnedChildKeysFromParents,
}

impl StorageVersion {
    /// Every version, oldest first.
    pub const ALL: [StorageVersion; 3] = [
        Self::ParentsDoNotReferToChildren,
        Self::WriteOwnedChildKeysToParents,
        Self::ReadOwnedChildKeysFromParents,
    ];

    /// Returns the configuration name of this version.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ParentsDoNotReferToChildren => "PARENTS_DO_NOT_REFER_TO_CHILDREN",
            Self::WriteOwnedChildKeysToParents => "WRITE_OWNED_CHILD_KEYS_TO_PARENTS",
            Self::ReadOwnedChildKeysFromParents => "READ_OWNED_CHILD_KEYS_FROM_PARENTS",
        }
    }

    /// Returns true if this version is `other` or newer.
    #[must_use]
    pub fn at_least(self, other: StorageVersion) -> bool {
        self >= other
    }

    /// Whether a relation's parent record stores the child key list.
    ///
    /// Unowned relations always do; there is no other way to find members.
    #[must_use]
    pub fn writes_child_keys(self, owned: bool) -> bool {
        !owned || self.at_least(Self::WriteOwnedChildKeysToParents)
    }

    /// Whether membership is read from the parent's key list rather than
    /// discovered by ancestor query.
    #[must_use]
    pub fn reads_child_keys(self, owned: bool) -> bool {
        !owned || self.at_least(Self::ReadOwnedChildKeysFromParents)
    }
}

impl fmt::Display for StorageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StorageVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|version| version.name() == s)
            .ok_or_else(|| {
                let legal: Vec<_> = Self::ALL.iter().map(|v| v.name()).collect();
                Error::configuration(format!(
                    "unknown storage version {s:?}; legal values are {}",
                    legal.join(", ")
                ))
            })
    }
}

// =============================================================================
// Relationship metadata
// =============================================================================

/// Collection shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// Ordered list.
    List,
    /// Unordered set.
    Set,
}

/// Where a list element's position is stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderMapping {
    /// No position is stored.
    None,
    /// A field of the element class holds the position.
    Field(Arc<str>),
    /// A property that is not a field of the element class.
    Surrogate {
        /// Property name.
        property: Arc<str>,
        /// Whether the property may be cleared.
        nullable: bool,
    },
}

impl OrderMapping {
    /// Returns the property that holds positions, if any.
    #[must_use]
    pub fn property(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Field(name) | Self::Surrogate { property: name, .. } => Some(name),
        }
    }
}

/// One key of a declared multi-field list ordering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldOrder {
    /// Field name. The primary-key field name sorts by record key.
    pub field: Arc<str>,
    /// True for ascending.
    pub ascending: bool,
}

impl FieldOrder {
    /// Ascending order on a field.
    #[must_use]
    pub fn asc(field: &str) -> Self {
        Self {
            field: Arc::from(field),
            ascending: true,
        }
    }

    /// Descending order on a field.
    #[must_use]
    pub fn desc(field: &str) -> Self {
        Self {
            field: Arc::from(field),
            ascending: false,
        }
    }
}

/// Metadata of a collection-valued field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationSchema {
    /// List or set.
    pub kind: CollectionKind,
    /// Declared element class (may be an interface or a superclass).
    pub element_class: Arc<str>,
    /// Elements are keyed under the owner and can never change owner.
    pub owned: bool,
    /// Name of the element field referring back to the owner.
    pub mapped_by: Option<Arc<str>>,
    /// Elements are deleted with the owner and when removed.
    pub dependent: bool,
    /// Elements are deleted when removed from the collection.
    pub orphan_removal: bool,
    /// The element's reference to the owner may be cleared.
    pub nullable_fk: bool,
    /// Position storage for indexed lists.
    pub order: OrderMapping,
    /// Declared ordering; when non-empty the list is ordered by these fields
    /// instead of by position.
    pub field_orders: Vec<FieldOrder>,
}

impl RelationSchema {
    fn new(kind: CollectionKind, element_class: &str) -> Self {
        Self {
            kind,
            element_class: Arc::from(element_class),
            owned: true,
            mapped_by: None,
            dependent: false,
            orphan_removal: false,
            nullable_fk: true,
            order: OrderMapping::None,
            field_orders: Vec::new(),
        }
    }

    /// An owned list of `element_class`.
    #[must_use]
    pub fn list(element_class: &str) -> Self {
        Self::new(CollectionKind::List, element_class)
    }

    /// An owned set of `element_class`.
    #[must_use]
    pub fn set(element_class: &str) -> Self {
        Self::new(CollectionKind::Set, element_class)
    }

    /// Marks the relation as unowned.
    #[must_use]
    pub fn unowned(mut self) -> Self {
        self.owned = false;
        self
    }

    /// Makes the relation bidirectional through the element's field.
    #[must_use]
    pub fn mapped_by(mut self, field: &str) -> Self {
        self.mapped_by = Some(Arc::from(field));
        self
    }

    /// Marks elements as dependent on the owner.
    #[must_use]
    pub fn dependent(mut self) -> Self {
        self.dependent = true;
        self
    }

    /// Deletes elements removed from the collection.
    #[must_use]
    pub fn orphan_removal(mut self) -> Self {
        self.orphan_removal = true;
        self
    }

    /// Sets whether the element's owner reference may be cleared.
    #[must_use]
    pub fn with_nullable_fk(mut self, nullable: bool) -> Self {
        self.nullable_fk = nullable;
        self
    }

    /// Stores positions in a field of the element class.
    #[must_use]
    pub fn with_order_field(mut self, field: &str) -> Self {
        self.order = OrderMapping::Field(Arc::from(field));
        self
    }

    /// Stores positions in a property outside the element class.
    #[must_use]
    pub fn with_surrogate_order(mut self, property: &str, nullable: bool) -> Self {
        self.order = OrderMapping::Surrogate {
            property: Arc::from(property),
            nullable,
        };
        self
    }

    /// Orders the list by declared fields instead of positions.
    #[must_use]
    pub fn ordered_by(mut self, order: FieldOrder) -> Self {
        self.field_orders.push(order);
        self
    }

    /// Returns true for lists whose elements carry a position.
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        self.kind == CollectionKind::List && self.field_orders.is_empty()
    }

    /// Returns true if the relation is bidirectional.
    #[must_use]
    pub fn is_bidirectional(&self) -> bool {
        self.mapped_by.is_some()
    }

    /// Returns true if removed elements must be deleted rather than detached.
    #[must_use]
    pub fn deletes_removed_elements(&self) -> bool {
        self.dependent || self.orphan_removal
    }
}

// =============================================================================
// Class metadata
// =============================================================================

/// What a field holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// A plain value.
    Value(Type),
    /// A reference to another object.
    Reference {
        /// Referenced class.
        class: Arc<str>,
        /// The reference is the owning parent and is derived from the key.
        parent: bool,
    },
    /// A collection of other objects.
    Collection(RelationSchema),
}

/// A named field of a class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSchema {
    /// Field name, also the property name.
    pub name: Arc<str>,
    /// Field contents.
    pub kind: FieldKind,
}

impl FieldSchema {
    /// A value field.
    #[must_use]
    pub fn value(name: &str, ty: Type) -> Self {
        Self {
            name: Arc::from(name),
            kind: FieldKind::Value(ty),
        }
    }

    /// A reference field stored as a key property.
    #[must_use]
    pub fn reference(name: &str, class: &str) -> Self {
        Self {
            name: Arc::from(name),
            kind: FieldKind::Reference {
                class: Arc::from(class),
                parent: false,
            },
        }
    }

    /// A reference to the owning parent, derived from the record key.
    #[must_use]
    pub fn parent(name: &str, class: &str) -> Self {
        Self {
            name: Arc::from(name),
            kind: FieldKind::Reference {
                class: Arc::from(class),
                parent: true,
            },
        }
    }

    /// A collection field.
    #[must_use]
    pub fn collection(name: &str, relation: RelationSchema) -> Self {
        Self {
            name: Arc::from(name),
            kind: FieldKind::Collection(relation),
        }
    }

    /// Returns the relation if this is a collection field.
    #[must_use]
    pub fn relation(&self) -> Option<&RelationSchema> {
        match &self.kind {
            FieldKind::Collection(relation) => Some(relation),
            _ => None,
        }
    }
}

/// Metadata for a persistent class or interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassMeta {
    /// Class name.
    pub name: Arc<str>,
    /// Datastore kind. Inherited from the superclass when unset.
    pub kind: Option<Arc<str>>,
    /// Direct superclass.
    pub superclass: Option<Arc<str>>,
    /// Implemented interfaces.
    pub interfaces: Vec<Arc<str>>,
    /// Discriminator value written to [`DISCRIMINATOR_PROPERTY`].
    pub discriminator: Option<Arc<str>>,
    /// Name of the primary-key pseudo-field.
    pub primary_key: Arc<str>,
    /// Declared fields (inherited fields are not repeated).
    pub fields: Vec<FieldSchema>,
    /// Interfaces have no records of their own.
    pub is_interface: bool,
}

impl ClassMeta {
    /// Creates a concrete class.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            kind: None,
            superclass: None,
            interfaces: Vec::new(),
            discriminator: None,
            primary_key: Arc::from("id"),
            fields: Vec::new(),
            is_interface: false,
        }
    }

    /// Creates an interface.
    #[must_use]
    pub fn interface(name: &str) -> Self {
        Self {
            is_interface: true,
            ..Self::new(name)
        }
    }

    /// Sets the datastore kind.
    #[must_use]
    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = Some(Arc::from(kind));
        self
    }

    /// Sets the superclass.
    #[must_use]
    pub fn extends(mut self, superclass: &str) -> Self {
        self.superclass = Some(Arc::from(superclass));
        self
    }

    /// Adds an implemented interface.
    #[must_use]
    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(Arc::from(interface));
        self
    }

    /// Sets the discriminator value.
    #[must_use]
    pub fn with_discriminator(mut self, value: &str) -> Self {
        self.discriminator = Some(Arc::from(value));
        self
    }

    /// Sets the primary-key field name.
    #[must_use]
    pub fn with_primary_key(mut self, field: &str) -> Self {
        self.primary_key = Arc::from(field);
        self
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Returns the datastore kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(&self.name)
    }

    /// Returns a declared field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| &*f.name == name)
    }
}

/// Registry of all persistent classes.
#[derive(Clone, Debug, Default)]
pub struct ClassRegistry {
    classes: HashMap<Arc<str>, ClassMeta>,
    order: Vec<Arc<str>>,
}

impl ClassRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class. Superclasses and interfaces must come first.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for duplicates, unknown supertypes, or a
    /// class whose kind differs from its superclass's.
    pub fn register(&mut self, mut meta: ClassMeta) -> Result<()> {
        if self.classes.contains_key(&meta.name) {
            return Err(Error::configuration(format!(
                "class {} is already registered",
                meta.name
            )));
        }
        for interface in &meta.interfaces {
            match self.classes.get(interface) {
                Some(iface) if iface.is_interface => {}
                _ => {
                    return Err(Error::configuration(format!(
                        "class {} implements unknown interface {interface}",
                        meta.name
                    )));
                }
            }
        }
        if let Some(superclass) = &meta.superclass {
            let parent = self.classes.get(superclass).ok_or_else(|| {
                Error::configuration(format!(
                    "class {} extends unknown class {superclass}",
                    meta.name
                ))
            })?;
            let inherited: Arc<str> = Arc::from(parent.kind());
            match &meta.kind {
                Some(kind) if *kind != inherited => {
                    return Err(Error::configuration(format!(
                        "class {} declares kind {kind} but its superclass uses {inherited}",
                        meta.name
                    )));
                }
                _ => meta.kind = Some(inherited),
            }
            meta.primary_key = Arc::clone(&parent.primary_key);
        }
        self.order.push(Arc::clone(&meta.name));
        self.classes.insert(Arc::clone(&meta.name), meta);
        Ok(())
    }

    /// Builder-style registration.
    ///
    /// # Errors
    ///
    /// See [`ClassRegistry::register`].
    pub fn with_class(mut self, meta: ClassMeta) -> Result<Self> {
        self.register(meta)?;
        Ok(self)
    }

    /// Looks up a class.
    #[must_use]
    pub fn class(&self, name: &str) -> Option<&ClassMeta> {
        self.classes.get(name)
    }

    /// Looks up a class that must exist.
    ///
    /// # Errors
    ///
    /// Returns an invalid argument error for unknown classes.
    pub fn require(&self, name: &str) -> Result<&ClassMeta> {
        self.class(name)
            .ok_or_else(|| Error::invalid_argument(format!("unknown class {name}")))
    }

    /// Iterates over classes in registration order.
    pub fn classes(&self) -> impl Iterator<Item = &ClassMeta> {
        self.order.iter().filter_map(|name| self.classes.get(name))
    }

    /// Returns true if an instance of `class` can be used where `target` is
    /// declared.
    #[must_use]
    pub fn is_assignable(&self, class: &str, target: &str) -> bool {
        if class == target {
            return true;
        }
        let Some(meta) = self.class(class) else {
            return false;
        };
        meta.interfaces
            .iter()
            .any(|interface| self.is_assignable(interface, target))
            || meta
                .superclass
                .as_deref()
                .is_some_and(|superclass| self.is_assignable(superclass, target))
    }

    /// Returns the concrete classes assignable to `target`.
    #[must_use]
    pub fn implementations(&self, target: &str) -> Vec<&ClassMeta> {
        self.classes()
            .filter(|meta| !meta.is_interface && self.is_assignable(&meta.name, target))
            .collect()
    }

    /// Resolves the concrete class of a record from its kind and
    /// discriminator.
    #[must_use]
    pub fn resolve(&self, kind: &str, discriminator: Option<&Value>) -> Option<&ClassMeta> {
        let mut candidates = self
            .classes()
            .filter(|meta| !meta.is_interface && meta.kind() == kind);
        match discriminator.and_then(Value::as_str) {
            Some(value) => candidates.find(|meta| meta.discriminator.as_deref() == Some(value)),
            None => candidates.find(|meta| {
                meta.superclass
                    .as_deref()
                    .and_then(|superclass| self.class(superclass))
                    .is_none_or(|parent| parent.kind() != kind || parent.is_interface)
            }),
        }
    }

    /// Finds a field on a class or its superclasses, with the declaring class.
    #[must_use]
    pub fn field(&self, class: &str, field: &str) -> Option<(&ClassMeta, &FieldSchema)> {
        let meta = self.class(class)?;
        match meta.field(field) {
            Some(schema) => Some((meta, schema)),
            None => self.field(meta.superclass.as_deref()?, field),
        }
    }

    /// Returns every field of a class, superclass fields first.
    #[must_use]
    pub fn all_fields(&self, class: &str) -> Vec<(&ClassMeta, &FieldSchema)> {
        let Some(meta) = self.class(class) else {
            return Vec::new();
        };
        let mut fields = meta
            .superclass
            .as_deref()
            .map(|superclass| self.all_fields(superclass))
            .unwrap_or_default();
        fields.extend(meta.fields.iter().map(|field| (meta, field)));
        fields
    }
}
