//! Relation store registry and metadata validation.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use ancestry_foundation::{Error, Result};
use ancestry_storage::{
    ClassRegistry, CollectionKind, Datastore, RelationSchema, StorageVersion, StoreConfig,
};

use crate::fk_store::FkStore;
use crate::list::FkListStore;
use crate::session::{ObjectId, Session};
use crate::set::FkSetStore;

/// The store backing one collection field.
#[derive(Clone, Debug)]
pub enum RelationStore {
    /// An ordered collection.
    List(FkListStore),
    /// An unordered collection.
    Set(FkSetStore),
}

impl RelationStore {
    /// Returns the shared store state.
    #[must_use]
    pub fn base(&self) -> &FkStore {
        match self {
            Self::List(store) => store.base(),
            Self::Set(store) => store.base(),
        }
    }

    /// Returns the relation metadata.
    #[must_use]
    pub fn relation(&self) -> &RelationSchema {
        self.base().relation()
    }

    /// Returns the list store, if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&FkListStore> {
        match self {
            Self::List(store) => Some(store),
            Self::Set(_) => None,
        }
    }

    /// Returns the set store, if this is a set.
    #[must_use]
    pub fn as_set(&self) -> Option<&FkSetStore> {
        match self {
            Self::Set(store) => Some(store),
            Self::List(_) => None,
        }
    }

    /// Removes an element from the owner's collection.
    ///
    /// # Errors
    ///
    /// See [`FkListStore::remove`] and [`FkSetStore::remove`].
    pub fn remove<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        element: ObjectId,
    ) -> Result<bool> {
        match self {
            Self::List(store) => store.remove(session, owner, element),
            Self::Set(store) => store.remove(session, owner, element),
        }
    }

    /// Returns the owner's elements.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn elements<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
    ) -> Result<Vec<ObjectId>> {
        match self {
            Self::List(store) => store.elements(session, owner),
            Self::Set(store) => store.elements(session, owner),
        }
    }

    /// Returns the number of elements.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn size<D: Datastore>(&self, session: &mut Session<D>, owner: ObjectId) -> Result<usize> {
        self.base().size(session, owner)
    }
}

/// Builds and holds a store for every collection field.
///
/// Construction validates the relationship metadata, so a manager that exists
/// describes a consistent mapping.
#[derive(Debug)]
pub struct StoreManager {
    /// Class metadata.
    registry: ClassRegistry,

    /// Storage version and validation flags.
    config: StoreConfig,

    /// Stores keyed by (declaring class, field).
    stores: HashMap<(Arc<str>, Arc<str>), RelationStore>,

    /// Store keys in declaration order.
    order: Vec<(Arc<str>, Arc<str>)>,
}

impl StoreManager {
    /// Validates the metadata and builds the stores.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for inconsistent relationship metadata.
    pub fn new(registry: ClassRegistry, config: StoreConfig) -> Result<Self> {
        validate_relations_of_same_type(&registry, &config)?;

        let mut stores = HashMap::new();
        let mut order = Vec::new();
        for meta in registry.classes() {
            for field in &meta.fields {
                let Some(relation) = field.relation() else {
                    continue;
                };
                let base = FkStore::new(&registry, &config, &meta.name, &field.name, relation)?;
                let store = match relation.kind {
                    CollectionKind::List => RelationStore::List(FkListStore::new(base)),
                    CollectionKind::Set => RelationStore::Set(FkSetStore::new(base)),
                };
                debug!(
                    class = %meta.name,
                    field = %field.name,
                    version = %config.storage_version,
                    "built relation store"
                );
                let id = (Arc::clone(&meta.name), Arc::clone(&field.name));
                order.push(id.clone());
                stores.insert(id, store);
            }
        }

        Ok(Self {
            registry,
            config,
            stores,
            order,
        })
    }

    /// Returns the class registry.
    #[must_use]
    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the store for a collection field, looking through
    /// superclasses.
    ///
    /// # Errors
    ///
    /// Returns an invalid argument error if the class has no such collection.
    pub fn store(&self, class: &str, field: &str) -> Result<&RelationStore> {
        self.registry
            .field(class, field)
            .and_then(|(declaring, schema)| {
                self.stores
                    .get(&(Arc::clone(&declaring.name), Arc::clone(&schema.name)))
            })
            .ok_or_else(|| {
                Error::invalid_argument(format!("class {class} has no collection field {field}"))
            })
    }

    /// Returns the list store for a field.
    ///
    /// # Errors
    ///
    /// Returns an invalid argument error if the field is not a list.
    pub fn list_store(&self, class: &str, field: &str) -> Result<&FkListStore> {
        self.store(class, field)?
            .as_list()
            .ok_or_else(|| Error::invalid_argument(format!("{class}.{field} is not a list")))
    }

    /// Returns the set store for a field.
    ///
    /// # Errors
    ///
    /// Returns an invalid argument error if the field is not a set.
    pub fn set_store(&self, class: &str, field: &str) -> Result<&FkSetStore> {
        self.store(class, field)?
            .as_set()
            .ok_or_else(|| Error::invalid_argument(format!("{class}.{field} is not a set")))
    }

    /// Iterates over every store in declaration order.
    pub fn stores(&self) -> impl Iterator<Item = &RelationStore> {
        self.order.iter().filter_map(|id| self.stores.get(id))
    }

    /// Returns the stores whose elements may be instances of `class`.
    #[must_use]
    pub fn relations_holding(&self, class: &str) -> Vec<&RelationStore> {
        self.stores()
            .filter(|store| {
                self.registry
                    .is_assignable(class, &store.relation().element_class)
            })
            .collect()
    }

    /// Returns the stores of collections declared on `class` or its
    /// superclasses.
    #[must_use]
    pub fn relations_of(&self, class: &str) -> Vec<&RelationStore> {
        self.stores()
            .filter(|store| self.registry.is_assignable(class, store.base().owner_class()))
            .collect()
    }
}

/// Below the key-reading storage version, owned children are discovered by
/// ancestor query on their kind, so two owned relations whose element types
/// overlap would see each other's children.
fn validate_relations_of_same_type(registry: &ClassRegistry, config: &StoreConfig) -> Result<()> {
    if config.allow_multiple_relations_of_same_type
        || config
            .storage_version
            .at_least(StorageVersion::ReadOwnedChildKeysFromParents)
    {
        return Ok(());
    }
    for meta in registry.classes() {
        let owned: Vec<_> = registry
            .all_fields(&meta.name)
            .into_iter()
            .filter_map(|(_, field)| {
                field
                    .relation()
                    .filter(|relation| relation.owned)
                    .map(|relation| (field, relation))
            })
            .collect();
        for (i, (first, a)) in owned.iter().enumerate() {
            for (second, b) in &owned[i + 1..] {
                if registry.is_assignable(&a.element_class, &b.element_class)
                    || registry.is_assignable(&b.element_class, &a.element_class)
                {
                    return Err(Error::configuration(format!(
                        "class {} has owned relations {} and {} of the same element type {}; \
                         use storage version {} or set {} to true",
                        meta.name,
                        first.name,
                        second.name,
                        a.element_class,
                        StorageVersion::ReadOwnedChildKeysFromParents,
                        ancestry_storage::config::ALLOW_MULTIPLE_RELATIONS_PROPERTY,
                    )));
                }
            }
        }
    }
    Ok(())
}
