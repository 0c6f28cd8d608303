//! State and reads shared by list and set stores.

use std::sync::Arc;

use tracing::debug;

use ancestry_foundation::{Error, ErrorContext, Key, Result, Type};
use ancestry_storage::{
    ClassMeta, ClassRegistry, CollectionKind, Datastore, FieldKind, FieldSchema, Filter,
    OrderMapping, Record, RelationSchema, Sort, StorageVersion, StoreConfig,
};

use crate::ordering::{self, OrderIndex};
use crate::planner;
use crate::session::{ObjectId, Session};
use crate::validate;

/// A collection field whose membership is held by element-side foreign keys
/// or a parent-side key list.
#[derive(Clone, Debug)]
pub struct FkStore {
    owner_class: Arc<str>,
    field: Arc<str>,
    relation: RelationSchema,

    /// Kind shared by every element class.
    element_kind: Arc<str>,
    element_primary_key: Arc<str>,
    version: StorageVersion,

    /// Position storage, for indexed lists only.
    order: Option<OrderIndex>,
}

impl FkStore {
    /// Validates a relation and builds its store.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the element class is unknown or its
    /// implementations span several kinds, if `mapped_by` or the order field
    /// does not fit, or if an indexed list has no order mapping although its
    /// members are found by ancestor query.
    pub fn new(
        registry: &ClassRegistry,
        config: &StoreConfig,
        owner_class: &str,
        field: &str,
        relation: &RelationSchema,
    ) -> Result<Self> {
        let name = format!("{owner_class}.{field}");
        let element = registry.class(&relation.element_class).ok_or_else(|| {
            Error::configuration(format!(
                "{name} refers to unknown class {}",
                relation.element_class
            ))
        })?;
        let candidates: Vec<&ClassMeta> = if element.is_interface {
            registry.implementations(&element.name)
        } else {
            vec![element]
        };
        let mut kinds: Vec<&str> = candidates.iter().map(|meta| meta.kind()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        let element_kind: Arc<str> = match kinds.as_slice() {
            [kind] => Arc::from(*kind),
            [] => {
                return Err(Error::configuration(format!(
                    "{name}: {} has no persistent implementation",
                    relation.element_class
                )));
            }
            _ => {
                return Err(Error::configuration(format!(
                    "{name}: implementations of {} map to several kinds ({})",
                    relation.element_class,
                    kinds.join(", ")
                )));
            }
        };

        if let Some(mapped_by) = &relation.mapped_by {
            for meta in &candidates {
                let fits = matches!(
                    registry.field(&meta.name, mapped_by),
                    Some((_, FieldSchema { kind: FieldKind::Reference { class, parent }, .. }))
                        if registry.is_assignable(owner_class, class) && *parent == relation.owned
                );
                if !fits {
                    return Err(Error::configuration(format!(
                        "{name} is mapped by {}.{mapped_by}, which is not a {} reference to {owner_class}",
                        meta.name,
                        if relation.owned { "parent" } else { "plain" }
                    )));
                }
            }
        }

        let order = if relation.is_indexed() {
            match &relation.order {
                OrderMapping::None => None,
                OrderMapping::Field(order_field) => {
                    let ty = candidates
                        .iter()
                        .find_map(|meta| match registry.field(&meta.name, order_field) {
                            Some((_, FieldSchema {
                                kind: FieldKind::Value(ty),
                                ..
                            })) => Some(ty.clone()),
                            _ => None,
                        })
                        .ok_or_else(|| {
                            Error::configuration(format!(
                                "{name}: order field {order_field} is not a value field of {}",
                                relation.element_class
                            ))
                        })?;
                    if !ty.is_wrapper_equivalent(&Type::Int) {
                        return Err(Error::configuration(format!(
                            "{name}: order field {order_field} must be an integer, found {ty}"
                        )));
                    }
                    Some(OrderIndex::new(order_field, ty.is_nullable()))
                }
                OrderMapping::Surrogate { property, nullable } => {
                    Some(OrderIndex::new(property, *nullable))
                }
            }
        } else {
            None
        };

        let version = config.storage_version;
        if relation.is_indexed() && order.is_none() && !version.reads_child_keys(relation.owned) {
            return Err(Error::configuration(format!(
                "{name} is an indexed list without an order mapping, which storage version \
                 {version} requires"
            )));
        }

        let element_primary_key = Arc::clone(&element.primary_key);
        if relation.kind == CollectionKind::List {
            for order in &relation.field_orders {
                let known = *order.field == *element_primary_key
                    || candidates
                        .iter()
                        .any(|meta| registry.field(&meta.name, &order.field).is_some());
                if !known {
                    return Err(Error::configuration(format!(
                        "{name} is ordered by unknown field {}",
                        order.field
                    )));
                }
            }
        }

        Ok(Self {
            owner_class: Arc::from(owner_class),
            field: Arc::from(field),
            relation: relation.clone(),
            element_kind,
            element_primary_key,
            version,
            order,
        })
    }

    /// Returns the class declaring the collection.
    #[must_use]
    pub fn owner_class(&self) -> &str {
        &self.owner_class
    }

    /// Returns the collection field name.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    pub(crate) fn field_name(&self) -> &Arc<str> {
        &self.field
    }

    /// Returns the relation metadata.
    #[must_use]
    pub fn relation(&self) -> &RelationSchema {
        &self.relation
    }

    /// Returns the datastore kind of the elements.
    #[must_use]
    pub fn element_kind(&self) -> &str {
        &self.element_kind
    }

    /// Returns the storage version in effect.
    #[must_use]
    pub const fn storage_version(&self) -> StorageVersion {
        self.version
    }

    /// Members are read from the owner's key list.
    #[must_use]
    pub fn reads_child_keys(&self) -> bool {
        self.version.reads_child_keys(self.relation.owned)
    }

    /// Writes keep the owner's key list up to date.
    #[must_use]
    pub fn writes_child_keys(&self) -> bool {
        self.version.writes_child_keys(self.relation.owned)
    }

    /// Returns the position storage of an indexed list.
    #[must_use]
    pub fn order_index(&self) -> Option<&OrderIndex> {
        self.order.as_ref()
    }

    /// Position storage, when positions live on element records.
    pub(crate) fn positions(&self) -> Option<&OrderIndex> {
        if self.reads_child_keys() {
            None
        } else {
            self.order.as_ref()
        }
    }

    /// Sort orders that put members in collection order.
    #[must_use]
    pub fn child_sorts(&self) -> Vec<Sort> {
        if self.relation.kind != CollectionKind::List {
            return Vec::new();
        }
        if !self.relation.is_indexed() {
            return ordering::field_sorts(&self.relation.field_orders, &self.element_primary_key);
        }
        self.order
            .as_ref()
            .map(OrderIndex::sort_predicates)
            .unwrap_or_default()
    }

    // =========================================================================
    // Guards and error context
    // =========================================================================

    fn context(&self, operation: &str, owner_key: Option<Key>) -> ErrorContext {
        ErrorContext::new()
            .with_operation(operation)
            .with_owner(owner_key)
            .with_field(self.field.to_string())
    }

    /// Runs a read after checking the owner, attaching context to errors.
    pub(crate) fn read<D: Datastore, T>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        operation: &str,
        f: impl FnOnce(&mut Session<D>) -> Result<T>,
    ) -> Result<T> {
        validate::owner(session, self, owner)
            .and_then(|()| f(session))
            .map_err(|err| err.with_context(self.context(operation, session.key(owner))))
    }

    /// Runs a mutation unless one is already running for the same owner and
    /// field, in which case the nested call is skipped and `None` returned.
    pub(crate) fn guarded<D: Datastore, T>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        operation: &str,
        f: impl FnOnce(&mut Session<D>) -> Result<T>,
    ) -> Result<Option<T>> {
        validate::owner(session, self, owner)
            .and_then(|()| {
                if !session.enter(owner, &self.field) {
                    debug!(
                        owner = %owner,
                        field = %self.field,
                        operation,
                        "skipping nested collection mutation"
                    );
                    return Ok(None);
                }
                let result = f(session);
                session.leave(owner, &self.field);
                result.map(Some)
            })
            .map_err(|err| err.with_context(self.context(operation, session.key(owner))))
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Member records in collection order.
    pub(crate) fn member_records<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        owner_key: &Key,
        filters: Vec<Filter>,
    ) -> Result<Vec<Record>> {
        let plan = planner::plan(self, session, owner, owner_key, filters, false);
        planner::fetch(self, session, owner_key, plan)
    }

    /// Member keys in collection order.
    pub(crate) fn member_keys<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        owner_key: &Key,
    ) -> Result<Vec<Key>> {
        let plan = planner::plan(self, session, owner, owner_key, Vec::new(), true);
        Ok(planner::fetch(self, session, owner_key, plan)?
            .into_iter()
            .map(|record| record.key)
            .collect())
    }

    /// Returns the owner's elements in collection order.
    ///
    /// # Errors
    ///
    /// Returns an error if the owner is not persistent or a read fails.
    pub fn elements<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
    ) -> Result<Vec<ObjectId>> {
        self.read(session, owner, "elements", |session| {
            self.elements_inner(session, owner)
        })
    }

    pub(crate) fn elements_inner<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
    ) -> Result<Vec<ObjectId>> {
        let Some(owner_key) = session.key(owner) else {
            return Ok(session.deferred_members(owner, &self.field).to_vec());
        };
        self.member_records(session, owner, &owner_key, Vec::new())?
            .into_iter()
            .map(|record| session.materialize(record))
            .collect()
    }

    /// Returns the number of elements.
    ///
    /// # Errors
    ///
    /// Returns an error if the owner is not persistent or a read fails.
    pub fn size<D: Datastore>(&self, session: &mut Session<D>, owner: ObjectId) -> Result<usize> {
        self.read(session, owner, "size", |session| self.size_inner(session, owner))
    }

    pub(crate) fn size_inner<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
    ) -> Result<usize> {
        match session.key(owner) {
            Some(owner_key) => Ok(self.member_keys(session, owner, &owner_key)?.len()),
            None => Ok(session.deferred_members(owner, &self.field).len()),
        }
    }

    /// Returns true if the element belongs to the owner's collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the owner is not persistent.
    pub fn contains<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        element: ObjectId,
    ) -> Result<bool> {
        self.read(session, owner, "contains", |session| {
            self.contains_inner(session, owner, element)
        })
    }

    pub(crate) fn contains_inner<D: Datastore>(
        &self,
        session: &Session<D>,
        owner: ObjectId,
        element: ObjectId,
    ) -> Result<bool> {
        if !validate::for_reading(session, self, element)? {
            return Ok(false);
        }
        let Some(owner_key) = session.key(owner) else {
            return Ok(session
                .deferred_members(owner, &self.field)
                .contains(&element));
        };
        let Some(key) = session.key(element) else {
            return Ok(false);
        };
        if self.reads_child_keys() {
            if let Some(keys) = session.key_list(owner, &self.field) {
                return Ok(keys.contains(&key));
            }
            if !self.relation.owned {
                return Ok(false);
            }
        }
        Ok(owner_key.is_parent_of(&key))
    }
}
