//! Execution context for collection operations.
//!
//! A [`Session`] tracks every object it has created or loaded, keyed by an
//! [`ObjectId`] handle. It owns the datastore client and the queue of child
//! writes that cannot be issued yet because the owner has no key.
//!
//! Objects move through [`ObjectState`]:
//! - `Transient` objects are unknown to the datastore
//! - `New` objects will be inserted on the next flush or as soon as a
//!   collection operation needs their key
//! - `Persistent` objects mirror a stored record
//! - `Deleted` objects had their record removed
//! - `Detached` objects keep their state but are not tracked for writes

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use ancestry_foundation::{Error, Key, PropertyMap, Result, Value};
use ancestry_storage::{
    ClassRegistry, DISCRIMINATOR_PROPERTY, Datastore, FieldKind, Record, StorageVersion,
};

use crate::lifecycle;
use crate::manager::StoreManager;

/// Handle to an object tracked by a [`Session`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(usize);

impl ObjectId {
    /// Returns the raw index of this handle.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a tracked object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectState {
    /// Not persisted and not scheduled for insertion.
    Transient,
    /// Scheduled for insertion.
    New,
    /// Mirrors a stored record.
    Persistent,
    /// The stored record was removed.
    Deleted,
    /// Detached from the session; changes are not written.
    Detached,
}

/// Target of a single-valued reference field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reference {
    /// An object tracked by the session.
    Object(ObjectId),
    /// A stored key that has not been loaded.
    Key(Key),
}

#[derive(Clone, Debug)]
pub(crate) struct ManagedObject {
    pub(crate) class: Arc<str>,
    pub(crate) key: Option<Key>,
    pub(crate) state: ObjectState,
    pub(crate) properties: PropertyMap,
    pub(crate) references: HashMap<Arc<str>, Reference>,

    /// Owner this object was bound under by an owned relation.
    pub(crate) parent: Option<ObjectId>,

    /// Set by `attach` until the next write.
    pub(crate) reattaching: bool,
    pub(crate) dirty: bool,

    /// The record was first inserted inside the active transaction.
    pub(crate) created_in_txn: bool,
}

impl ManagedObject {
    fn new(class: Arc<str>, state: ObjectState) -> Self {
        Self {
            class,
            key: None,
            state,
            properties: PropertyMap::new(),
            references: HashMap::new(),
            parent: None,
            reattaching: false,
            dirty: false,
            created_in_txn: false,
        }
    }
}

/// A child write that waits for its owner's key.
///
/// Owned children need the owner's key as their key prefix, so they cannot be
/// written before the owner is. The write is applied when the owner is first
/// written, whether by flush or by a collection operation that needs the key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingChildWrite {
    /// The child to write.
    pub element: ObjectId,
    /// The owner whose key the child waits for.
    pub owner: ObjectId,
    /// The child's key is allocated under the owner.
    pub parent: bool,
    /// Element field to point at the owner.
    pub back_reference: Option<Arc<str>>,
    /// Order property and position to stamp on the child.
    pub order: Option<(Arc<str>, i64)>,
}

/// Members appended to a collection whose owner has no key yet.
#[derive(Clone, Debug)]
struct DeferredMembers {
    owner: ObjectId,
    field: Arc<str>,
    elements: Vec<ObjectId>,
    write_keys: bool,
}

/// Execution context tying managed objects to a datastore.
pub struct Session<D: Datastore> {
    /// Raw store client.
    datastore: D,

    /// Relation stores and class metadata.
    manager: Arc<StoreManager>,

    /// Tracked objects, indexed by `ObjectId`.
    objects: Vec<ManagedObject>,

    /// Identity map from stored key to object.
    identity: HashMap<Key, ObjectId>,

    /// Objects persisted explicitly and not yet written.
    pending_roots: Vec<ObjectId>,

    /// Child writes waiting for their owner's key.
    pending_children: Vec<PendingChildWrite>,

    /// Collection members appended before the owner had a key.
    deferred: Vec<DeferredMembers>,

    /// `(owner, field)` pairs with a mutation in progress.
    in_progress: HashSet<(ObjectId, Arc<str>)>,

    /// Objects whose deletion is in progress.
    deleting: HashSet<ObjectId>,
}

impl<D: Datastore> Session<D> {
    /// Creates a session over a datastore.
    #[must_use]
    pub fn new(datastore: D, manager: Arc<StoreManager>) -> Self {
        Self {
            datastore,
            manager,
            objects: Vec::new(),
            identity: HashMap::new(),
            pending_roots: Vec::new(),
            pending_children: Vec::new(),
            deferred: Vec::new(),
            in_progress: HashSet::new(),
            deleting: HashSet::new(),
        }
    }

    /// Returns the datastore client.
    #[must_use]
    pub const fn datastore(&self) -> &D {
        &self.datastore
    }

    /// Returns the datastore client mutably.
    pub fn datastore_mut(&mut self) -> &mut D {
        &mut self.datastore
    }

    /// Returns the store manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<StoreManager> {
        &self.manager
    }

    fn registry(&self) -> &ClassRegistry {
        self.manager.registry()
    }

    pub(crate) fn storage_version(&self) -> StorageVersion {
        self.manager.config().storage_version
    }

    fn object(&self, id: ObjectId) -> Result<&ManagedObject> {
        self.objects
            .get(id.0)
            .ok_or_else(|| Error::invalid_argument(format!("unknown object {id}")))
    }

    fn object_mut(&mut self, id: ObjectId) -> Result<&mut ManagedObject> {
        self.objects
            .get_mut(id.0)
            .ok_or_else(|| Error::invalid_argument(format!("unknown object {id}")))
    }

    fn push_object(&mut self, object: ManagedObject) -> ObjectId {
        let id = ObjectId(self.objects.len());
        self.objects.push(object);
        id
    }

    // =========================================================================
    // Object access
    // =========================================================================

    /// Creates a transient object of a concrete class.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown classes and interfaces.
    pub fn new_object(&mut self, class: &str) -> Result<ObjectId> {
        let meta = self.registry().require(class)?;
        if meta.is_interface {
            return Err(Error::invalid_argument(format!(
                "cannot instantiate interface {class}"
            )));
        }
        let class = Arc::clone(&meta.name);
        Ok(self.push_object(ManagedObject::new(class, ObjectState::Transient)))
    }

    /// Returns the class of an object.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown handles.
    pub fn class_of(&self, id: ObjectId) -> Result<Arc<str>> {
        self.object(id).map(|object| Arc::clone(&object.class))
    }

    /// Returns the lifecycle state of an object.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown handles.
    pub fn state(&self, id: ObjectId) -> Result<ObjectState> {
        self.object(id).map(|object| object.state)
    }

    /// Returns the stored key of an object, if it has one.
    #[must_use]
    pub fn key(&self, id: ObjectId) -> Option<Key> {
        self.objects.get(id.0).and_then(|object| object.key.clone())
    }

    /// Returns the tracked object for a key without loading it.
    #[must_use]
    pub fn lookup(&self, key: &Key) -> Option<ObjectId> {
        self.identity.get(key).copied()
    }

    /// Returns true while an object is being re-attached.
    #[must_use]
    pub fn is_reattaching(&self, id: ObjectId) -> bool {
        self.objects.get(id.0).is_some_and(|object| object.reattaching)
    }

    /// Sets a value field.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the value does not fit the field, or an
    /// invalid argument error if the field is missing or not a value field.
    pub fn set(&mut self, id: ObjectId, field: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let class = self.class_of(id)?;
        let (_, schema) = self.registry().field(&class, field).ok_or_else(|| {
            Error::invalid_argument(format!("class {class} has no field {field}"))
        })?;
        match &schema.kind {
            FieldKind::Value(ty) => {
                if !ty.accepts(&value.value_type()) {
                    return Err(Error::type_mismatch(ty, value.value_type()));
                }
            }
            _ => {
                return Err(Error::invalid_argument(format!(
                    "field {field} of {class} is not a value field"
                )));
            }
        }
        let object = self.object_mut(id)?;
        object.properties.insert(field, value);
        object.dirty = true;
        Ok(())
    }

    /// Gets a value field or stored property.
    #[must_use]
    pub fn get(&self, id: ObjectId, field: &str) -> Option<&Value> {
        self.objects.get(id.0)?.properties.get(field)
    }

    /// Sets or clears a reference field.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the target's class is not assignable to the
    /// field's class.
    pub fn set_reference(
        &mut self,
        id: ObjectId,
        field: &str,
        target: Option<ObjectId>,
    ) -> Result<()> {
        let class = self.class_of(id)?;
        let (_, schema) = self.registry().field(&class, field).ok_or_else(|| {
            Error::invalid_argument(format!("class {class} has no field {field}"))
        })?;
        let FieldKind::Reference {
            class: target_class,
            ..
        } = &schema.kind
        else {
            return Err(Error::invalid_argument(format!(
                "field {field} of {class} is not a reference"
            )));
        };
        let target_class = Arc::clone(target_class);
        if let Some(target) = target {
            let actual = self.class_of(target)?;
            if !self.registry().is_assignable(&actual, &target_class) {
                return Err(Error::type_mismatch(target_class, actual));
            }
        }
        let object = self.object_mut(id)?;
        match target {
            Some(target) => object
                .references
                .insert(Arc::from(field), Reference::Object(target)),
            None => object.references.remove(field),
        };
        object.dirty = true;
        Ok(())
    }

    /// Returns a reference field.
    #[must_use]
    pub fn reference(&self, id: ObjectId, field: &str) -> Option<&Reference> {
        self.objects.get(id.0)?.references.get(field)
    }

    /// Returns the key a reference field points at, if known.
    #[must_use]
    pub fn reference_key(&self, id: ObjectId, field: &str) -> Option<Key> {
        match self.reference(id, field)? {
            Reference::Object(target) => self.key(*target),
            Reference::Key(key) => Some(key.clone()),
        }
    }

    /// Returns true if a reference field points at `target`.
    #[must_use]
    pub fn refers_to(&self, id: ObjectId, field: &str, target: ObjectId) -> bool {
        match self.reference(id, field) {
            Some(Reference::Object(object)) => *object == target,
            Some(Reference::Key(key)) => self.key(target).as_ref() == Some(key),
            None => false,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Schedules an object for insertion.
    ///
    /// Deleted objects are resurrected and detached objects re-attached.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown handles.
    pub fn persist(&mut self, id: ObjectId) -> Result<()> {
        match self.state(id)? {
            ObjectState::Transient | ObjectState::Deleted => {
                self.mark_new(id)?;
                self.pending_roots.push(id);
                Ok(())
            }
            ObjectState::Detached => self.attach(id),
            ObjectState::New | ObjectState::Persistent => Ok(()),
        }
    }

    pub(crate) fn mark_new(&mut self, id: ObjectId) -> Result<()> {
        let object = self.object_mut(id)?;
        object.state = ObjectState::New;
        object.dirty = true;
        Ok(())
    }

    /// Loads an object by key, returning the tracked one if present.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if no record exists.
    pub fn find(&mut self, key: &Key) -> Result<ObjectId> {
        if let Some(id) = self.lookup(key) {
            return Ok(id);
        }
        let record = self.datastore.get(key)?;
        self.materialize(record)
    }

    /// Tracks a record read from the datastore.
    ///
    /// Clean persistent objects are refreshed from the record. The object's
    /// class is resolved from the record's kind and discriminator.
    ///
    /// # Errors
    ///
    /// Returns a store error if no registered class maps to the record.
    pub fn materialize(&mut self, record: Record) -> Result<ObjectId> {
        let manager = Arc::clone(&self.manager);
        let registry = manager.registry();
        if let Some(id) = self.lookup(&record.key) {
            let object = self.object_mut(id)?;
            if object.state == ObjectState::Persistent && !object.dirty {
                absorb(registry, object, record);
            }
            return Ok(id);
        }
        let meta = registry
            .resolve(record.key.kind(), record.get(DISCRIMINATOR_PROPERTY))
            .ok_or_else(|| {
                Error::store(format!("no class is mapped to record {}", record.key))
            })?;
        let key = record.key.clone();
        let mut object = ManagedObject::new(Arc::clone(&meta.name), ObjectState::Persistent);
        object.key = Some(key.clone());
        absorb(registry, &mut object, record);
        let id = self.push_object(object);
        self.identity.insert(key, id);
        Ok(id)
    }

    /// Deletes an object, its dependents, and its memberships.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is transient or a write fails.
    pub fn delete(&mut self, id: ObjectId) -> Result<()> {
        lifecycle::delete_object(self, id)
    }

    /// Stops tracking writes for an object.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown handles.
    pub fn detach(&mut self, id: ObjectId) -> Result<()> {
        let object = self.object_mut(id)?;
        if object.state == ObjectState::Persistent {
            object.state = ObjectState::Detached;
        }
        Ok(())
    }

    /// Re-attaches a detached object. Its changes are written on the next
    /// flush.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown handles.
    pub fn attach(&mut self, id: ObjectId) -> Result<()> {
        let object = self.object_mut(id)?;
        if object.state == ObjectState::Detached {
            object.state = ObjectState::Persistent;
            object.reattaching = true;
            object.dirty = true;
        }
        Ok(())
    }

    /// Reloads an object from its record, discarding unwritten changes.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the record is gone, or an invalid argument
    /// error if the object has no key.
    pub fn refresh(&mut self, id: ObjectId) -> Result<()> {
        let key = self
            .key(id)
            .ok_or_else(|| Error::invalid_argument(format!("object {id} has no key")))?;
        let record = self.datastore.get(&key)?;
        let manager = Arc::clone(&self.manager);
        let object = self.object_mut(id)?;
        absorb(manager.registry(), object, record);
        object.state = ObjectState::Persistent;
        object.dirty = false;
        object.reattaching = false;
        Ok(())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Writes everything that is pending.
    ///
    /// Explicitly persisted objects are inserted first, then dirty objects are
    /// updated. A child write still waiting after that belongs to an owner
    /// that was never persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if a write fails or a collection member's owner is
    /// not persistent.
    pub fn flush(&mut self) -> Result<()> {
        let roots = std::mem::take(&mut self.pending_roots);
        for id in roots {
            if self.state(id)? == ObjectState::New {
                self.ensure_key(id)?;
            }
        }

        while let Some(pending) = self.pending_children.first().cloned() {
            match self.state(pending.owner)? {
                _ if self.key(pending.owner).is_some() => {
                    self.pending_children.remove(0);
                    self.apply_child_write(pending)?;
                }
                ObjectState::New => {
                    self.ensure_key(pending.owner)?;
                }
                _ => {
                    return Err(Error::invalid_argument(format!(
                        "object {} was added to {}, which is not persistent",
                        pending.element, pending.owner
                    )));
                }
            }
        }

        for index in 0..self.objects.len() {
            let object = &self.objects[index];
            let writable = matches!(object.state, ObjectState::New | ObjectState::Persistent);
            if writable && object.dirty {
                self.write_object(ObjectId(index))?;
            }
        }
        Ok(())
    }

    /// Returns the object's key, writing it and any owner it waits for.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is transient or a write fails.
    pub fn ensure_key(&mut self, id: ObjectId) -> Result<Key> {
        let object = self.object(id)?;
        if let Some(key) = &object.key {
            return Ok(key.clone());
        }
        match object.state {
            ObjectState::New => {}
            state => {
                return Err(Error::invalid_argument(format!(
                    "object {id} is {state:?} and has no key"
                )));
            }
        }

        let waiting_on = self
            .pending_children
            .iter()
            .find(|pending| pending.element == id)
            .map(|pending| pending.owner);
        if let Some(owner) = waiting_on {
            // Writing the owner applies every child write waiting on it.
            self.ensure_key(owner)?;
            if let Some(key) = self.key(id) {
                return Ok(key);
            }
            if let Some(position) = self.pending_children.iter().position(|p| p.element == id) {
                let pending = self.pending_children.remove(position);
                self.apply_child_write(pending)?;
            }
            return self
                .key(id)
                .ok_or_else(|| Error::internal(format!("object {id} was not written")));
        }

        if let Some(parent) = self.object(id)?.parent {
            self.ensure_key(parent)?;
        }
        self.write_object(id)
    }

    /// Writes an object's record and resolves child writes waiting on it.
    pub(crate) fn write_object(&mut self, id: ObjectId) -> Result<Key> {
        let inserting = self.object(id)?.key.is_none();
        if inserting {
            self.init_key_lists(id)?;
        }
        let record = self.record_of(id)?;
        let key = self.datastore.put(record)?;
        let in_transaction = self.datastore.in_transaction();

        let object = self.object_mut(id)?;
        object.key = Some(key.clone());
        object.state = ObjectState::Persistent;
        object.dirty = false;
        object.reattaching = false;
        if inserting && in_transaction {
            object.created_in_txn = true;
        }
        self.identity.insert(key.clone(), id);
        self.pending_roots.retain(|root| *root != id);

        self.resolve_waiting(id)?;
        Ok(key)
    }

    /// Writes an object if it is persistent and has unwritten changes.
    pub(crate) fn write_if_dirty(&mut self, id: ObjectId) -> Result<()> {
        let object = self.object(id)?;
        if object.state == ObjectState::Persistent && object.dirty && object.key.is_some() {
            self.write_object(id)?;
        }
        Ok(())
    }

    /// Collection fields that hold key lists start out empty.
    fn init_key_lists(&mut self, id: ObjectId) -> Result<()> {
        let version = self.storage_version();
        let class = self.class_of(id)?;
        let fields: Vec<Arc<str>> = self
            .registry()
            .all_fields(&class)
            .into_iter()
            .filter_map(|(_, field)| {
                let relation = field.relation()?;
                version
                    .writes_child_keys(relation.owned)
                    .then(|| Arc::clone(&field.name))
            })
            .collect();
        let object = self.object_mut(id)?;
        for field in fields {
            if !object.properties.contains(&field) {
                object.properties.insert(field, Value::from(Vec::<Key>::new()));
            }
        }
        Ok(())
    }

    fn record_of(&self, id: ObjectId) -> Result<Record> {
        let object = self.object(id)?;
        let registry = self.registry();
        let key = match &object.key {
            Some(key) => key.clone(),
            None => {
                let kind = registry.require(&object.class)?.kind();
                match object.parent {
                    Some(owner) => self
                        .key(owner)
                        .ok_or_else(|| {
                            Error::internal(format!("owner {owner} of {id} has no key"))
                        })?
                        .incomplete_child(kind),
                    None => Key::incomplete(kind),
                }
            }
        };

        let mut properties = object.properties.clone();
        for (field, reference) in &object.references {
            let is_parent = matches!(
                registry.field(&object.class, field).map(|(_, schema)| &schema.kind),
                Some(FieldKind::Reference { parent: true, .. })
            );
            if is_parent {
                continue;
            }
            let value = match reference {
                Reference::Object(target) => self.key(*target).map_or(Value::Null, Value::Key),
                Reference::Key(key) => Value::Key(key.clone()),
            };
            properties.insert(Arc::clone(field), value);
        }
        if let Some(discriminator) = &registry.require(&object.class)?.discriminator {
            properties.insert(DISCRIMINATOR_PROPERTY, Value::Text(Arc::clone(discriminator)));
        }
        Ok(Record::with_properties(key, properties))
    }

    // =========================================================================
    // Deferred child writes
    // =========================================================================

    /// Applies a child write now if the owner has a key, otherwise queues it.
    ///
    /// Returns true if the write was applied.
    pub(crate) fn bind_child(&mut self, pending: PendingChildWrite) -> Result<bool> {
        if self.key(pending.owner).is_some() {
            self.apply_child_write(pending)?;
            return Ok(true);
        }
        debug!(
            element = %pending.element,
            owner = %pending.owner,
            "deferring child write until owner has a key"
        );
        self.pending_children
            .retain(|queued| queued.element != pending.element);
        self.pending_children.push(pending);
        Ok(false)
    }

    /// Returns the child writes still waiting for an owner key.
    #[must_use]
    pub fn pending_child_writes(&self) -> &[PendingChildWrite] {
        &self.pending_children
    }

    fn apply_child_write(&mut self, pending: PendingChildWrite) -> Result<()> {
        let owner_key = self.key(pending.owner).ok_or_else(|| {
            Error::internal(format!("owner {} has no key", pending.owner))
        })?;
        if pending.parent {
            if let Some(key) = self.key(pending.element) {
                if key.parent().as_ref() != Some(&owner_key) {
                    return Err(Error::ownership(format!(
                        "{key} cannot be re-parented under {owner_key}"
                    )));
                }
            }
        }
        debug!(element = %pending.element, owner = %owner_key, "writing child");

        let object = self.object_mut(pending.element)?;
        if pending.parent {
            object.parent = Some(pending.owner);
        }
        if let Some((property, position)) = pending.order {
            object.properties.insert(property, Value::Int(position));
        }
        if let Some(field) = pending.back_reference {
            object
                .references
                .insert(field, Reference::Object(pending.owner));
        }
        object.dirty = true;
        if matches!(object.state, ObjectState::Transient | ObjectState::Deleted) {
            object.state = ObjectState::New;
        }
        self.write_object(pending.element)?;
        Ok(())
    }

    /// Applies child writes and key-list appends waiting on `owner`.
    fn resolve_waiting(&mut self, owner: ObjectId) -> Result<()> {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_children)
            .into_iter()
            .partition(|pending| pending.owner == owner);
        self.pending_children = waiting;
        for pending in ready {
            self.apply_child_write(pending)?;
        }

        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|entry| entry.owner == owner);
        self.deferred = waiting;
        for entry in ready {
            if !entry.write_keys {
                continue;
            }
            let mut keys = self.key_list(owner, &entry.field).unwrap_or_default();
            for element in entry.elements {
                let key = self.ensure_key(element)?;
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
            self.set_key_list(owner, &entry.field, keys)?;
        }
        Ok(())
    }

    pub(crate) fn defer_member(
        &mut self,
        owner: ObjectId,
        field: &Arc<str>,
        element: ObjectId,
        write_keys: bool,
    ) {
        match self
            .deferred
            .iter_mut()
            .find(|entry| entry.owner == owner && entry.field == *field)
        {
            Some(entry) => entry.elements.push(element),
            None => self.deferred.push(DeferredMembers {
                owner,
                field: Arc::clone(field),
                elements: vec![element],
                write_keys,
            }),
        }
    }

    pub(crate) fn deferred_members(&self, owner: ObjectId, field: &str) -> &[ObjectId] {
        self.deferred
            .iter()
            .find(|entry| entry.owner == owner && &*entry.field == field)
            .map_or(&[], |entry| entry.elements.as_slice())
    }

    // =========================================================================
    // Raw property access for relation stores
    // =========================================================================

    /// Returns the key list stored in a collection property.
    pub(crate) fn key_list(&self, owner: ObjectId, field: &str) -> Option<Vec<Key>> {
        self.get(owner, field)?
            .as_key_list()
            .map(|keys| keys.iter().cloned().collect())
    }

    /// Replaces a collection's key list and writes the owner if it is stored.
    pub(crate) fn set_key_list(
        &mut self,
        owner: ObjectId,
        field: &str,
        keys: Vec<Key>,
    ) -> Result<()> {
        debug!(owner = %owner, field, len = keys.len(), "writing child key list");
        let object = self.object_mut(owner)?;
        object.properties.insert(field, Value::from(keys));
        object.dirty = true;
        let stored = object.key.is_some() && object.state == ObjectState::Persistent;
        if stored {
            self.write_object(owner)?;
        }
        Ok(())
    }

    pub(crate) fn set_property_raw(
        &mut self,
        id: ObjectId,
        name: &str,
        value: Value,
    ) -> Result<()> {
        let object = self.object_mut(id)?;
        object.properties.insert(name, value);
        object.dirty = true;
        Ok(())
    }

    pub(crate) fn remove_property_raw(&mut self, id: ObjectId, name: &str) -> Result<bool> {
        let object = self.object_mut(id)?;
        let removed = object.properties.remove(name).is_some();
        object.dirty |= removed;
        Ok(removed)
    }

    pub(crate) fn set_reference_raw(
        &mut self,
        id: ObjectId,
        field: &str,
        target: Option<Reference>,
    ) -> Result<()> {
        let object = self.object_mut(id)?;
        match target {
            Some(target) => object.references.insert(Arc::from(field), target),
            None => object.references.remove(field),
        };
        object.dirty = true;
        Ok(())
    }

    pub(crate) fn registered_parent(&self, id: ObjectId) -> Option<ObjectId> {
        self.objects.get(id.0)?.parent
    }

    /// Records `owner` as the owning parent of `element`.
    pub(crate) fn register_parent(&mut self, element: ObjectId, owner: ObjectId) -> Result<()> {
        let object = self.object_mut(element)?;
        match object.parent {
            Some(existing) if existing != owner => Err(Error::ownership(format!(
                "object {element} is already owned by {existing}"
            ))),
            _ => {
                object.parent = Some(owner);
                Ok(())
            }
        }
    }

    // =========================================================================
    // Re-entrancy guards
    // =========================================================================

    /// Marks a collection mutation as started. Returns false if one is
    /// already running for the same owner and field.
    pub(crate) fn enter(&mut self, owner: ObjectId, field: &Arc<str>) -> bool {
        self.in_progress.insert((owner, Arc::clone(field)))
    }

    pub(crate) fn leave(&mut self, owner: ObjectId, field: &Arc<str>) {
        self.in_progress.remove(&(owner, Arc::clone(field)));
    }

    pub(crate) fn begin_delete(&mut self, id: ObjectId) -> bool {
        self.deleting.insert(id)
    }

    pub(crate) fn end_delete(&mut self, id: ObjectId) {
        self.deleting.remove(&id);
    }

    pub(crate) fn is_deleting(&self, id: ObjectId) -> bool {
        self.deleting.contains(&id)
    }

    /// Removes an object's record and forgets anything queued for it.
    pub(crate) fn erase(&mut self, id: ObjectId) -> Result<()> {
        self.pending_children
            .retain(|pending| pending.element != id && pending.owner != id);
        self.pending_roots.retain(|root| *root != id);
        self.deferred.retain(|entry| entry.owner != id);
        for entry in &mut self.deferred {
            entry.elements.retain(|element| *element != id);
        }
        if let Some(key) = self.key(id) {
            self.datastore.delete(&key)?;
        }
        let object = self.object_mut(id)?;
        object.state = ObjectState::Deleted;
        object.dirty = false;
        object.parent = None;
        Ok(())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Starts a datastore transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if one is already active.
    pub fn begin(&mut self) -> Result<()> {
        self.datastore.begin_transaction()
    }

    /// Flushes and commits the active transaction.
    ///
    /// On failure the session is reset as by [`Session::rollback`].
    ///
    /// # Errors
    ///
    /// Returns `ConcurrentModification` if another writer won, or the flush
    /// error.
    pub fn commit(&mut self) -> Result<()> {
        let result = self.flush().and_then(|()| self.datastore.commit());
        match result {
            Ok(()) => {
                for object in &mut self.objects {
                    object.created_in_txn = false;
                }
                Ok(())
            }
            Err(err) => {
                self.datastore.rollback()?;
                self.reset_after_rollback()?;
                Err(err)
            }
        }
    }

    /// Discards the active transaction and reloads tracked objects.
    ///
    /// Objects first inserted inside the transaction become transient again.
    ///
    /// # Errors
    ///
    /// Returns an error if the datastore fails.
    pub fn rollback(&mut self) -> Result<()> {
        self.datastore.rollback()?;
        self.reset_after_rollback()
    }

    fn reset_after_rollback(&mut self) -> Result<()> {
        self.pending_roots.clear();
        self.pending_children.clear();
        self.deferred.clear();
        self.in_progress.clear();
        self.deleting.clear();

        let manager = Arc::clone(&self.manager);
        for index in 0..self.objects.len() {
            let id = ObjectId(index);
            let object = &mut self.objects[index];
            if object.created_in_txn {
                if let Some(key) = object.key.take() {
                    self.identity.remove(&key);
                }
                object.state = ObjectState::Transient;
                object.created_in_txn = false;
                object.parent = None;
                continue;
            }
            if matches!(object.state, ObjectState::Transient | ObjectState::Detached) {
                continue;
            }
            let Some(key) = object.key.clone() else {
                object.state = ObjectState::Transient;
                continue;
            };
            match self.datastore.get(&key) {
                Ok(record) => {
                    let object = self.object_mut(id)?;
                    absorb(manager.registry(), object, record);
                    object.state = ObjectState::Persistent;
                    object.dirty = false;
                    object.reattaching = false;
                }
                Err(err) if err.is_not_found() => {
                    self.identity.remove(&key);
                    let object = self.object_mut(id)?;
                    object.key = None;
                    object.state = ObjectState::Transient;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// Replaces an object's fields with a record's properties.
fn absorb(registry: &ClassRegistry, object: &mut ManagedObject, record: Record) {
    let mut properties = record.properties;
    properties.remove(DISCRIMINATOR_PROPERTY);
    object.references.clear();
    for (_, field) in registry.all_fields(&object.class) {
        let FieldKind::Reference { parent, .. } = &field.kind else {
            continue;
        };
        if *parent {
            if let Some(parent_key) = record.key.parent() {
                object
                    .references
                    .insert(Arc::clone(&field.name), Reference::Key(parent_key));
            }
        } else if let Some(Value::Key(target)) = properties.remove(&field.name) {
            object
                .references
                .insert(Arc::clone(&field.name), Reference::Key(target));
        }
    }
    object.properties = properties;
}
