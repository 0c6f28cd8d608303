//! Binding elements to owners, releasing them, and cascading deletes.

use std::sync::Arc;

use tracing::debug;

use ancestry_foundation::{Error, Key, Result};
use ancestry_storage::{Datastore, Filter, FilterOp, Query};

use crate::fk_store::FkStore;
use crate::session::{ObjectId, ObjectState, PendingChildWrite, Reference, Session};

/// What happens to an element removed from its collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalPolicy {
    /// The element's record is deleted.
    Delete,
    /// The element's reference to the owner is cleared and the record kept.
    Nullify,
}

/// Decides the fate of removed elements.
///
/// Owned elements cannot outlive membership because their key names the
/// owner. Unowned elements are kept unless they are dependent or the owner
/// reference or position cannot be cleared.
#[must_use]
pub fn removal_policy(store: &FkStore) -> RemovalPolicy {
    let relation = store.relation();
    if relation.deletes_removed_elements() || relation.owned {
        return RemovalPolicy::Delete;
    }
    let has_owner_field = relation.mapped_by.is_some() || store.order_index().is_some();
    let order_nullable = store.order_index().is_none_or(|order| order.nullable());
    if !has_owner_field || (relation.nullable_fk && order_nullable) {
        RemovalPolicy::Nullify
    } else {
        RemovalPolicy::Delete
    }
}

/// How an element's back reference relates to a prospective owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OwnerCheck {
    /// Points at the owner, or the relation is unidirectional.
    Consistent,
    /// Not set.
    Unset,
    /// Points at another owner.
    Foreign {
        /// The other owner or the element is being re-attached.
        reattaching: bool,
    },
}

pub(crate) fn owner_check<D: Datastore>(
    session: &Session<D>,
    store: &FkStore,
    owner: ObjectId,
    element: ObjectId,
) -> OwnerCheck {
    let Some(field) = &store.relation().mapped_by else {
        return OwnerCheck::Consistent;
    };
    let other = match session.reference(element, field).cloned() {
        None => return OwnerCheck::Unset,
        Some(Reference::Object(other)) if other == owner => return OwnerCheck::Consistent,
        Some(Reference::Key(key)) if session.key(owner).as_ref() == Some(&key) => {
            return OwnerCheck::Consistent;
        }
        Some(Reference::Object(other)) => Some(other),
        Some(Reference::Key(key)) => session.lookup(&key),
    };
    OwnerCheck::Foreign {
        reattaching: session.is_reattaching(element)
            || other.is_some_and(|other| session.is_reattaching(other)),
    }
}

/// Checks that an owned element belongs, or can belong, under `owner`.
///
/// # Errors
///
/// Returns `OwnershipViolation` if the element is keyed under another parent,
/// is a root record, or is bound to another owner in this session.
pub fn check_parentage<D: Datastore>(
    session: &Session<D>,
    owner: ObjectId,
    element: ObjectId,
) -> Result<()> {
    if let Some(existing) = session.registered_parent(element) {
        if existing != owner {
            return Err(Error::ownership(format!(
                "object {element} is already owned by {existing}"
            )));
        }
    }
    let Some(element_key) = session.key(element) else {
        return Ok(());
    };
    let Some(parent) = element_key.parent() else {
        return Err(Error::ownership(format!(
            "{element_key} is a root record and cannot become an owned child"
        )));
    };
    match session.key(owner) {
        Some(owner_key) if owner_key == parent => Ok(()),
        _ => Err(Error::ownership(format!(
            "{element_key} is owned by {parent} and cannot be re-parented"
        ))),
    }
}

/// Checks that every element of a batch may join an owned collection, so a
/// rejected batch fails before its first write.
///
/// # Errors
///
/// Returns the first [`check_parentage`] failure.
pub(crate) fn check_batch<D: Datastore>(
    session: &Session<D>,
    store: &FkStore,
    owner: ObjectId,
    elements: &[ObjectId],
) -> Result<()> {
    if !store.relation().owned {
        return Ok(());
    }
    elements
        .iter()
        .try_for_each(|element| check_parentage(session, owner, *element))
}

/// Makes `element` a member of the owner's collection.
///
/// Transient and deleted elements become new, detached ones are re-attached.
/// The child write carries the parent key prefix for owned relations, the
/// back reference for unowned bidirectional ones, and the position when
/// positions live on element records. It is deferred if the owner has no key.
pub(crate) fn bind_element<D: Datastore>(
    session: &mut Session<D>,
    store: &FkStore,
    owner: ObjectId,
    element: ObjectId,
    position: Option<usize>,
) -> Result<()> {
    match session.state(element)? {
        ObjectState::Transient | ObjectState::Deleted => session.mark_new(element)?,
        ObjectState::Detached => session.attach(element)?,
        ObjectState::New | ObjectState::Persistent => {}
    }

    let relation = store.relation();
    if relation.owned {
        check_parentage(session, owner, element)?;
        session.register_parent(element, owner)?;
        if let Some(field) = &relation.mapped_by {
            if !session.refers_to(element, field, owner) {
                session.set_reference_raw(element, field, Some(Reference::Object(owner)))?;
            }
        }
    }

    let order = store.positions().zip(position).map(|(order, position)| {
        (
            Arc::<str>::from(order.property()),
            i64::try_from(position).unwrap_or(i64::MAX),
        )
    });
    let back_reference = if relation.owned {
        None
    } else {
        relation
            .mapped_by
            .clone()
            .filter(|field| !session.refers_to(element, field, owner))
    };

    let unchanged = session.state(element)? == ObjectState::Persistent
        && session.key(element).is_some()
        && order.is_none()
        && back_reference.is_none();
    if unchanged {
        return Ok(());
    }
    session.bind_child(PendingChildWrite {
        element,
        owner,
        parent: relation.owned,
        back_reference,
        order,
    })?;
    Ok(())
}

/// Applies the removal policy to an element that left the owner's
/// collection.
pub(crate) fn release_element<D: Datastore>(
    session: &mut Session<D>,
    store: &FkStore,
    owner: ObjectId,
    element: ObjectId,
) -> Result<()> {
    match removal_policy(store) {
        RemovalPolicy::Delete => {
            debug!(element = %element, field = store.field(), "deleting removed element");
            delete_object(session, element)
        }
        RemovalPolicy::Nullify => {
            debug!(element = %element, field = store.field(), "detaching removed element");
            if let Some(field) = &store.relation().mapped_by {
                if session.refers_to(element, field, owner) {
                    session.set_reference_raw(element, field, None)?;
                }
            }
            if let Some(order) = store.order_index() {
                session.remove_property_raw(element, order.property())?;
            }
            session.write_if_dirty(element)
        }
    }
}

/// Deletes an object.
///
/// The object first leaves every collection holding it, which closes the gap
/// in list positions and parent key lists. Its dependent collections are then
/// deleted and back references from its unowned collections cleared.
/// Deleting a deleted object does nothing.
///
/// # Errors
///
/// Returns an invalid argument error for transient objects, or the first
/// failing read or write.
pub fn delete_object<D: Datastore>(session: &mut Session<D>, id: ObjectId) -> Result<()> {
    match session.state(id)? {
        ObjectState::Deleted => return Ok(()),
        ObjectState::Transient => {
            return Err(Error::invalid_argument(format!(
                "cannot delete transient object {id}"
            )));
        }
        _ => {}
    }
    if !session.begin_delete(id) {
        return Ok(());
    }
    let result = delete_inner(session, id);
    session.end_delete(id);
    result
}

fn delete_inner<D: Datastore>(session: &mut Session<D>, id: ObjectId) -> Result<()> {
    let manager = Arc::clone(session.manager());
    let class = session.class_of(id)?;
    debug!(object = %id, class = %class, "deleting object");

    if session.key(id).is_some() {
        for store in manager.relations_holding(&class) {
            for holder in holders(session, store.base(), id)? {
                let live = matches!(
                    session.state(holder)?,
                    ObjectState::New | ObjectState::Persistent | ObjectState::Detached
                );
                if live && !session.is_deleting(holder) {
                    store.remove(session, holder, id)?;
                }
            }
        }
    }

    for store in manager.relations_of(&class) {
        let relation = store.relation();
        if relation.deletes_removed_elements() {
            for element in store.elements(session, id)? {
                delete_object(session, element)?;
            }
        } else if let (false, Some(field)) = (relation.owned, &relation.mapped_by) {
            for element in store.elements(session, id)? {
                if session.refers_to(element, field, id) {
                    session.set_reference_raw(element, field, None)?;
                    session.write_if_dirty(element)?;
                }
            }
        }
    }

    session.erase(id)
}

/// Finds owners whose collection in `store` may contain `element`.
fn holders<D: Datastore>(
    session: &mut Session<D>,
    store: &FkStore,
    element: ObjectId,
) -> Result<Vec<ObjectId>> {
    let relation = store.relation();
    let candidates = if relation.owned {
        match session.key(element).and_then(|key| key.parent()) {
            Some(parent) => find_optional(session, &parent)?.into_iter().collect(),
            None => Vec::new(),
        }
    } else if let Some(field) = &relation.mapped_by {
        match session.reference(element, field).cloned() {
            Some(Reference::Object(owner)) => vec![owner],
            Some(Reference::Key(key)) => find_optional(session, &key)?.into_iter().collect(),
            None => Vec::new(),
        }
    } else {
        let Some(element_key) = session.key(element) else {
            return Ok(Vec::new());
        };
        let owner_kind = session
            .manager()
            .registry()
            .require(store.owner_class())?
            .kind()
            .to_owned();
        let query = Query::new(&owner_kind).with_filter(Filter::new(
            store.field(),
            FilterOp::Eq,
            element_key,
        ));
        let records = session.datastore_mut().query(&query)?;
        records
            .into_iter()
            .map(|record| session.materialize(record))
            .collect::<Result<Vec<_>>>()?
    };

    let manager = Arc::clone(session.manager());
    let mut owners = Vec::with_capacity(candidates.len());
    for owner in candidates {
        let class = session.class_of(owner)?;
        if manager.registry().is_assignable(&class, store.owner_class()) {
            owners.push(owner);
        }
    }
    Ok(owners)
}

fn find_optional<D: Datastore>(session: &mut Session<D>, key: &Key) -> Result<Option<ObjectId>> {
    match session.find(key) {
        Ok(id) => Ok(Some(id)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}
