//! Element and owner checks shared by the relation stores.

use ancestry_foundation::{Error, Result};
use ancestry_storage::Datastore;

use crate::fk_store::FkStore;
use crate::session::{ObjectId, ObjectState, Session};

/// Checks that an element may be written into the collection.
///
/// # Errors
///
/// Returns `TypeMismatch` if the element's class is not assignable to the
/// declared element class or maps to a different kind.
pub fn for_writing<D: Datastore>(
    session: &Session<D>,
    store: &FkStore,
    element: ObjectId,
) -> Result<()> {
    let class = session.class_of(element)?;
    let registry = session.manager().registry();
    let declared = &store.relation().element_class;
    if !registry.is_assignable(&class, declared) {
        return Err(Error::type_mismatch(declared, class));
    }
    let kind = registry.require(&class)?.kind();
    if kind != store.element_kind() {
        return Err(Error::type_mismatch(store.element_kind(), kind));
    }
    Ok(())
}

/// Returns true if an element may be looked up in the collection.
///
/// Elements of the wrong class, transient elements and deleted elements are
/// never members. Detached elements are.
///
/// # Errors
///
/// Returns an error for unknown handles.
pub fn for_reading<D: Datastore>(
    session: &Session<D>,
    store: &FkStore,
    element: ObjectId,
) -> Result<bool> {
    let class = session.class_of(element)?;
    if !session
        .manager()
        .registry()
        .is_assignable(&class, &store.relation().element_class)
    {
        return Ok(false);
    }
    Ok(!matches!(
        session.state(element)?,
        ObjectState::Transient | ObjectState::Deleted
    ))
}

/// Checks that an object can own the collection.
///
/// # Errors
///
/// Returns `TypeMismatch` for the wrong class and an invalid argument error
/// for transient or deleted owners.
pub fn owner<D: Datastore>(session: &Session<D>, store: &FkStore, owner: ObjectId) -> Result<()> {
    let class = session.class_of(owner)?;
    if !session
        .manager()
        .registry()
        .is_assignable(&class, store.owner_class())
    {
        return Err(Error::type_mismatch(store.owner_class(), class));
    }
    match session.state(owner)? {
        ObjectState::Transient => Err(Error::invalid_argument(format!(
            "owner {owner} is not persistent"
        ))),
        ObjectState::Deleted => Err(Error::invalid_argument(format!(
            "owner {owner} has been deleted"
        ))),
        _ => Ok(()),
    }
}
