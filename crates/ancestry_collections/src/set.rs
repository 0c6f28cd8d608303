//! Unordered collections.

use tracing::debug;

use ancestry_foundation::Result;
use ancestry_storage::Datastore;

use crate::fk_store::FkStore;
use crate::lifecycle::{self, OwnerCheck};
use crate::session::{ObjectId, Session};
use crate::validate;

/// Store for a set-valued relation.
#[derive(Clone, Debug)]
pub struct FkSetStore {
    base: FkStore,
}

impl FkSetStore {
    /// Wraps the shared store state.
    #[must_use]
    pub fn new(base: FkStore) -> Self {
        Self { base }
    }

    /// Returns the shared store state.
    #[must_use]
    pub fn base(&self) -> &FkStore {
        &self.base
    }

    /// Returns the members.
    ///
    /// # Errors
    ///
    /// Returns an error if the owner is not persistent or a read fails.
    pub fn elements<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
    ) -> Result<Vec<ObjectId>> {
        self.base.elements(session, owner)
    }

    /// Returns the number of members.
    ///
    /// # Errors
    ///
    /// Returns an error if the owner is not persistent or a read fails.
    pub fn size<D: Datastore>(&self, session: &mut Session<D>, owner: ObjectId) -> Result<usize> {
        self.base.size(session, owner)
    }

    /// Returns true if the element is a member.
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
        self.base.contains(session, owner, element)
    }

    /// Adds an element. Returns false if it is already a member, or if the
    /// relation is bidirectional and the element points at another owner.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for elements of the wrong class and
    /// `OwnershipViolation` for owned elements keyed under another parent.
    pub fn add<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        element: ObjectId,
    ) -> Result<bool> {
        self.base
            .guarded(session, owner, "set.add", |session| {
                validate::for_writing(session, &self.base, element)?;
                self.check_candidates(session, owner, &[element])?;
                self.add_one(session, owner, element)
            })
            .map(Option::unwrap_or_default)
    }

    /// Adds several elements. Returns true if any was added.
    ///
    /// # Errors
    ///
    /// See [`FkSetStore::add`].
    pub fn add_all<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        elements: &[ObjectId],
    ) -> Result<bool> {
        self.base
            .guarded(session, owner, "set.add_all", |session| {
                for element in elements {
                    validate::for_writing(session, &self.base, *element)?;
                }
                self.check_candidates(session, owner, elements)?;
                let mut added = false;
                for element in elements {
                    added |= self.add_one(session, owner, *element)?;
                }
                Ok(added)
            })
            .map(Option::unwrap_or_default)
    }

    /// Checks the parentage of every element that would be bound. Elements
    /// pointing at another owner are skipped by `add_one` and not checked.
    fn check_candidates<D: Datastore>(
        &self,
        session: &Session<D>,
        owner: ObjectId,
        elements: &[ObjectId],
    ) -> Result<()> {
        let candidates: Vec<ObjectId> = elements
            .iter()
            .copied()
            .filter(|element| {
                !matches!(
                    lifecycle::owner_check(session, &self.base, owner, *element),
                    OwnerCheck::Foreign { reattaching: false }
                )
            })
            .collect();
        lifecycle::check_batch(session, &self.base, owner, &candidates)
    }

    fn add_one<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        element: ObjectId,
    ) -> Result<bool> {
        if let OwnerCheck::Foreign { reattaching: false } =
            lifecycle::owner_check(session, &self.base, owner, element)
        {
            debug!(
                element = %element,
                field = self.base.field(),
                "element already belongs to another owner"
            );
            return Ok(false);
        }

        if session.key(owner).is_none() {
            if session
                .deferred_members(owner, self.base.field())
                .contains(&element)
            {
                return Ok(false);
            }
            lifecycle::bind_element(session, &self.base, owner, element, None)?;
            session.defer_member(
                owner,
                self.base.field_name(),
                element,
                self.base.writes_child_keys(),
            );
            return Ok(true);
        }

        let owner_key = session.ensure_key(owner)?;
        if self.base.contains_inner(session, owner, element)? {
            return Ok(false);
        }
        lifecycle::bind_element(session, &self.base, owner, element, None)?;
        if self.base.writes_child_keys() {
            let mut keys = self.base.member_keys(session, owner, &owner_key)?;
            let key = session.ensure_key(element)?;
            if !keys.contains(&key) {
                keys.push(key);
            }
            session.set_key_list(owner, self.base.field(), keys)?;
        }
        Ok(true)
    }

    /// Removes an element. Returns false if it is not a member or no longer
    /// points at this owner.
    ///
    /// # Errors
    ///
    /// Returns an error if a write fails.
    pub fn remove<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        element: ObjectId,
    ) -> Result<bool> {
        self.base
            .guarded(session, owner, "set.remove", |session| {
                self.remove_one(session, owner, element)
            })
            .map(Option::unwrap_or_default)
    }

    /// Removes several elements. Returns true if any was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if a write fails.
    pub fn remove_all<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        elements: &[ObjectId],
    ) -> Result<bool> {
        self.base
            .guarded(session, owner, "set.remove_all", |session| {
                let mut removed = false;
                for element in elements {
                    removed |= self.remove_one(session, owner, *element)?;
                }
                Ok(removed)
            })
            .map(Option::unwrap_or_default)
    }

    fn remove_one<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        element: ObjectId,
    ) -> Result<bool> {
        if !validate::for_reading(session, &self.base, element)? {
            return Ok(false);
        }
        let owner_key = session.ensure_key(owner)?;
        if let OwnerCheck::Foreign { .. } =
            lifecycle::owner_check(session, &self.base, owner, element)
        {
            return Ok(false);
        }
        if !self.base.contains_inner(session, owner, element)? {
            return Ok(false);
        }
        if self.base.writes_child_keys() {
            if let Some(key) = session.key(element) {
                let mut keys = self.base.member_keys(session, owner, &owner_key)?;
                keys.retain(|member| *member != key);
                session.set_key_list(owner, self.base.field(), keys)?;
            }
        }
        lifecycle::release_element(session, &self.base, owner, element)?;
        Ok(true)
    }

    /// Removes every member.
    ///
    /// # Errors
    ///
    /// Returns an error if a read or write fails.
    pub fn clear<D: Datastore>(&self, session: &mut Session<D>, owner: ObjectId) -> Result<()> {
        self.base
            .guarded(session, owner, "set.clear", |session| {
                let members = self.base.elements_inner(session, owner)?;
                if self.base.writes_child_keys() {
                    session.ensure_key(owner)?;
                    session.set_key_list(owner, self.base.field(), Vec::new())?;
                }
                for element in members {
                    lifecycle::release_element(session, &self.base, owner, element)?;
                }
                Ok(())
            })
            .map(|_| ())
    }

    /// Makes the set equal to `target`, touching only the difference.
    ///
    /// # Errors
    ///
    /// Returns an error if a read or write fails.
    pub fn update<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        target: &[ObjectId],
    ) -> Result<()> {
        self.base
            .guarded(session, owner, "set.update", |session| {
                for element in target {
                    validate::for_writing(session, &self.base, *element)?;
                }
                let existing = self.base.elements_inner(session, owner)?;
                for element in &existing {
                    if !target.contains(element) {
                        self.remove_one(session, owner, *element)?;
                    }
                }
                for element in target {
                    if !existing.contains(element) {
                        self.add_one(session, owner, *element)?;
                    }
                }
                Ok(())
            })
            .map(|_| ())
    }
}
