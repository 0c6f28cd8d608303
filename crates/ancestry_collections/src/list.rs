//! Ordered collections.
//!
//! Under key-list storage the owner's key list fixes the order and positions
//! are indexes into it. Under ancestor storage each element carries its
//! position in the order property, so inserts and removals in the middle of
//! the list shift later elements. Lists ordered by declared fields have no
//! positions of their own; their order is the sort order.

use std::collections::HashSet;

use tracing::debug;

use ancestry_foundation::{Error, Key, Result};
use ancestry_storage::{Datastore, Filter, FilterOp, KEY_PROPERTY, Query, Sort};

use crate::fk_store::FkStore;
use crate::lifecycle;
use crate::planner::{self, ChildPlan};
use crate::session::{ObjectId, Session};
use crate::validate;

/// Store for a list-valued relation.
#[derive(Clone, Debug)]
pub struct FkListStore {
    base: FkStore,
}

impl FkListStore {
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

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns the element at `index`.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` past the end of the list.
    pub fn get<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        index: usize,
    ) -> Result<ObjectId> {
        self.base.read(session, owner, "list.get", |session| {
            self.get_inner(session, owner, index)
        })
    }

    fn get_inner<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        index: usize,
    ) -> Result<ObjectId> {
        let owner_key = session.ensure_key(owner)?;
        if let Some(order) = self.base.positions() {
            let filters = order.filter_predicates(Some(index), Some(index));
            let records = self
                .base
                .member_records(session, owner, &owner_key, filters)?;
            return match records.into_iter().next() {
                Some(record) => session.materialize(record),
                None => {
                    let size = self.base.size_inner(session, owner)?;
                    Err(Error::index_out_of_bounds(index, size))
                }
            };
        }
        let keys = self.base.member_keys(session, owner, &owner_key)?;
        let key = keys
            .get(index)
            .ok_or_else(|| Error::index_out_of_bounds(index, keys.len()))?;
        session.find(key)
    }

    /// Returns the elements in `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if the range does not fit the list.
    pub fn sub_list<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        start: usize,
        end: usize,
    ) -> Result<Vec<ObjectId>> {
        self.base.read(session, owner, "list.sub_list", |session| {
            let size = self.base.size_inner(session, owner)?;
            if end > size {
                return Err(Error::index_out_of_bounds(end, size));
            }
            if start > end {
                return Err(Error::index_out_of_bounds(start, end));
            }
            let owner_key = session.ensure_key(owner)?;
            if let Some(order) = self.base.positions() {
                let filters = order.filter_predicates(Some(start), Some(end));
                return self
                    .base
                    .member_records(session, owner, &owner_key, filters)?
                    .into_iter()
                    .map(|record| session.materialize(record))
                    .collect();
            }
            let elements = self.base.elements_inner(session, owner)?;
            Ok(elements[start..end].to_vec())
        })
    }

    /// Returns the elements in list order.
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

    /// Returns the number of elements.
    ///
    /// # Errors
    ///
    /// Returns an error if the owner is not persistent or a read fails.
    pub fn size<D: Datastore>(&self, session: &mut Session<D>, owner: ObjectId) -> Result<usize> {
        self.base.size(session, owner)
    }

    /// Returns true if the element is in the list.
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

    /// Returns the position of an element, or `None` if it is not a member.
    ///
    /// # Errors
    ///
    /// Returns a store error if a member stored with positions has none, or
    /// an invalid argument error for an element without a child key.
    pub fn index_of<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        element: ObjectId,
    ) -> Result<Option<usize>> {
        self.base.read(session, owner, "list.index_of", |session| {
            self.index_of_inner(session, owner, element)
        })
    }

    /// Returns the last position of an element. Elements occur at most once,
    /// so this is [`FkListStore::index_of`].
    ///
    /// # Errors
    ///
    /// See [`FkListStore::index_of`].
    pub fn last_index_of<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        element: ObjectId,
    ) -> Result<Option<usize>> {
        self.base.read(session, owner, "list.last_index_of", |session| {
            self.index_of_inner(session, owner, element)
        })
    }

    fn index_of_inner<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        element: ObjectId,
    ) -> Result<Option<usize>> {
        if !validate::for_reading(session, &self.base, element)? {
            return Ok(None);
        }
        let owner_key = session.ensure_key(owner)?;
        if let Some(order) = self.base.positions() {
            let key = child_key(session, element)?;
            if !owner_key.is_parent_of(&key) {
                return Ok(None);
            }
            return match session.datastore_mut().get(&key) {
                Ok(record) => order.extract(&record).map(Some),
                Err(err) if err.is_not_found() => Ok(None),
                Err(err) => Err(err),
            };
        }
        let Some(key) = session.key(element) else {
            return Ok(None);
        };
        let plan = planner::plan(&self.base, session, owner, &owner_key, Vec::new(), true);
        if let ChildPlan::KeyList { keys, sorts } = &plan {
            if sorts.is_empty() {
                let Some(position) = keys.iter().position(|member| *member == key) else {
                    return Ok(None);
                };
                // Keys without a record are not members, so only those ahead
                // of the element can move it.
                let found = session.datastore_mut().get_many(&keys[..=position])?;
                if !found.iter().any(|record| record.key == key) {
                    return Ok(None);
                }
                return Ok(Some(found.len() - 1));
            }
        }
        let keys = self.base.member_keys(session, owner, &owner_key)?;
        Ok(keys.iter().position(|member| *member == key))
    }

    /// Returns the positions of several members, largest first.
    ///
    /// # Errors
    ///
    /// Returns a store error ("too few keys returned") if any element is not
    /// a member.
    pub fn indices_of<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        elements: &[ObjectId],
    ) -> Result<Vec<usize>> {
        self.base.read(session, owner, "list.indices_of", |session| {
            self.indices_of_inner(session, owner, elements)
        })
    }

    fn indices_of_inner<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        elements: &[ObjectId],
    ) -> Result<Vec<usize>> {
        if elements.is_empty() {
            return Ok(Vec::new());
        }
        let owner_key = session.ensure_key(owner)?;
        let positions = self.base.positions();
        let mut keys = elements
            .iter()
            .map(|element| match positions {
                Some(_) => child_key(session, *element),
                None => element_key(session, *element),
            })
            .collect::<Result<Vec<_>>>()?;
        let wanted: HashSet<Key> = keys.iter().cloned().collect();

        let mut indices = if let Some(order) = positions {
            // One range scan over the element keys, then keep the requested
            // ones.
            keys.sort();
            let (Some(first), Some(last)) = (keys.first(), keys.last()) else {
                return Ok(Vec::new());
            };
            let query = Query::new(self.base.element_kind())
                .with_ancestor(owner_key.clone())
                .with_filter(Filter::new(KEY_PROPERTY, FilterOp::Ge, first.clone()))
                .with_filter(Filter::new(KEY_PROPERTY, FilterOp::Le, last.clone()))
                .with_sort(Sort::descending(KEY_PROPERTY));
            let mut indices = Vec::with_capacity(wanted.len());
            for record in session.datastore_mut().query(&query)? {
                if wanted.contains(&record.key) && owner_key.is_parent_of(&record.key) {
                    indices.push(order.extract(&record)?);
                }
            }
            indices
        } else {
            let members = self.base.member_keys(session, owner, &owner_key)?;
            members
                .iter()
                .enumerate()
                .filter(|(_, key)| wanted.contains(*key))
                .map(|(index, _)| index)
                .collect()
        };

        if indices.len() != wanted.len() {
            return Err(Error::store(format!(
                "Too few keys returned: expected {}, found {}",
                wanted.len(),
                indices.len()
            )));
        }
        indices.sort_unstable_by(|a, b| b.cmp(a));
        Ok(indices)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Appends an element. Returns false if it is already a member.
    ///
    /// When the owner has no key yet the element is queued and written once
    /// the owner is.
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
            .guarded(session, owner, "list.add", |session| {
                self.add_inner(session, owner, None, &[element])
            })
            .map(Option::unwrap_or_default)
    }

    /// Appends several elements. Returns true if any was added.
    ///
    /// # Errors
    ///
    /// See [`FkListStore::add`].
    pub fn add_all<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        elements: &[ObjectId],
    ) -> Result<bool> {
        self.base
            .guarded(session, owner, "list.add_all", |session| {
                self.add_inner(session, owner, None, elements)
            })
            .map(Option::unwrap_or_default)
    }

    /// Inserts an element at `index`, moving later elements up.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if `index` is past the end, or the errors
    /// of [`FkListStore::add`].
    pub fn insert<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        index: usize,
        element: ObjectId,
    ) -> Result<bool> {
        self.base
            .guarded(session, owner, "list.insert", |session| {
                self.add_inner(session, owner, Some(index), &[element])
            })
            .map(Option::unwrap_or_default)
    }

    /// Inserts several elements starting at `index`.
    ///
    /// # Errors
    ///
    /// See [`FkListStore::insert`].
    pub fn insert_all<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        index: usize,
        elements: &[ObjectId],
    ) -> Result<bool> {
        self.base
            .guarded(session, owner, "list.insert_all", |session| {
                self.add_inner(session, owner, Some(index), elements)
            })
            .map(Option::unwrap_or_default)
    }

    fn add_inner<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        index: Option<usize>,
        elements: &[ObjectId],
    ) -> Result<bool> {
        for element in elements {
            validate::for_writing(session, &self.base, *element)?;
            self.check_owner(session, owner, *element)?;
        }
        lifecycle::check_batch(session, &self.base, owner, elements)?;
        if elements.is_empty() {
            return Ok(false);
        }
        let appending = index.is_none() || !self.base.relation().is_indexed();
        if appending && session.key(owner).is_none() {
            return self.defer_append(session, owner, elements);
        }

        let owner_key = session.ensure_key(owner)?;
        let mut keys = self.base.member_keys(session, owner, &owner_key)?;
        let size = keys.len();
        let start = match index {
            Some(index) if !appending => index,
            _ => size,
        };
        if start > size {
            return Err(Error::index_out_of_bounds(start, size));
        }

        let mut fresh: Vec<ObjectId> = Vec::with_capacity(elements.len());
        for element in elements {
            let member = session.key(*element).is_some_and(|key| keys.contains(&key));
            if member || fresh.contains(element) {
                debug!(element = %element, field = self.base.field(), "already a list member");
                continue;
            }
            fresh.push(*element);
        }
        if fresh.is_empty() {
            return Ok(false);
        }

        if let Some(order) = self.base.positions() {
            if start < size {
                let amount = i64::try_from(fresh.len()).unwrap_or(i64::MAX);
                order.shift(
                    session,
                    &owner_key,
                    self.base.element_kind(),
                    FilterOp::Ge,
                    start,
                    amount,
                )?;
            }
        }

        for (offset, element) in fresh.iter().enumerate() {
            let position = start + offset;
            lifecycle::bind_element(session, &self.base, owner, *element, Some(position))?;
            if self.base.writes_child_keys() {
                keys.insert(position, session.ensure_key(*element)?);
            }
        }
        if self.base.writes_child_keys() {
            session.set_key_list(owner, self.base.field(), keys)?;
        }
        Ok(true)
    }

    /// Queues elements appended to an owner that has no key yet.
    fn defer_append<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        elements: &[ObjectId],
    ) -> Result<bool> {
        let mut added = false;
        for element in elements {
            let members = session.deferred_members(owner, self.base.field());
            if members.contains(element) {
                continue;
            }
            let position = members.len();
            lifecycle::bind_element(session, &self.base, owner, *element, Some(position))?;
            session.defer_member(
                owner,
                self.base.field_name(),
                *element,
                self.base.writes_child_keys(),
            );
            added = true;
        }
        Ok(added)
    }

    /// A bidirectional element may not already point at another owner.
    fn check_owner<D: Datastore>(
        &self,
        session: &Session<D>,
        owner: ObjectId,
        element: ObjectId,
    ) -> Result<()> {
        match lifecycle::owner_check(session, &self.base, owner, element) {
            lifecycle::OwnerCheck::Foreign { reattaching: false } => Err(Error::ownership(
                format!("object {element} already belongs to another {}", self.base.owner_class()),
            )),
            _ => Ok(()),
        }
    }

    /// Replaces the element at `index`, returning the one it displaced.
    ///
    /// The displaced element is released as if removed.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` past the end, or an invalid argument error
    /// if the new element is already elsewhere in the list.
    pub fn set<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        index: usize,
        element: ObjectId,
    ) -> Result<ObjectId> {
        self.base
            .guarded(session, owner, "list.set", |session| {
                self.set_inner(session, owner, index, element)
            })?
            .ok_or_else(|| nested("list.set"))
    }

    fn set_inner<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        index: usize,
        element: ObjectId,
    ) -> Result<ObjectId> {
        validate::for_writing(session, &self.base, element)?;
        self.check_owner(session, owner, element)?;
        lifecycle::check_batch(session, &self.base, owner, &[element])?;
        let owner_key = session.ensure_key(owner)?;
        let mut keys = self.base.member_keys(session, owner, &owner_key)?;
        let displaced_key = keys
            .get(index)
            .cloned()
            .ok_or_else(|| Error::index_out_of_bounds(index, keys.len()))?;
        let displaced = session.find(&displaced_key)?;
        if displaced == element {
            return Ok(displaced);
        }
        if session.key(element).is_some_and(|key| keys.contains(&key)) {
            return Err(Error::invalid_argument(format!(
                "object {element} is already in the list"
            )));
        }

        lifecycle::release_element(session, &self.base, owner, displaced)?;
        lifecycle::bind_element(session, &self.base, owner, element, Some(index))?;
        if self.base.writes_child_keys() {
            keys[index] = session.ensure_key(element)?;
            session.set_key_list(owner, self.base.field(), keys)?;
        }
        Ok(displaced)
    }

    /// Removes an element. Returns false if it was not a member.
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
            .guarded(session, owner, "list.remove", |session| {
                self.remove_inner(session, owner, element)
            })
            .map(Option::unwrap_or_default)
    }

    fn remove_inner<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        element: ObjectId,
    ) -> Result<bool> {
        if !validate::for_reading(session, &self.base, element)? {
            return Ok(false);
        }
        let owner_key = session.ensure_key(owner)?;
        let Some(key) = session.key(element) else {
            return Ok(false);
        };
        let keys = self.base.member_keys(session, owner, &owner_key)?;
        let Some(index) = keys.iter().position(|member| *member == key) else {
            return Ok(false);
        };
        self.remove_position(session, owner, &owner_key, keys, index)?;
        Ok(true)
    }

    /// Removes the element at `index`, moving later elements down.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` past the end.
    pub fn remove_at<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        index: usize,
    ) -> Result<ObjectId> {
        self.base
            .guarded(session, owner, "list.remove_at", |session| {
                self.remove_at_inner(session, owner, index)
            })?
            .ok_or_else(|| nested("list.remove_at"))
    }

    fn remove_at_inner<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        index: usize,
    ) -> Result<ObjectId> {
        let owner_key = session.ensure_key(owner)?;
        let keys = self.base.member_keys(session, owner, &owner_key)?;
        if index >= keys.len() {
            return Err(Error::index_out_of_bounds(index, keys.len()));
        }
        self.remove_position(session, owner, &owner_key, keys, index)
    }

    fn remove_position<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        owner_key: &Key,
        mut keys: Vec<Key>,
        index: usize,
    ) -> Result<ObjectId> {
        let key = keys.remove(index);
        let element = session.find(&key)?;
        if self.base.writes_child_keys() {
            session.set_key_list(owner, self.base.field(), keys)?;
        }
        lifecycle::release_element(session, &self.base, owner, element)?;
        if let Some(order) = self.base.positions() {
            order.shift(
                session,
                owner_key,
                self.base.element_kind(),
                FilterOp::Gt,
                index,
                -1,
            )?;
        }
        Ok(element)
    }

    /// Removes every listed element that is a member. Returns true if any
    /// was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if a read or write fails.
    pub fn remove_all<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        elements: &[ObjectId],
    ) -> Result<bool> {
        self.base
            .guarded(session, owner, "list.remove_all", |session| {
                self.remove_all_inner(session, owner, elements)
            })
            .map(Option::unwrap_or_default)
    }

    fn remove_all_inner<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        elements: &[ObjectId],
    ) -> Result<bool> {
        session.ensure_key(owner)?;
        let mut members = Vec::new();
        for element in elements {
            if !members.contains(element) && self.base.contains_inner(session, owner, *element)? {
                members.push(*element);
            }
        }
        if members.is_empty() {
            return Ok(false);
        }
        if self.base.relation().is_indexed() {
            // Largest first so earlier removals do not move later targets.
            for index in self.indices_of_inner(session, owner, &members)? {
                self.remove_at_inner(session, owner, index)?;
            }
        } else {
            for element in members {
                self.remove_inner(session, owner, element)?;
            }
        }
        Ok(true)
    }

    /// Removes every element.
    ///
    /// # Errors
    ///
    /// Returns an error if a read or write fails.
    pub fn clear<D: Datastore>(&self, session: &mut Session<D>, owner: ObjectId) -> Result<()> {
        self.base
            .guarded(session, owner, "list.clear", |session| {
                self.clear_inner(session, owner)
            })
            .map(|_| ())
    }

    fn clear_inner<D: Datastore>(&self, session: &mut Session<D>, owner: ObjectId) -> Result<()> {
        let owner_key = session.ensure_key(owner)?;
        let members = self
            .base
            .member_records(session, owner, &owner_key, Vec::new())?;
        if self.base.writes_child_keys() {
            session.set_key_list(owner, self.base.field(), Vec::new())?;
        }
        for record in members {
            let element = session.materialize(record)?;
            lifecycle::release_element(session, &self.base, owner, element)?;
        }
        Ok(())
    }

    /// Makes the list equal to `target`.
    ///
    /// Members missing from `target` are removed. If the remaining members
    /// already equal `target` nothing else is written; otherwise the list is
    /// cleared and rebuilt from `target`.
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
            .guarded(session, owner, "list.update", |session| {
                self.update_inner(session, owner, target)
            })
            .map(|_| ())
    }

    fn update_inner<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner: ObjectId,
        target: &[ObjectId],
    ) -> Result<()> {
        session.ensure_key(owner)?;
        if target.is_empty() {
            return self.clear_inner(session, owner);
        }
        let mut retained = Vec::new();
        for element in self.base.elements_inner(session, owner)? {
            if target.contains(&element) {
                retained.push(element);
            } else {
                self.remove_inner(session, owner, element)?;
            }
        }
        if retained == target {
            return Ok(());
        }
        debug!(owner = %owner, field = self.base.field(), "rebuilding reordered list");
        self.clear_inner(session, owner)?;
        self.add_inner(session, owner, None, target)?;
        Ok(())
    }
}

fn element_key<D: Datastore>(session: &Session<D>, element: ObjectId) -> Result<Key> {
    session.key(element).ok_or_else(|| {
        Error::invalid_argument(format!(
            "Collection element does not have a primary key: {element}"
        ))
    })
}

/// The element's key, which must name a parent.
fn child_key<D: Datastore>(session: &Session<D>, element: ObjectId) -> Result<Key> {
    let key = element_key(session, element)?;
    if key.parent().is_none() {
        return Err(Error::invalid_argument(format!(
            "Collection element primary key does not have a parent: {key}"
        )));
    }
    Ok(key)
}

fn nested(operation: &str) -> Error {
    Error::invalid_argument(format!(
        "{operation} cannot run while the same collection is being modified"
    ))
}
