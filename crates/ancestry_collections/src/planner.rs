//! Chooses how to find a collection's members.
//!
//! Members are read either from the key list stored on the owner or by an
//! ancestor query on the element kind, depending on the storage version and
//! whether the relation is owned. Owned relations whose owner predates key
//! lists fall back to the ancestor query.

use std::collections::HashMap;

use tracing::{info, warn};

use ancestry_foundation::{Key, Result};
use ancestry_storage::{Datastore, Filter, Query, Record, Sort};

use crate::fk_store::FkStore;
use crate::session::{ObjectId, Session};

/// A plan for reading a collection's members.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChildPlan {
    /// Batch-get these keys, then sort in memory if `sorts` is non-empty.
    KeyList {
        /// Member keys in collection order.
        keys: Vec<Key>,
        /// Declared field ordering to apply after the read.
        sorts: Vec<Sort>,
    },
    /// Query direct children of the owner.
    Ancestor(Query),
}

/// Plans the read of the owner's members.
///
/// `filters` only apply to ancestor queries; they select list positions.
pub fn plan<D: Datastore>(
    store: &FkStore,
    session: &Session<D>,
    owner: ObjectId,
    owner_key: &Key,
    filters: Vec<Filter>,
    keys_only: bool,
) -> ChildPlan {
    let sorts = store.child_sorts();
    if store.reads_child_keys() {
        match session.key_list(owner, store.field()) {
            Some(keys) => {
                let sorts = if store.relation().is_indexed() {
                    Vec::new()
                } else {
                    sorts
                };
                return ChildPlan::KeyList { keys, sorts };
            }
            None if !store.relation().owned => {
                return ChildPlan::KeyList {
                    keys: Vec::new(),
                    sorts: Vec::new(),
                };
            }
            None => warn!(
                owner = %owner_key,
                field = store.field(),
                "owner has no child key list and has not been migrated; using an ancestor query"
            ),
        }
    }

    let query = Query::new(store.element_kind())
        .with_ancestor(owner_key.clone())
        .with_filters(filters)
        .with_sorts(sorts);
    ChildPlan::Ancestor(if keys_only { query.keys_only() } else { query })
}

/// Runs a plan, returning member records in collection order.
///
/// Keys without a record are skipped. Ancestor results are restricted to
/// direct children, since the ancestor also matches grandchildren.
///
/// # Errors
///
/// Returns an error if the datastore fails.
pub fn fetch<D: Datastore>(
    store: &FkStore,
    session: &mut Session<D>,
    owner_key: &Key,
    plan: ChildPlan,
) -> Result<Vec<Record>> {
    match plan {
        ChildPlan::KeyList { keys, sorts } => {
            let found = session.datastore_mut().get_many(&keys)?;
            let mut by_key: HashMap<Key, Record> = found
                .into_iter()
                .map(|record| (record.key.clone(), record))
                .collect();
            let mut records = Vec::with_capacity(keys.len());
            for key in keys {
                match by_key.remove(&key) {
                    Some(record) => records.push(record),
                    None => info!(
                        owner = %owner_key,
                        child = %key,
                        field = store.field(),
                        "skipping child key with no record"
                    ),
                }
            }
            if !sorts.is_empty() {
                let order = Query::new(store.element_kind()).with_sorts(sorts);
                records.sort_by(|a, b| order.compare(a, b));
            }
            Ok(records)
        }
        ChildPlan::Ancestor(query) => {
            let mut records = session.datastore_mut().query(&query)?;
            records.retain(|record| owner_key.is_parent_of(&record.key));
            Ok(records)
        }
    }
}
