//! List positions stored on element records.
//!
//! When children are found by ancestor query, an indexed list keeps each
//! element's position in an order property. Positions must stay contiguous
//! from zero, so inserting or removing in the middle shifts every later
//! element. A shift issues one write per affected element and is only atomic
//! inside a transaction.

use std::sync::Arc;

use tracing::debug;

use ancestry_foundation::{Error, Key, Result, Value};
use ancestry_storage::{
    Datastore, FieldOrder, Filter, FilterOp, KEY_PROPERTY, Query, Record, Sort,
};

use crate::session::Session;

/// The property holding list positions and whether it may be cleared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderIndex {
    property: Arc<str>,
    nullable: bool,
}

impl OrderIndex {
    /// Creates an order index.
    #[must_use]
    pub fn new(property: &str, nullable: bool) -> Self {
        Self {
            property: Arc::from(property),
            nullable,
        }
    }

    /// Returns the order property name.
    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Returns true if the order property may be cleared on removal.
    #[must_use]
    pub const fn nullable(&self) -> bool {
        self.nullable
    }

    /// Filters selecting positions in `[start, end)`.
    ///
    /// Equal bounds select the single position `start`.
    #[must_use]
    pub fn filter_predicates(&self, start: Option<usize>, end: Option<usize>) -> Vec<Filter> {
        let position = |index: usize| i64::try_from(index).unwrap_or(i64::MAX);
        match (start, end) {
            (Some(start), Some(end)) if start == end => {
                vec![Filter::new(&self.property, FilterOp::Eq, position(start))]
            }
            (start, end) => start
                .map(|start| Filter::new(&self.property, FilterOp::Ge, position(start)))
                .into_iter()
                .chain(end.map(|end| Filter::new(&self.property, FilterOp::Lt, position(end))))
                .collect(),
        }
    }

    /// Sorts by position ascending.
    #[must_use]
    pub fn sort_predicates(&self) -> Vec<Sort> {
        vec![Sort::ascending(&self.property)]
    }

    /// Reads a record's position.
    ///
    /// # Errors
    ///
    /// Returns a store error if the record has no position.
    pub fn extract(&self, record: &Record) -> Result<usize> {
        record
            .get(&self.property)
            .and_then(Value::as_int)
            .and_then(|position| usize::try_from(position).ok())
            .ok_or_else(|| {
                Error::store(format!(
                    "Null index value for {} in property {}",
                    record.key, self.property
                ))
            })
    }

    /// Adds `amount` to the position of every direct child of `owner_key`
    /// whose position compares to `from` by `op`.
    ///
    /// Elements are rewritten starting from the end the list moves towards,
    /// so no two elements hold the same position between writes. Returns the
    /// number of elements moved.
    ///
    /// # Errors
    ///
    /// Returns an error if a read or write fails. Elements already moved stay
    /// moved.
    pub fn shift<D: Datastore>(
        &self,
        session: &mut Session<D>,
        owner_key: &Key,
        kind: &str,
        op: FilterOp,
        from: usize,
        amount: i64,
    ) -> Result<usize> {
        let query = Query::new(kind)
            .with_ancestor(owner_key.clone())
            .with_filter(Filter::new(
                &self.property,
                op,
                i64::try_from(from).unwrap_or(i64::MAX),
            ))
            .with_sort(if amount > 0 {
                Sort::descending(&self.property)
            } else {
                Sort::ascending(&self.property)
            });
        let records = session.datastore_mut().query(&query)?;
        let mut moved = 0;
        for record in records {
            if !owner_key.is_parent_of(&record.key) {
                continue;
            }
            let Some(position) = record.get(&self.property).and_then(Value::as_int) else {
                continue;
            };
            let element = session.materialize(record)?;
            session.set_property_raw(element, &self.property, Value::Int(position + amount))?;
            session.write_object(element)?;
            moved += 1;
        }
        debug!(owner = %owner_key, from, amount, moved, "shifted list positions");
        Ok(moved)
    }
}

/// Sorts for a list ordered by declared fields.
///
/// The primary key sorts by record key. Records are already returned in key
/// order, so a leading ascending primary-key sort needs no sort at all. The
/// key is unique, so no sort after it can matter.
#[must_use]
pub fn field_sorts(field_orders: &[FieldOrder], primary_key: &str) -> Vec<Sort> {
    let mut sorts = Vec::new();
    for order in field_orders {
        let property = if &*order.field == primary_key {
            if order.ascending && sorts.is_empty() {
                break;
            }
            KEY_PROPERTY
        } else {
            &*order.field
        };
        sorts.push(if order.ascending {
            Sort::ascending(property)
        } else {
            Sort::descending(property)
        });
        if property == KEY_PROPERTY {
            break;
        }
    }
    sorts
}
