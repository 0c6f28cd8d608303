//! Ancestor-scoped queries with flat property filters and sorts.
//!
//! Evaluation follows the datastore's rules:
//! - an ancestor matches itself and all of its descendants
//! - a record without a filtered or sorted property never matches
//! - a multi-valued (`KeyList`) property matches a scalar filter if any
//!   element matches
//! - ties after the declared sorts are broken by key ascending

use std::cmp::Ordering;
use std::sync::Arc;

use ancestry_foundation::{Key, Value};

use crate::record::Record;

/// Reserved property name that refers to the record key.
pub const KEY_PROPERTY: &str = "__key__";

/// Comparison operator of a filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterOp {
    /// Equal.
    Eq,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

impl FilterOp {
    fn test(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

/// A property filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    /// Property name, or [`KEY_PROPERTY`].
    pub property: Arc<str>,
    /// Comparison operator.
    pub op: FilterOp,
    /// Value to compare against.
    pub value: Value,
}

impl Filter {
    /// Creates a filter.
    #[must_use]
    pub fn new(property: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            property: Arc::from(property),
            op,
            value: value.into(),
        }
    }

    /// Returns true if the record satisfies this filter.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        if &*self.property == KEY_PROPERTY {
            let key = Value::Key(record.key.clone());
            return self.op.test(key.cmp(&self.value));
        }
        match record.get(&self.property) {
            None => false,
            Some(Value::KeyList(keys)) if !matches!(self.value, Value::KeyList(_)) => keys
                .iter()
                .any(|key| self.op.test(Value::Key(key.clone()).cmp(&self.value))),
            Some(value) => self.op.test(value.cmp(&self.value)),
        }
    }
}

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SortDirection {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// A sort order on one property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sort {
    /// Property name, or [`KEY_PROPERTY`].
    pub property: Arc<str>,
    /// Direction.
    pub direction: SortDirection,
}

impl Sort {
    /// Sorts ascending by a property.
    #[must_use]
    pub fn ascending(property: &str) -> Self {
        Self {
            property: Arc::from(property),
            direction: SortDirection::Ascending,
        }
    }

    /// Sorts descending by a property.
    #[must_use]
    pub fn descending(property: &str) -> Self {
        Self {
            property: Arc::from(property),
            direction: SortDirection::Descending,
        }
    }

    fn value_of(&self, record: &Record) -> Option<Value> {
        if &*self.property == KEY_PROPERTY {
            Some(Value::Key(record.key.clone()))
        } else {
            record.get(&self.property).cloned()
        }
    }
}

/// A datastore query over one kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    /// Kind of record to return.
    pub kind: Arc<str>,
    /// Restricts results to this key and its descendants.
    pub ancestor: Option<Key>,
    /// Filters, all of which must match.
    pub filters: Vec<Filter>,
    /// Sort orders, applied in sequence.
    pub sorts: Vec<Sort>,
    /// Return keys without properties.
    pub keys_only: bool,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl Query {
    /// Creates a query for every record of a kind.
    #[must_use]
    pub fn new(kind: &str) -> Self {
        Self {
            kind: Arc::from(kind),
            ancestor: None,
            filters: Vec::new(),
            sorts: Vec::new(),
            keys_only: false,
            limit: None,
        }
    }

    /// Restricts the query to an ancestor.
    #[must_use]
    pub fn with_ancestor(mut self, ancestor: Key) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    /// Adds a filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Adds several filters.
    #[must_use]
    pub fn with_filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    /// Adds a sort order.
    #[must_use]
    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sorts.push(sort);
        self
    }

    /// Adds several sort orders.
    #[must_use]
    pub fn with_sorts(mut self, sorts: impl IntoIterator<Item = Sort>) -> Self {
        self.sorts.extend(sorts);
        self
    }

    /// Returns keys only.
    #[must_use]
    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if the record satisfies kind, ancestor, filters and has
    /// every sorted property.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        if record.key.kind() != &*self.kind {
            return false;
        }
        if let Some(ancestor) = &self.ancestor {
            if !ancestor.contains(&record.key) {
                return false;
            }
        }
        self.filters.iter().all(|filter| filter.matches(record))
            && self.sorts.iter().all(|sort| sort.value_of(record).is_some())
    }

    /// Compares two matching records by the sort orders, then by key.
    #[must_use]
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for sort in &self.sorts {
            let ordering = sort.value_of(a).cmp(&sort.value_of(b));
            let ordering = match sort.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.key.cmp(&b.key)
    }

    /// Evaluates the query over candidate records.
    pub fn execute<'a>(&self, candidates: impl IntoIterator<Item = &'a Record>) -> Vec<Record> {
        let mut results: Vec<Record> = candidates
            .into_iter()
            .filter(|record| self.matches(record))
            .cloned()
            .collect();
        results.sort_by(|a, b| self.compare(a, b));
        if let Some(limit) = self.limit {
            results.truncate(limit);
        }
        if self.keys_only {
            results = results.iter().map(Record::keys_only).collect();
        }
        results
    }
}
