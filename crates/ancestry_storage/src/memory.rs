//! Shared in-memory datastore with optimistic entity-group transactions.
//!
//! Committed data lives in a persistent ordered map shared by every handle
//! opened on the same store. A transaction works on an O(1) snapshot of that
//! map and records the version of each entity group it touches; commit fails
//! if another handle has committed to one of those groups since.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use ancestry_foundation::{Error, Key, KeyId, Result};

use crate::datastore::Datastore;
use crate::query::Query;
use crate::record::Record;

/// Default cap on entity groups enlisted by one transaction.
pub const DEFAULT_MAX_ENTITY_GROUPS: usize = 25;

/// Committed state shared between handles.
#[derive(Default)]
struct Shared {
    records: im::OrdMap<Key, Record>,
    versions: im::HashMap<Key, u64>,
    next_id: i64,
}

/// Counters of datastore calls.
#[derive(Debug, Default)]
pub struct DatastoreStats {
    gets: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
    queries: AtomicU64,
}

/// Point-in-time copy of [`DatastoreStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Records read by `get`/`get_many`.
    pub gets: u64,
    /// Records written.
    pub puts: u64,
    /// Records deleted.
    pub deletes: u64,
    /// Queries run.
    pub queries: u64,
}

impl StatsSnapshot {
    /// Number of writes (puts plus deletes).
    #[must_use]
    pub const fn writes(&self) -> u64 {
        self.puts + self.deletes
    }
}

impl DatastoreStats {
    /// Returns the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            gets: self.gets.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Transaction-local view.
struct Transaction {
    records: im::OrdMap<Key, Record>,
    versions: im::HashMap<Key, u64>,
    enlisted: BTreeSet<Key>,
    written: BTreeSet<Key>,
    log: Vec<(Key, Option<Record>)>,
}

/// In-memory [`Datastore`].
///
/// Cloning via [`MemoryDatastore::handle`] opens another connection to the
/// same data with its own transaction state.
pub struct MemoryDatastore {
    shared: Arc<RwLock<Shared>>,
    stats: Arc<DatastoreStats>,
    max_entity_groups: usize,
    txn: Option<Transaction>,
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatastore {
    /// Creates an empty datastore.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RwLock::new(Shared::default())),
            stats: Arc::new(DatastoreStats::default()),
            max_entity_groups: DEFAULT_MAX_ENTITY_GROUPS,
            txn: None,
        }
    }

    /// Builder method to set the entity-group cap per transaction.
    #[must_use]
    pub fn with_max_entity_groups(mut self, max: usize) -> Self {
        self.max_entity_groups = max;
        self
    }

    /// Opens another handle on the same data.
    #[must_use]
    pub fn handle(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            stats: Arc::clone(&self.stats),
            max_entity_groups: self.max_entity_groups,
            txn: None,
        }
    }

    /// Returns the call counters shared by all handles.
    #[must_use]
    pub fn stats(&self) -> &DatastoreStats {
        &self.stats
    }

    /// Returns the number of committed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.read().records.len()
    }

    /// Returns true if nothing has been committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn complete_key(&self, key: &Key) -> Result<Key> {
        if key.is_complete() {
            return Ok(key.clone());
        }
        if let Some(parent) = key.parent() {
            if !parent.is_complete() {
                return Err(Error::invalid_argument(format!(
                    "cannot write {key}: parent key is incomplete"
                )));
            }
        }
        let mut shared = self.shared.write();
        shared.next_id += 1;
        Ok(key.with_id(KeyId::Id(shared.next_id)))
    }

    fn enlist(&mut self, key: &Key) -> Result<()> {
        let max = self.max_entity_groups;
        let Some(txn) = self.txn.as_mut() else {
            return Ok(());
        };
        let group = key.entity_group();
        if !txn.enlisted.contains(&group) {
            if txn.enlisted.len() >= max {
                return Err(Error::store(format!(
                    "transaction would touch more than {max} entity groups"
                )));
            }
            txn.enlisted.insert(group);
        }
        Ok(())
    }

    fn scan(records: &im::OrdMap<Key, Record>, query: &Query) -> Vec<Record> {
        match &query.ancestor {
            Some(ancestor) => query.execute(
                records
                    .range(ancestor.clone()..)
                    .take_while(|(key, _)| ancestor.contains(key))
                    .map(|(_, record)| record),
            ),
            None => query.execute(records.values()),
        }
    }
}

impl Datastore for MemoryDatastore {
    fn get(&mut self, key: &Key) -> Result<Record> {
        DatastoreStats::bump(&self.stats.gets, 1);
        self.enlist(key)?;
        let found = match &self.txn {
            Some(txn) => txn.records.get(key).cloned(),
            None => self.shared.read().records.get(key).cloned(),
        };
        found.ok_or_else(|| Error::key_not_found(key.clone()))
    }

    fn get_many(&mut self, keys: &[Key]) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            self.enlist(key)?;
        }
        {
            let shared = self.shared.read();
            let source = self.txn.as_ref().map_or(&shared.records, |txn| &txn.records);
            for key in keys {
                if let Some(record) = source.get(key) {
                    records.push(record.clone());
                }
            }
        }
        DatastoreStats::bump(&self.stats.gets, keys.len() as u64);
        Ok(records)
    }

    fn put(&mut self, mut record: Record) -> Result<Key> {
        let key = self.complete_key(&record.key)?;
        record.key = key.clone();
        self.enlist(&key)?;
        DatastoreStats::bump(&self.stats.puts, 1);

        match self.txn.as_mut() {
            Some(txn) => {
                txn.records.insert(key.clone(), record.clone());
                txn.written.insert(key.entity_group());
                txn.log.push((key.clone(), Some(record)));
            }
            None => {
                let mut shared = self.shared.write();
                shared.records.insert(key.clone(), record);
                *shared.versions.entry(key.entity_group()).or_insert(0) += 1;
            }
        }
        Ok(key)
    }

    fn delete(&mut self, key: &Key) -> Result<()> {
        self.enlist(key)?;
        DatastoreStats::bump(&self.stats.deletes, 1);

        match self.txn.as_mut() {
            Some(txn) => {
                txn.records.remove(key);
                txn.written.insert(key.entity_group());
                txn.log.push((key.clone(), None));
            }
            None => {
                let mut shared = self.shared.write();
                if shared.records.remove(key).is_some() {
                    *shared.versions.entry(key.entity_group()).or_insert(0) += 1;
                }
            }
        }
        Ok(())
    }

    fn query(&mut self, query: &Query) -> Result<Vec<Record>> {
        DatastoreStats::bump(&self.stats.queries, 1);
        if let Some(ancestor) = &query.ancestor {
            self.enlist(ancestor)?;
        }
        match &self.txn {
            Some(txn) => Ok(Self::scan(&txn.records, query)),
            None => Ok(Self::scan(&self.shared.read().records, query)),
        }
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if self.txn.is_some() {
            return Err(Error::invalid_argument("a transaction is already active"));
        }
        let shared = self.shared.read();
        self.txn = Some(Transaction {
            records: shared.records.clone(),
            versions: shared.versions.clone(),
            enlisted: BTreeSet::new(),
            written: BTreeSet::new(),
            log: Vec::new(),
        });
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let Some(txn) = self.txn.take() else {
            return Err(Error::invalid_argument("no active transaction"));
        };
        let mut shared = self.shared.write();
        for group in &txn.enlisted {
            let seen = txn.versions.get(group).copied().unwrap_or(0);
            let current = shared.versions.get(group).copied().unwrap_or(0);
            if seen != current {
                debug!(%group, seen, current, "optimistic check failed");
                return Err(Error::concurrent_modification(group.clone()));
            }
        }
        for (key, record) in txn.log {
            match record {
                Some(record) => {
                    shared.records.insert(key, record);
                }
                None => {
                    shared.records.remove(&key);
                }
            }
        }
        for group in txn.written {
            *shared.versions.entry(group).or_insert(0) += 1;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.txn = None;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }
}
