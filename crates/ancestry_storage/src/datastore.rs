//! The raw store client.

use ancestry_foundation::{Key, Result};

use crate::query::Query;
use crate::record::Record;

/// Primitive operations of an ancestor-keyed datastore.
///
/// While a transaction is active every call participates in it. Outside a
/// transaction each call is atomic on its own and nothing groups them.
pub trait Datastore {
    /// Reads one record.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if no record exists for the key.
    fn get(&mut self, key: &Key) -> Result<Record>;

    /// Reads several records, skipping keys that have no record.
    ///
    /// # Errors
    ///
    /// Returns an error if the datastore fails.
    fn get_many(&mut self, keys: &[Key]) -> Result<Vec<Record>>;

    /// Writes a record, allocating an id if its key is incomplete.
    ///
    /// # Errors
    ///
    /// Returns an error if the write is rejected.
    fn put(&mut self, record: Record) -> Result<Key>;

    /// Deletes a record. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete is rejected.
    fn delete(&mut self, key: &Key) -> Result<()>;

    /// Runs a query.
    ///
    /// # Errors
    ///
    /// Returns an error if the datastore fails.
    fn query(&mut self, query: &Query) -> Result<Vec<Record>>;

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is already active.
    fn begin_transaction(&mut self) -> Result<()>;

    /// Commits the active transaction.
    ///
    /// # Errors
    ///
    /// Returns `ConcurrentModification` if another writer committed to an
    /// enlisted entity group first. The transaction is discarded either way.
    fn commit(&mut self) -> Result<()>;

    /// Discards the active transaction. A no-op when none is active.
    ///
    /// # Errors
    ///
    /// Returns an error if the datastore fails.
    fn rollback(&mut self) -> Result<()>;

    /// Returns true while a transaction is active.
    fn in_transaction(&self) -> bool;
}
