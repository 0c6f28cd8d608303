//! Upgrading owners written before parents held child key lists.

use std::sync::Arc;

use tracing::{debug, info};

use ancestry_foundation::{Key, Result};
use ancestry_storage::{DISCRIMINATOR_PROPERTY, Datastore, Query, Record};

use crate::manager::StoreManager;

/// Fills in missing child key lists on owner records.
pub struct Migrator {
    manager: Arc<StoreManager>,
}

impl Migrator {
    /// Creates a migrator for the manager's relations.
    #[must_use]
    pub fn new(manager: Arc<StoreManager>) -> Self {
        Self { manager }
    }

    /// Adds the key list of every owned collection the record lacks.
    ///
    /// Children are found by ancestor query and kept in collection order.
    /// Records of another kind, or whose discriminator names a class that is
    /// not `class` or a subclass of it, are left alone. Returns true if the
    /// record changed; the caller writes it.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown classes or if a query fails.
    pub fn migrate<D: Datastore>(
        &self,
        datastore: &mut D,
        record: &mut Record,
        class: &str,
    ) -> Result<bool> {
        let registry = self.manager.registry();
        let meta = registry.require(class)?;
        if record.key.kind() != meta.kind() {
            return Ok(false);
        }
        let Some(resolved) =
            registry.resolve(record.key.kind(), record.get(DISCRIMINATOR_PROPERTY))
        else {
            return Ok(false);
        };
        if !registry.is_assignable(&resolved.name, class) {
            return Ok(false);
        }

        let mut changed = false;
        for store in self.manager.relations_of(&resolved.name) {
            let base = store.base();
            if !base.relation().owned || record.get(base.field()).is_some() {
                continue;
            }
            let query = Query::new(base.element_kind())
                .with_ancestor(record.key.clone())
                .with_sorts(base.child_sorts())
                .keys_only();
            let keys: Vec<Key> = datastore
                .query(&query)?
                .into_iter()
                .map(|child| child.key)
                .filter(|key| record.key.is_parent_of(key))
                .collect();
            info!(
                owner = %record.key,
                field = base.field(),
                children = keys.len(),
                "migrating child keys to parent"
            );
            record.set(base.field(), keys);
            changed = true;
        }
        Ok(changed)
    }

    /// Migrates and rewrites every record of a class. Returns the number of
    /// records rewritten.
    ///
    /// # Errors
    ///
    /// Returns an error if a query or write fails.
    pub fn migrate_all<D: Datastore>(&self, datastore: &mut D, class: &str) -> Result<usize> {
        let kind = self.manager.registry().require(class)?.kind().to_owned();
        let records = datastore.query(&Query::new(&kind))?;
        let mut rewritten = 0;
        for mut record in records {
            if self.migrate(datastore, &mut record, class)? {
                datastore.put(record)?;
                rewritten += 1;
            }
        }
        debug!(class, rewritten, "migration finished");
        Ok(rewritten)
    }
}
