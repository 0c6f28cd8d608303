//! Datastore records.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use ancestry_foundation::{Key, PropertyMap, Value};

/// A stored record: a key plus its properties.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Record {
    /// Record key. May be incomplete before the first write.
    pub key: Key,
    /// Property values.
    pub properties: PropertyMap,
}

impl Record {
    /// Creates a record with no properties.
    #[must_use]
    pub fn new(key: Key) -> Self {
        Self {
            key,
            properties: PropertyMap::new(),
        }
    }

    /// Creates a record with the given properties.
    #[must_use]
    pub fn with_properties(key: Key, properties: PropertyMap) -> Self {
        Self { key, properties }
    }

    /// Builder method to set a property.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name, value.into());
        self
    }

    /// Gets a property.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Sets a property.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.properties.insert(name, value.into());
    }

    /// Returns the key of the record's parent.
    #[must_use]
    pub fn parent(&self) -> Option<Key> {
        self.key.parent()
    }

    /// Returns a keys-only copy of the record.
    #[must_use]
    pub fn keys_only(&self) -> Self {
        Self::new(self.key.clone())
    }
}
