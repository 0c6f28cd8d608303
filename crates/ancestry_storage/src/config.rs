//! Store configuration.

use crate::memory::DEFAULT_MAX_ENTITY_GROUPS;
use crate::schema::StorageVersion;

use ancestry_foundation::{Error, Result};

/// Property selecting the storage version.
pub const STORAGE_VERSION_PROPERTY: &str = "ancestry.storage_version";

/// Property allowing several owned relations of one element type per class.
pub const ALLOW_MULTIPLE_RELATIONS_PROPERTY: &str =
    "ancestry.allow_multiple_relations_of_same_type";

/// Property capping the entity groups one transaction may touch.
pub const MAX_ENTITY_GROUPS_PROPERTY: &str = "ancestry.max_entity_groups";

/// Configuration shared by every collection store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// How owned relationships are encoded.
    pub storage_version: StorageVersion,

    /// Permit several owned relations of the same or assignable element type
    /// on one class even when children are discovered by ancestor query.
    pub allow_multiple_relations_of_same_type: bool,

    /// Entity-group cap for transactions, for datastores that honour it.
    pub max_entity_groups: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_version: StorageVersion::default(),
            allow_multiple_relations_of_same_type: false,
            max_entity_groups: DEFAULT_MAX_ENTITY_GROUPS,
        }
    }
}

impl StoreConfig {
    /// Configuration for data written before parents held child keys.
    #[must_use]
    pub fn legacy() -> Self {
        Self {
            storage_version: StorageVersion::ParentsDoNotReferToChildren,
            ..Self::default()
        }
    }

    /// Builder method to set the storage version.
    #[must_use]
    pub fn with_storage_version(mut self, version: StorageVersion) -> Self {
        self.storage_version = version;
        self
    }

    /// Builder method to allow multiple relations of the same element type.
    #[must_use]
    pub fn with_multiple_relations_of_same_type(mut self, allow: bool) -> Self {
        self.allow_multiple_relations_of_same_type = allow;
        self
    }

    /// Builder method to set the entity-group cap.
    #[must_use]
    pub fn with_max_entity_groups(mut self, max: usize) -> Self {
        self.max_entity_groups = max;
        self
    }

    /// Reads configuration from `(name, value)` properties.
    ///
    /// Unset properties keep their defaults and unknown names are ignored.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for values that do not parse, listing
    /// the legal values for the storage version.
    pub fn from_properties<'a>(
        properties: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self> {
        let mut config = Self::default();
        for (name, value) in properties {
            match name {
                STORAGE_VERSION_PROPERTY => config.storage_version = value.trim().parse()?,
                ALLOW_MULTIPLE_RELATIONS_PROPERTY => {
                    config.allow_multiple_relations_of_same_type =
                        value.trim().parse().map_err(|_| {
                            Error::configuration(format!(
                                "{ALLOW_MULTIPLE_RELATIONS_PROPERTY} must be true or false, got {value:?}"
                            ))
                        })?;
                }
                MAX_ENTITY_GROUPS_PROPERTY => {
                    config.max_entity_groups = value
                        .trim()
                        .parse()
                        .ok()
                        .filter(|max| *max > 0)
                        .ok_or_else(|| {
                            Error::configuration(format!(
                                "{MAX_ENTITY_GROUPS_PROPERTY} must be a positive integer, got {value:?}"
                            ))
                        })?;
                }
                _ => {}
            }
        }
        Ok(config)
    }
}
