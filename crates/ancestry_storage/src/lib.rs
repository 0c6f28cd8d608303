//! Datastore client, in-memory datastore, and relationship metadata for ancestry.
//!
//! This crate provides:
//! - [`Record`] and [`Query`] - The datastore's data and query model
//! - [`Datastore`] - The raw store client trait
//! - [`MemoryDatastore`] - Shared in-memory datastore with optimistic transactions
//! - [`ClassRegistry`] and [`RelationSchema`] - Class and relationship metadata
//! - [`StoreConfig`] - Storage version and validation settings

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod datastore;
pub mod memory;
pub mod query;
pub mod record;
pub mod schema;

pub use config::StoreConfig;
pub use datastore::Datastore;
pub use memory::{DatastoreStats, MemoryDatastore, StatsSnapshot};
pub use query::{Filter, FilterOp, KEY_PROPERTY, Query, Sort, SortDirection};
pub use record::Record;
pub use schema::{
    ClassMeta, ClassRegistry, CollectionKind, DISCRIMINATOR_PROPERTY, FieldKind, FieldOrder,
    FieldSchema, OrderMapping, RelationSchema, StorageVersion,
};
