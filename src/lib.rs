//! Ancestry - Foreign-key collections over an ancestor-keyed datastore
//!
//! This crate re-exports all layers of the Ancestry system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 2: ancestry_collections  Sessions, list and set stores, migration
//! Layer 1: ancestry_storage      Records, queries, datastore, class metadata
//! Layer 0: ancestry_foundation   Core types (Key, Value, Error)
//! ```

pub use ancestry_collections as collections;
pub use ancestry_foundation as foundation;
pub use ancestry_storage as storage;
