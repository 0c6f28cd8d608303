//! Integration tests for Layer 1: Storage
//!
//! Tests for the in-memory datastore, queries, transactions, and class
//! metadata.

mod datastore;
mod queries;
mod schema;
