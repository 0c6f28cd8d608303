//! Foreign-key collection stores for ancestry.
//!
//! This crate provides:
//! - [`Session`] - Managed objects, deferred child writes, and transactions
//! - [`StoreManager`] - Validated relation stores for every collection field
//! - [`FkListStore`] and [`FkSetStore`] - Ordered and unordered collections
//! - [`Migrator`] - Upgrades owners to parent-held child key lists
//!
//! Membership is kept either as a key list on the owner record or by keying
//! owned children under their owner and finding them by ancestor query. The
//! storage version decides which is written and which is read.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod fk_store;
pub mod lifecycle;
pub mod list;
pub mod manager;
pub mod migrate;
pub mod ordering;
pub mod planner;
pub mod session;
pub mod set;
pub mod validate;

pub use fk_store::FkStore;
pub use lifecycle::{RemovalPolicy, delete_object, removal_policy};
pub use list::FkListStore;
pub use manager::{RelationStore, StoreManager};
pub use migrate::Migrator;
pub use ordering::OrderIndex;
pub use planner::ChildPlan;
pub use session::{ObjectId, ObjectState, PendingChildWrite, Reference, Session};
pub use set::FkSetStore;
