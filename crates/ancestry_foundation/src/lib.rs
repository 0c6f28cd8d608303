//! Keys, values, property maps, and errors for ancestry.
//!
//! This crate provides:
//! - [`Key`] - Ancestor-path keys that define entity groups
//! - [`Value`] - Property values stored on records
//! - [`Type`] - Type descriptors for field validation
//! - [`PropertyMap`] - Persistent property maps
//! - [`Error`] - Rich error types with context

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod collections;
pub mod error;
pub mod key;
pub mod types;
pub mod value;

pub use collections::PropertyMap;
pub use error::{Error, ErrorContext, ErrorKind, Result};
pub use key::{Key, KeyId, PathElement};
pub use types::Type;
pub use value::Value;
