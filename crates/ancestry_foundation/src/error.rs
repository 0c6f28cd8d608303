//! Error types for ancestry.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.

use std::fmt;

use thiserror::Error;

use crate::key::Key;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for ancestry operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    ///
    /// Context is attached once. An error that already carries context keeps
    /// it, so the innermost operation is reported.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        if self.context.is_none() {
            self.context = Some(context);
        }
        self
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }

    /// Creates an ownership violation error.
    #[must_use]
    pub fn ownership(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OwnershipViolation(message.into()))
    }

    /// Creates a key not found error.
    #[must_use]
    pub fn key_not_found(key: Key) -> Self {
        Self::new(ErrorKind::KeyNotFound(key))
    }

    /// Creates an index out of bounds error.
    #[must_use]
    pub fn index_out_of_bounds(index: usize, length: usize) -> Self {
        Self::new(ErrorKind::IndexOutOfBounds { index, length })
    }

    /// Creates a concurrent modification error for an entity group.
    #[must_use]
    pub fn concurrent_modification(group: Key) -> Self {
        Self::new(ErrorKind::ConcurrentModification { group })
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration(message.into()))
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument(message.into()))
    }

    /// Creates an unsupported operation error.
    #[must_use]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported(message.into()))
    }

    /// Creates a datastore error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Store(message.into()))
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }

    /// Returns true for a missing key or an out-of-range index.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::KeyNotFound(_) | ErrorKind::IndexOutOfBounds { .. }
        )
    }

    /// Returns true if an optimistic concurrency check failed.
    #[must_use]
    pub const fn is_concurrent_modification(&self) -> bool {
        matches!(self.kind, ErrorKind::ConcurrentModification { .. })
    }

    /// Returns true for ownership violations.
    #[must_use]
    pub const fn is_ownership_violation(&self) -> bool {
        matches!(self.kind, ErrorKind::OwnershipViolation(_))
    }

    /// Returns true for type mismatches.
    #[must_use]
    pub const fn is_type_mismatch(&self) -> bool {
        matches!(self.kind, ErrorKind::TypeMismatch { .. })
    }

    /// Returns true for configuration errors.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self.kind, ErrorKind::Configuration(_))
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A value or element does not match its declared type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The declared type.
        expected: String,
        /// The type encountered.
        actual: String,
    },

    /// An owned element would change parents, or a managed back-reference
    /// disagrees with the owner.
    #[error("ownership violation: {0}")]
    OwnershipViolation(String),

    /// No record exists for the key.
    #[error("key not found: {0}")]
    KeyNotFound(Key),

    /// Index out of bounds.
    #[error("index out of bounds: {index} (length {length})")]
    IndexOutOfBounds {
        /// The index that was accessed.
        index: usize,
        /// The actual length of the collection.
        length: usize,
    },

    /// Another writer committed to the same entity group first.
    #[error("concurrent modification of entity group {group}")]
    ConcurrentModification {
        /// Root key of the contended entity group.
        group: Key,
    },

    /// Metadata or configuration is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not supported for this relation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The datastore rejected or failed an operation.
    #[error("datastore error: {0}")]
    Store(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Operation being performed (for example `list.remove_at`).
    pub operation: Option<String>,
    /// Key of the collection owner, if known.
    pub owner: Option<Key>,
    /// Collection field name.
    pub field: Option<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Sets the owner key.
    #[must_use]
    pub fn with_owner(mut self, owner: Option<Key>) -> Self {
        self.owner = owner;
        self
    }

    /// Sets the collection field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(operation) = &self.operation {
            write!(f, "in {operation}")?;
        }
        if let Some(field) = &self.field {
            write!(f, " on field {field}")?;
        }
        if let Some(owner) = &self.owner {
            write!(f, " of {owner}")?;
        }
        Ok(())
    }
}
