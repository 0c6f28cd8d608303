//! Type descriptors for field validation.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Type descriptor for record fields.
///
/// `Option(T)` plays the role of a nullable wrapper around `T`: it accepts
/// `Null` and anything `T` accepts, and it is wrapper-equivalent to `T`.
#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Type {
    /// The null type.
    Null,
    /// Boolean type.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 64-bit floating point.
    Float,
    /// Text type.
    Text,
    /// Record reference.
    Key,
    /// Ordered list of record references.
    KeyList,
    /// Nullable wrapper.
    Option(Box<Type>),
    /// Accepts any value.
    Any,
}

impl Type {
    /// Creates a nullable wrapper type.
    #[must_use]
    pub fn option(inner: Type) -> Self {
        Self::Option(Box::new(inner))
    }

    /// Returns true if this type can hold `Null`.
    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        matches!(self, Self::Null | Self::Option(_) | Self::Any)
    }

    /// Returns the type with any nullable wrappers removed.
    #[must_use]
    pub fn erased(&self) -> &Type {
        match self {
            Self::Option(inner) => inner.erased(),
            other => other,
        }
    }

    /// Returns true if both types are the same once wrappers are removed.
    #[must_use]
    pub fn is_wrapper_equivalent(&self, other: &Type) -> bool {
        self.erased() == other.erased()
    }

    /// Checks if a value of `value_type` can be stored in a field of this type.
    ///
    /// - `Any` accepts all types
    /// - `Option(T)` accepts `Null` and any type that `T` accepts
    /// - `Float` accepts `Int`
    /// - everything else must match exactly
    #[must_use]
    pub fn accepts(&self, value_type: &Type) -> bool {
        if matches!(self, Self::Any) {
            return true;
        }

        if let Self::Option(inner) = self {
            return matches!(value_type, Self::Null) || inner.accepts(value_type);
        }

        matches!(
            (self, value_type),
            (Self::Null, Self::Null)
                | (Self::Bool, Self::Bool)
                | (Self::Int | Self::Float, Self::Int)
                | (Self::Float, Self::Float)
                | (Self::Text, Self::Text)
                | (Self::Key, Self::Key)
                | (Self::KeyList, Self::KeyList)
        )
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Text => write!(f, "text"),
            Self::Key => write!(f, "key"),
            Self::KeyList => write!(f, "key-list"),
            Self::Option(inner) => write!(f, "{inner}?"),
            Self::Any => write!(f, "any"),
        }
    }
}
