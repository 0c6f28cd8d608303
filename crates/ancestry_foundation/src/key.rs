//! Ancestor-path keys.
//!
//! A key is the full path from an entity-group root down to a record. Keys are
//! immutable once complete: a record never changes its parent.
//!
//! Keys order lexicographically by path, so every descendant of a key sorts
//! contiguously right after that key. Ancestor scans rely on this.

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifier of the last path element of a key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum KeyId {
    /// Not assigned yet; the datastore allocates an id on first write.
    Incomplete,
    /// Numeric id.
    Id(i64),
    /// Application-chosen name.
    Name(Arc<str>),
}

impl KeyId {
    /// Returns true if this id has been assigned.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        !matches!(self, Self::Incomplete)
    }
}

impl From<i64> for KeyId {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<i32> for KeyId {
    fn from(id: i32) -> Self {
        Self::Id(i64::from(id))
    }
}

impl From<&str> for KeyId {
    fn from(name: &str) -> Self {
        Self::Name(Arc::from(name))
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete => write!(f, "?"),
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => write!(f, "{name:?}"),
        }
    }
}

/// One `(kind, id)` step of a key path.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PathElement {
    /// Record kind at this step.
    pub kind: Arc<str>,
    /// Identifier at this step.
    pub id: KeyId,
}

/// Ancestor-path key of a record.
///
/// The first path element is the entity-group root. Cloning is O(1).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Key {
    path: Arc<[PathElement]>,
}

impl Key {
    /// Creates a root key.
    #[must_use]
    pub fn root(kind: &str, id: impl Into<KeyId>) -> Self {
        Self {
            path: Arc::from(vec![PathElement {
                kind: Arc::from(kind),
                id: id.into(),
            }]),
        }
    }

    /// Creates an incomplete root key of the given kind.
    #[must_use]
    pub fn incomplete(kind: &str) -> Self {
        Self::root(kind, KeyId::Incomplete)
    }

    /// Creates a key for a child of this key.
    #[must_use]
    pub fn child(&self, kind: &str, id: impl Into<KeyId>) -> Self {
        let mut path = self.path.to_vec();
        path.push(PathElement {
            kind: Arc::from(kind),
            id: id.into(),
        });
        Self {
            path: Arc::from(path),
        }
    }

    /// Creates an incomplete key for a child of this key.
    #[must_use]
    pub fn incomplete_child(&self, kind: &str) -> Self {
        self.child(kind, KeyId::Incomplete)
    }

    /// Returns the key with its last id replaced.
    #[must_use]
    pub fn with_id(&self, id: impl Into<KeyId>) -> Self {
        let mut path = self.path.to_vec();
        if let Some(last) = path.last_mut() {
            last.id = id.into();
        }
        Self {
            path: Arc::from(path),
        }
    }

    /// Returns the parent key, or `None` for a root key.
    #[must_use]
    pub fn parent(&self) -> Option<Key> {
        if self.path.len() <= 1 {
            return None;
        }
        Some(Self {
            path: Arc::from(&self.path[..self.path.len() - 1]),
        })
    }

    /// Returns the kind of the record this key names.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.last().map_or("", |element| &element.kind)
    }

    /// Returns the id of the record this key names.
    #[must_use]
    pub fn id(&self) -> &KeyId {
        self.last().map_or(&KeyId::Incomplete, |element| &element.id)
    }

    /// Returns true if every path element has an assigned id.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.path.iter().all(|element| element.id.is_complete())
    }

    /// Returns the number of path elements.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Returns the path elements from root to leaf.
    #[must_use]
    pub fn path(&self) -> &[PathElement] {
        &self.path
    }

    /// Returns true if `self` is a strict ancestor of `other`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Key) -> bool {
        other.path.len() > self.path.len() && other.path.starts_with(&self.path)
    }

    /// Returns true if `self` equals `other` or is an ancestor of it.
    #[must_use]
    pub fn contains(&self, other: &Key) -> bool {
        other.path.starts_with(&self.path)
    }

    /// Returns true if `self` is the direct parent of `other`.
    #[must_use]
    pub fn is_parent_of(&self, other: &Key) -> bool {
        other.path.len() == self.path.len() + 1 && other.path.starts_with(&self.path)
    }

    /// Returns the root key of this key's entity group.
    #[must_use]
    pub fn entity_group(&self) -> Key {
        Self {
            path: Arc::from(&self.path[..1.min(self.path.len())]),
        }
    }

    fn last(&self) -> Option<&PathElement> {
        self.path.last()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.path.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}({})", element.kind, element.id)?;
        }
        Ok(())
    }
}
