//! Qualified property names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A `(namespace, name)` pair identifying a property.
///
/// Two properties may share a name but differ by namespace. The empty
/// namespace is the public namespace. A qualified name whose `name` is empty
/// is a placeholder and never matches a lookup.
///
/// # Examples
///
/// ```
/// use core_types::QualifiedName;
///
/// let a = QualifiedName::public("x");
/// let b = QualifiedName::new("internal", "x");
///
/// assert_ne!(a, b);
/// assert!(a.same_name(&b));
/// assert_eq!(b.to_string(), "internal::x");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Namespace qualifier (empty for the public namespace)
    pub space: String,
    /// Property name
    pub name: String,
}

impl QualifiedName {
    /// Creates a qualified name.
    pub fn new(space: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            space: space.into(),
            name: name.into(),
        }
    }

    /// Creates a name in the public namespace.
    pub fn public(name: impl Into<String>) -> Self {
        Self::new(String::new(), name)
    }

    /// The placeholder name used for holes and unnamed slots.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true for placeholder names.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// Returns true if the name is in the public namespace.
    pub fn is_public(&self) -> bool {
        self.space.is_empty()
    }

    /// Compares the name portion only.
    pub fn same_name(&self, other: &QualifiedName) -> bool {
        self.name == other.name
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.space.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}::{}", self.space, self.name)
        }
    }
}

impl From<&str> for QualifiedName {
    fn from(name: &str) -> Self {
        QualifiedName::public(name)
    }
}
