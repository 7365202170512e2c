//! Namespace-qualified keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Delimiter placed between the namespace root and the raw key.
pub const KEY_DELIMITER: &str = ":";

/// A key prefix shared by every rate limiter of one provider.
///
/// An empty root leaves keys unqualified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    root: String,
}

impl Namespace {
    /// Create a namespace with the given root.
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    /// The namespace root.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Qualify a raw key with this namespace.
    pub fn key(&self, raw: &str) -> Key {
        let qualified = if self.root.is_empty() {
            raw.to_string()
        } else {
            format!("{}{}{}", self.root, KEY_DELIMITER, raw)
        };

        Key {
            display: raw.to_string(),
            qualified,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

/// A rate limiter key in both its display and fully-qualified forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    display: String,
    qualified: String,
}

impl Key {
    /// The key as the caller passed it.
    pub fn display(&self) -> &str {
        &self.display
    }

    /// The key as the counter adapter sees it.
    pub fn qualified(&self) -> &str {
        &self.qualified
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified)
    }
}
