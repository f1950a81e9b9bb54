//! Servable identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one version of one servable.
///
/// Ordered by name, then numerically by version, so iterating a sorted
/// collection of ids visits the versions of each name oldest-first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServableId {
    /// Servable name shared by all versions of a stream.
    pub name: String,
    /// Version number. Not required to be contiguous.
    pub version: u64,
}

impl ServableId {
    /// Create a new id.
    #[must_use]
    pub fn new(name: impl Into<String>, version: u64) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for ServableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Metadata handed to [`Loader::load_with_metadata`](crate::loader::Loader::load_with_metadata).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadMetadata {
    /// The id being loaded.
    pub servable_id: ServableId,
}

impl LoadMetadata {
    /// Metadata for loading `servable_id`.
    #[must_use]
    pub fn new(servable_id: ServableId) -> Self {
        Self { servable_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ServableId::new("mnist", 42).to_string(), "mnist:42");
    }

    #[test]
    fn test_ordering_is_name_then_numeric_version() {
        let mut ids = vec![
            ServableId::new("b", 1),
            ServableId::new("a", 10),
            ServableId::new("a", 9),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                ServableId::new("a", 9),
                ServableId::new("a", 10),
                ServableId::new("b", 1),
            ]
        );
    }

    #[test]
    fn test_metadata_equality_follows_id() {
        let a = LoadMetadata::new(ServableId::new("m", 1));
        let b = LoadMetadata::new(ServableId::new("m", 1));
        let c = LoadMetadata::new(ServableId::new("m", 2));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
