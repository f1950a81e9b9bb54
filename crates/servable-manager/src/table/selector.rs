//! Version selection for lookups.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which loaded version of a name a lookup resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSelector {
    /// Greatest loaded version. Falls back to an older loaded version while
    /// a newer one is still loading or failed to load.
    #[default]
    Latest,
    /// Smallest loaded version.
    Earliest,
    /// Exactly this version, if loaded.
    Specific(u64),
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Earliest => f.write_str("earliest"),
            Self::Specific(v) => write!(f, "version {}", v),
        }
    }
}

impl From<u64> for VersionSelector {
    fn from(version: u64) -> Self {
        Self::Specific(version)
    }
}
