//! Report manifests and their schema versioning.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// `major.minor.patch` version of the report column layout.
///
/// A reader understands any manifest with the same major version and a minor version
/// no newer than its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Bumped when columns are renamed or removed.
    pub major: u32,
    /// Bumped when columns are added.
    pub minor: u32,
    /// Bumped for fixes that leave the layout untouched.
    pub patch: u32,
}

impl SchemaVersion {
    /// Version from its three components.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Whether a reader at `self` can consume data written at `written`.
    pub fn can_read(&self, written: &SchemaVersion) -> bool {
        self.major == written.major && written.minor <= self.minor
    }
}

impl Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Manifest written beside every combined report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProvenance {
    /// Report layout version.
    pub schema_version: SchemaVersion,
    /// Experiment the report belongs to.
    pub experiment: String,
    /// Grid hash of the run that aggregated; empty for standalone aggregation.
    #[serde(default)]
    pub grid_hash: String,
    /// Metric rows in the report.
    pub records: usize,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// Crate name to version for every component that touched the report.
    #[serde(default)]
    pub tool_versions: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_accept_older_minor_only() {
        let reader = SchemaVersion::new(1, 2, 0);
        assert!(reader.can_read(&SchemaVersion::new(1, 0, 5)));
        assert!(reader.can_read(&SchemaVersion::new(1, 2, 9)));
        assert!(!reader.can_read(&SchemaVersion::new(1, 3, 0)));
        assert!(!reader.can_read(&SchemaVersion::new(2, 0, 0)));
        assert_eq!(reader.to_string(), "1.2.0");
    }
}
