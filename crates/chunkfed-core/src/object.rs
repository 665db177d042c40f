//! Logical data objects and export entries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a logical object cluster-wide: `(cluster_name, path)`.
///
/// Equality is field-wise and case-sensitive. The root path has an empty
/// cluster name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataObjectPath {
    /// Owning cluster name
    pub cluster_name: String,
    /// Path within the owning cluster's namespace
    pub path: String,
}

impl DataObjectPath {
    /// Create a path owned by `cluster_name`.
    pub fn new(cluster_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            path: path.into(),
        }
    }

    /// The empty root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// True for the root path.
    pub fn is_root(&self) -> bool {
        self.cluster_name.is_empty()
    }
}

impl fmt::Display for DataObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.cluster_name, self.path)
    }
}

/// Probed attributes of an object. Carries no chunk information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObjectMetadata {
    /// Object identity
    pub path: DataObjectPath,
    /// Size in bytes
    pub object_size: u64,
    /// True if the object is a directory
    pub is_directory: bool,
    /// Last modification time, epoch milliseconds
    pub last_modification_time: i64,
}

impl DataObjectMetadata {
    /// Create metadata for a regular file.
    pub fn file(path: DataObjectPath, object_size: u64, last_modification_time: i64) -> Self {
        Self {
            path,
            object_size,
            is_directory: false,
            last_modification_time,
        }
    }

    /// Same attributes relabelled with a different path.
    pub fn with_path(self, path: DataObjectPath) -> Self {
        Self { path, ..self }
    }

    /// True if size and modification time match. Paths are not compared.
    pub fn same_version(&self, other: &DataObjectMetadata) -> bool {
        self.object_size == other.object_size
            && self.last_modification_time == other.last_modification_time
    }
}

/// Administrative mapping that makes a real resource visible to the federation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataExportEntry {
    /// Virtual directory the resource is exported under
    pub mapping_path: String,
    /// URI of the real resource, e.g. `file:///data/a.txt`
    pub resource_path: String,
}

impl DataExportEntry {
    /// Create an export entry.
    pub fn new(mapping_path: impl Into<String>, resource_path: impl Into<String>) -> Self {
        Self {
            mapping_path: mapping_path.into(),
            resource_path: resource_path.into(),
        }
    }

    /// Last path segment of the resource URI.
    pub fn resource_basename(&self) -> &str {
        let trimmed = self.resource_path.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    /// `mapping_path` joined with the resource basename. This is the key that
    /// correlates an export with its recipe's `metadata.path.path`.
    pub fn virtual_path(&self) -> String {
        let base = self.resource_basename();
        if self.mapping_path.ends_with('/') {
            format!("{}{}", self.mapping_path, base)
        } else {
            format!("{}/{}", self.mapping_path, base)
        }
    }

    /// The object path this export produces inside `cluster_name`.
    pub fn object_path(&self, cluster_name: &str) -> DataObjectPath {
        DataObjectPath::new(cluster_name, self.virtual_path())
    }
}

/// Scheme of a resource URI. Bare paths are treated as `file`.
pub fn uri_scheme(uri: &str) -> &str {
    match uri.split_once("://") {
        Some((scheme, _)) => scheme,
        None => "file",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_equality_is_case_sensitive() {
        let a = DataObjectPath::new("east", "/a/b.txt");
        assert_eq!(a, DataObjectPath::new("east", "/a/b.txt"));
        assert_ne!(a, DataObjectPath::new("East", "/a/b.txt"));
        assert_ne!(a, DataObjectPath::new("east", "/a/B.txt"));
    }

    #[test]
    fn root_has_empty_cluster() {
        let root = DataObjectPath::root();
        assert!(root.is_root());
        assert!(!DataObjectPath::new("c", "").is_root());
    }

    #[test]
    fn virtual_path_joins_basename() {
        let e = DataExportEntry::new("/a", "file:///srv/data/b.txt");
        assert_eq!(e.virtual_path(), "/a/b.txt");
        let e = DataExportEntry::new("/a/", "file:///srv/data/b.txt");
        assert_eq!(e.virtual_path(), "/a/b.txt");
        assert_eq!(e.object_path("west"), DataObjectPath::new("west", "/a/b.txt"));
    }

    #[test]
    fn basename_ignores_trailing_slash() {
        let e = DataExportEntry::new("/x", "file:///srv/dir/");
        assert_eq!(e.resource_basename(), "dir");
    }

    #[test]
    fn same_version_ignores_path() {
        let a = DataObjectMetadata::file(DataObjectPath::new("c", "/a"), 10, 5);
        let b = a.clone().with_path(DataObjectPath::new("c", "/b"));
        assert!(a.same_version(&b));
        let c = DataObjectMetadata::file(DataObjectPath::new("c", "/a"), 11, 5);
        assert!(!a.same_version(&c));
    }

    #[test]
    fn scheme_detection() {
        assert_eq!(uri_scheme("file:///tmp/x"), "file");
        assert_eq!(uri_scheme("s3://bucket/key"), "s3");
        assert_eq!(uri_scheme("/tmp/x"), "file");
    }
}
