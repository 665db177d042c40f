//! Export registry: virtual path → real resource.
//!
//! The registry is the source of truth for "what should have a recipe". It is
//! written by administrative action and read by reconciliation and the chunk
//! resolver. Reads go straight to the backing map so every node sees the
//! replicated state.

use std::sync::Arc;

use chunkfed_core::DataExportEntry;
use tracing::info;

use crate::error::StoreError;
use crate::kvstore::ReplicatedMap;

/// Keyed collection of export entries, keyed by derived virtual path.
pub struct ExportRegistry {
    map: Arc<dyn ReplicatedMap>,
}

impl ExportRegistry {
    /// Create a registry over `map`.
    pub fn new(map: Arc<dyn ReplicatedMap>) -> Self {
        Self { map }
    }

    /// Add or replace an export. Returns its virtual path.
    pub fn add(&self, entry: DataExportEntry) -> Result<String, StoreError> {
        let key = entry.virtual_path();
        let raw = serde_json::to_vec(&entry).map_err(|source| StoreError::Codec {
            key: key.clone(),
            source,
        })?;
        self.map.put(&key, raw)?;
        info!(virtual_path = %key, resource = %entry.resource_path, "export added");
        Ok(key)
    }

    /// Remove the export at `virtual_path`.
    pub fn remove(&self, virtual_path: &str) -> Result<Option<DataExportEntry>, StoreError> {
        let removed = self
            .map
            .remove(virtual_path)?
            .map(|raw| decode(virtual_path, &raw))
            .transpose()?;
        if removed.is_some() {
            info!(virtual_path, "export removed");
        }
        Ok(removed)
    }

    /// Export entry for `virtual_path`.
    pub fn get(&self, virtual_path: &str) -> Result<Option<DataExportEntry>, StoreError> {
        self.map
            .get(virtual_path)?
            .map(|raw| decode(virtual_path, &raw))
            .transpose()
    }

    /// True if `virtual_path` is exported.
    pub fn contains(&self, virtual_path: &str) -> Result<bool, StoreError> {
        self.map.contains_key(virtual_path)
    }

    /// Snapshot of all entries. Keys removed concurrently are skipped.
    pub fn entries(&self) -> Result<Vec<DataExportEntry>, StoreError> {
        let mut entries = Vec::new();
        for key in self.map.keys()? {
            if let Some(entry) = self.get(&key)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Number of exports.
    pub fn len(&self) -> Result<usize, StoreError> {
        self.map.len()
    }

    /// True if nothing is exported.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        self.map.is_empty()
    }
}

fn decode(key: &str, raw: &[u8]) -> Result<DataExportEntry, StoreError> {
    serde_json::from_slice(raw).map_err(|source| StoreError::Codec {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvstore::MemoryMap;

    fn registry() -> ExportRegistry {
        ExportRegistry::new(Arc::new(MemoryMap::new()))
    }

    #[test]
    fn test_add_keys_by_virtual_path() {
        let reg = registry();
        let key = reg
            .add(DataExportEntry::new("/a", "file:///srv/b.txt"))
            .unwrap();
        assert_eq!(key, "/a/b.txt");
        assert!(reg.contains("/a/b.txt").unwrap());
        assert_eq!(
            reg.get("/a/b.txt").unwrap().unwrap().resource_path,
            "file:///srv/b.txt"
        );
    }

    #[test]
    fn test_remove() {
        let reg = registry();
        reg.add(DataExportEntry::new("/a", "file:///srv/b.txt")).unwrap();
        assert!(reg.remove("/a/b.txt").unwrap().is_some());
        assert!(reg.remove("/a/b.txt").unwrap().is_none());
        assert!(reg.is_empty().unwrap());
    }

    #[test]
    fn test_entries_snapshot() {
        let reg = registry();
        reg.add(DataExportEntry::new("/a", "file:///srv/1")).unwrap();
        reg.add(DataExportEntry::new("/b/", "file:///srv/2")).unwrap();
        let mut paths: Vec<String> = reg.entries().unwrap().iter().map(|e| e.virtual_path()).collect();
        paths.sort();
        assert_eq!(paths, vec!["/a/1", "/b/2"]);
        assert_eq!(reg.len().unwrap(), 2);
    }
}
