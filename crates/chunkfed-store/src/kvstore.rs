//! Replicated key-value map interface backing the recipe store and export registry.
//!
//! The real backend is an externally supplied replicated/distributed map. Every
//! call is treated as an atomic single-key operation; nothing here assumes
//! multi-key transactions. [`MemoryMap`] is the in-process implementation used
//! by single-node deployments and tests.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::StoreError;

/// Value type stored in the map.
pub type Value = Vec<u8>;

/// Single-key replicated map operations.
pub trait ReplicatedMap: Send + Sync {
    /// Get a value by key. Returns None if the key doesn't exist.
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Put a key-value pair, replacing any existing value atomically.
    fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove a key. Returns the previous value, if any.
    fn remove(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Returns true if the key exists.
    fn contains_key(&self, key: &str) -> Result<bool, StoreError>;

    /// Snapshot of all keys, sorted.
    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Number of entries.
    fn len(&self) -> Result<usize, StoreError>;

    /// True if the map holds no entries.
    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// In-memory map backed by a BTreeMap. Thread-safe via RwLock.
///
/// Does not persist data across restarts.
#[derive(Debug, Default)]
pub struct MemoryMap {
    data: RwLock<BTreeMap<String, Value>>,
}

impl MemoryMap {
    /// Creates a new empty map.
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Kv { msg: e.to_string() }
}

impl ReplicatedMap for MemoryMap {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(poisoned)?;
        data.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut data = self.data.write().map_err(poisoned)?;
        Ok(data.remove(key))
    }

    fn contains_key(&self, key: &str) -> Result<bool, StoreError> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.contains_key(key))
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.keys().cloned().collect())
    }

    fn len(&self) -> Result<usize, StoreError> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.len())
    }
}
