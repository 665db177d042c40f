//! Per-cluster recipe store.
//!
//! Recipes are persisted as JSON in a [`ReplicatedMap`] keyed by virtual path.
//! Readers are served from an in-process view of `Arc<Recipe>` handles, so
//! replacing a recipe is a single pointer swap: a reader holding the old
//! handle keeps a complete, immutable snapshot and never sees a half-updated
//! chunk list. A secondary hash → paths index makes chunk lookup O(1); it is
//! only a hint and every hit is verified against the recipe snapshot.
//!
//! The view trails the map whenever another node writes. [`RecipeStore::reload`]
//! resynchronizes all keys, [`RecipeStore::current`] a single one.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chunkfed_core::{ContentHash, Recipe, RecipeChunk};
use dashmap::DashMap;
use tracing::debug;

use crate::error::StoreError;
use crate::kvstore::ReplicatedMap;

/// Keyed collection mapping an object path to its current recipe.
pub struct RecipeStore {
    map: Arc<dyn ReplicatedMap>,
    view: DashMap<String, Arc<Recipe>>,
    by_hash: DashMap<ContentHash, BTreeSet<String>>,
}

impl RecipeStore {
    /// Open a store over `map`, loading any recipes already present.
    pub fn open(map: Arc<dyn ReplicatedMap>) -> Result<Self, StoreError> {
        let store = Self {
            map,
            view: DashMap::new(),
            by_hash: DashMap::new(),
        };
        store.reload()?;
        Ok(store)
    }

    /// Rebuild the local view and hash index from the backing map.
    ///
    /// Followers call this to pick up recipes written by the leader.
    pub fn reload(&self) -> Result<usize, StoreError> {
        let keys = self.map.keys()?;
        let mut live = HashSet::with_capacity(keys.len());
        for key in keys {
            let Some(raw) = self.map.get(&key)? else {
                continue;
            };
            let recipe = decode(&key, &raw)?;
            let unchanged = self
                .view
                .get(&key)
                .map(|current| **current == recipe)
                .unwrap_or(false);
            if !unchanged {
                self.install(key.clone(), Arc::new(recipe));
            }
            live.insert(key);
        }
        let gone: Vec<String> = self
            .view
            .iter()
            .filter(|e| !live.contains(e.key()))
            .map(|e| e.key().clone())
            .collect();
        for key in gone {
            if let Some((_, old)) = self.view.remove(&key) {
                self.unindex(&key, &old, None);
            }
        }
        debug!(recipes = self.view.len(), "recipe store reloaded");
        Ok(self.view.len())
    }

    /// Read `path` straight from the backing map and bring the local view of
    /// that key up to date.
    ///
    /// Unlike [`get`](Self::get), this sees writes made by other nodes since
    /// the last [`reload`](Self::reload). An unchanged recipe keeps its
    /// existing handle.
    pub fn current(&self, path: &str) -> Result<Option<Arc<Recipe>>, StoreError> {
        let Some(raw) = self.map.get(path)? else {
            if let Some((_, old)) = self.view.remove(path) {
                self.unindex(path, &old, None);
            }
            return Ok(None);
        };
        let recipe = decode(path, &raw)?;
        if let Some(cached) = self.get(path) {
            if *cached == recipe {
                return Ok(Some(cached));
            }
        }
        let recipe = Arc::new(recipe);
        self.install(path.to_string(), Arc::clone(&recipe));
        Ok(Some(recipe))
    }

    /// Recipe for `path` in the local view.
    pub fn get(&self, path: &str) -> Option<Arc<Recipe>> {
        self.view.get(path).map(|r| Arc::clone(&r))
    }

    /// True if a recipe exists for `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.view.contains_key(path)
    }

    /// Insert or fully replace the recipe for its path. Returns the replaced recipe.
    pub fn put(&self, recipe: Recipe) -> Result<Option<Arc<Recipe>>, StoreError> {
        let key = recipe.path().path.clone();
        let raw = serde_json::to_vec(&recipe).map_err(|source| StoreError::Codec {
            key: key.clone(),
            source,
        })?;
        self.map.put(&key, raw)?;
        Ok(self.install(key, Arc::new(recipe)))
    }

    /// Remove the recipe for `path`. Returns it if it existed.
    pub fn remove(&self, path: &str) -> Result<Option<Arc<Recipe>>, StoreError> {
        self.map.remove(path)?;
        let removed = self.view.remove(path).map(|(_, r)| r);
        if let Some(old) = &removed {
            self.unindex(path, old, None);
        }
        Ok(removed)
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.view.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Number of recipes.
    pub fn len(&self) -> usize {
        self.view.len()
    }

    /// True if no recipes are stored.
    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    /// Every recipe currently containing a chunk with `hash`, with that chunk.
    pub fn find_all_by_hash(&self, hash: &ContentHash) -> Vec<(Arc<Recipe>, RecipeChunk)> {
        let candidates: Vec<String> = match self.by_hash.get(hash) {
            Some(paths) => paths.iter().cloned().collect(),
            None => return Vec::new(),
        };
        candidates
            .iter()
            .filter_map(|path| self.get(path))
            .filter_map(|recipe| {
                let chunk = recipe.find_chunk(hash).copied()?;
                Some((recipe, chunk))
            })
            .collect()
    }

    /// First recipe containing a chunk with `hash`.
    pub fn find_by_hash(&self, hash: &ContentHash) -> Option<(Arc<Recipe>, RecipeChunk)> {
        self.find_all_by_hash(hash).into_iter().next()
    }

    fn install(&self, key: String, recipe: Arc<Recipe>) -> Option<Arc<Recipe>> {
        for hash in recipe.hashes() {
            self.by_hash.entry(*hash).or_default().insert(key.clone());
        }
        let previous = self.view.insert(key.clone(), Arc::clone(&recipe));
        if let Some(old) = &previous {
            self.unindex(&key, old, Some(&recipe));
        }
        previous
    }

    fn unindex(&self, key: &str, old: &Recipe, replacement: Option<&Recipe>) {
        let keep: HashSet<&ContentHash> = replacement
            .map(|r| r.hashes().collect())
            .unwrap_or_default();
        for hash in old.hashes() {
            if keep.contains(hash) {
                continue;
            }
            let now_empty = match self.by_hash.get_mut(hash) {
                Some(mut paths) => {
                    paths.remove(key);
                    paths.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.by_hash.remove_if(hash, |_, paths| paths.is_empty());
            }
        }
    }
}

fn decode(key: &str, raw: &[u8]) -> Result<Recipe, StoreError> {
    serde_json::from_slice(raw).map_err(|source| StoreError::Codec {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvstore::MemoryMap;
    use chunkfed_core::{DataObjectMetadata, DataObjectPath, HashAlgorithm, RecipeChunk};

    fn recipe(path: &str, contents: &[&[u8]], mtime: i64) -> Recipe {
        let mut chunks = Vec::new();
        let mut offset = 0u64;
        for c in contents {
            chunks.push(RecipeChunk::new(offset, c.len() as u32, HashAlgorithm::Blake3.digest(c)));
            offset += c.len() as u64;
        }
        let meta = DataObjectMetadata::file(DataObjectPath::new("east", path), offset, mtime);
        Recipe::new(meta, HashAlgorithm::Blake3, 4, chunks).unwrap()
    }

    fn store() -> (Arc<MemoryMap>, RecipeStore) {
        let map = Arc::new(MemoryMap::new());
        let store = RecipeStore::open(map.clone()).unwrap();
        (map, store)
    }

    #[test]
    fn test_put_get_remove() {
        let (map, store) = store();
        let r = recipe("/a/b.txt", &[b"abcd", b"ef"], 1);
        assert!(store.put(r.clone()).unwrap().is_none());
        assert!(map.contains_key("/a/b.txt").unwrap());
        assert_eq!(*store.get("/a/b.txt").unwrap(), r);
        assert_eq!(store.paths(), vec!["/a/b.txt".to_string()]);
        assert!(store.remove("/a/b.txt").unwrap().is_some());
        assert!(!store.contains("/a/b.txt"));
        assert!(map.is_empty().unwrap());
    }

    #[test]
    fn test_find_by_hash() {
        let (_, store) = store();
        store.put(recipe("/x", &[b"abcd", b"ef"], 1)).unwrap();
        let hash = HashAlgorithm::Blake3.digest(b"ef");
        let (r, chunk) = store.find_by_hash(&hash).unwrap();
        assert_eq!(r.path().path, "/x");
        assert_eq!(chunk.offset, 4);
        assert_eq!(chunk.length, 2);
        assert!(store.find_by_hash(&HashAlgorithm::Blake3.digest(b"zz")).is_none());
    }

    #[test]
    fn test_replace_drops_stale_hashes() {
        let (_, store) = store();
        store.put(recipe("/x", &[b"abcd", b"ef"], 1)).unwrap();
        let old = store.get("/x").unwrap();
        let prev = store.put(recipe("/x", &[b"abcd", b"eg"], 2)).unwrap().unwrap();
        assert_eq!(prev, old);
        // The old handle is still a complete snapshot.
        assert_eq!(old.chunks()[1].hash, HashAlgorithm::Blake3.digest(b"ef"));
        assert!(store.find_by_hash(&HashAlgorithm::Blake3.digest(b"ef")).is_none());
        assert!(store.find_by_hash(&HashAlgorithm::Blake3.digest(b"abcd")).is_some());
        assert!(store.find_by_hash(&HashAlgorithm::Blake3.digest(b"eg")).is_some());
    }

    #[test]
    fn test_shared_chunk_across_objects() {
        let (_, store) = store();
        store.put(recipe("/a", &[b"same"], 1)).unwrap();
        store.put(recipe("/b", &[b"same"], 1)).unwrap();
        let hash = HashAlgorithm::Blake3.digest(b"same");
        assert_eq!(store.find_all_by_hash(&hash).len(), 2);
        store.remove("/a").unwrap();
        let hits = store.find_all_by_hash(&hash);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.path().path, "/b");
    }

    #[test]
    fn test_reload_picks_up_external_writes() {
        let (map, store) = store();
        let writer = RecipeStore::open(map.clone()).unwrap();
        writer.put(recipe("/new", &[b"data"], 1)).unwrap();
        assert!(!store.contains("/new"));
        assert_eq!(store.reload().unwrap(), 1);
        assert!(store.find_by_hash(&HashAlgorithm::Blake3.digest(b"data")).is_some());
        writer.remove("/new").unwrap();
        assert_eq!(store.reload().unwrap(), 0);
        assert!(store.find_by_hash(&HashAlgorithm::Blake3.digest(b"data")).is_none());
    }

    #[test]
    fn test_current_sees_writes_from_another_store() {
        let (map, reader) = store();
        let writer = RecipeStore::open(map.clone()).unwrap();

        writer.put(recipe("/a/b.txt", &[b"abcd"], 1)).unwrap();
        assert!(reader.get("/a/b.txt").is_none());
        let seen = reader.current("/a/b.txt").unwrap().unwrap();
        assert_eq!(seen.chunks()[0].hash, HashAlgorithm::Blake3.digest(b"abcd"));
        assert!(reader.find_by_hash(&HashAlgorithm::Blake3.digest(b"abcd")).is_some());
        // Unchanged recipe keeps its handle.
        assert!(Arc::ptr_eq(&seen, &reader.current("/a/b.txt").unwrap().unwrap()));

        writer.put(recipe("/a/b.txt", &[b"wxyz"], 2)).unwrap();
        let replaced = reader.current("/a/b.txt").unwrap().unwrap();
        assert_eq!(replaced.chunks()[0].hash, HashAlgorithm::Blake3.digest(b"wxyz"));
        assert!(reader.find_by_hash(&HashAlgorithm::Blake3.digest(b"abcd")).is_none());

        writer.remove("/a/b.txt").unwrap();
        assert!(reader.current("/a/b.txt").unwrap().is_none());
        assert!(!reader.contains("/a/b.txt"));
        assert!(reader.find_by_hash(&HashAlgorithm::Blake3.digest(b"wxyz")).is_none());
    }

    #[test]
    fn test_reload_rejects_corrupt_entry() {
        let map = Arc::new(MemoryMap::new());
        map.put("/bad", b"not json".to_vec()).unwrap();
        assert!(matches!(
            RecipeStore::open(map),
            Err(StoreError::Codec { ref key, .. }) if key == "/bad"
        ));
    }
}
