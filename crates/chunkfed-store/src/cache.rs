//! Hash-addressed chunk cache.
//!
//! Holds payloads of chunks fetched from remote clusters. Content is a pure
//! function of the hash, so overwriting an entry is harmless. Eviction never
//! disturbs a read already in progress: the memory driver hands out
//! reference-counted `Bytes`, the disk driver hands out an open file handle.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chunkfed_core::{ChunkStream, ContentHash};
use lru::LruCache;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StoreError;

/// Narrow cache contract consumed by the chunk resolver.
#[async_trait]
pub trait ChunkCache: Send + Sync {
    /// True if a payload for `hash` is cached.
    async fn has(&self, hash: &ContentHash) -> bool;

    /// Open the cached payload. `Ok(None)` is a miss.
    async fn read(&self, hash: &ContentHash) -> Result<Option<ChunkStream>, StoreError>;

    /// Store the complete payload for `hash`.
    async fn write(&self, hash: &ContentHash, data: Bytes) -> Result<(), StoreError>;

    /// Drop one entry. Returns true if it existed.
    async fn evict(&self, hash: &ContentHash) -> Result<bool, StoreError>;

    /// Drop every entry.
    async fn evict_all(&self) -> Result<(), StoreError>;

    /// Counters snapshot.
    fn stats(&self) -> CacheStats;
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads that found an entry.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Payloads written.
    pub insertions: u64,
    /// Entries removed for capacity or by request.
    pub evictions: u64,
    /// Entries currently held.
    pub entries: u64,
    /// Bytes currently held.
    pub bytes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
    entries: AtomicU64,
    bytes: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn set_size(&self, entries: usize, bytes: u64) {
        self.entries.store(entries as u64, Ordering::Relaxed);
        self.bytes.store(bytes, Ordering::Relaxed);
    }
}

struct Tracked<V> {
    lru: LruCache<ContentHash, V>,
    bytes: u64,
}

/// In-memory LRU chunk cache bounded by entry count and total bytes.
pub struct MemoryChunkCache {
    max_entries: usize,
    max_bytes: u64,
    inner: Mutex<Tracked<Bytes>>,
    counters: Counters,
}

impl MemoryChunkCache {
    /// Create a cache holding at most `max_entries` payloads and `max_bytes` bytes.
    pub fn new(max_entries: usize, max_bytes: u64) -> Self {
        Self {
            max_entries: max_entries.max(1),
            max_bytes,
            inner: Mutex::new(Tracked {
                lru: LruCache::unbounded(),
                bytes: 0,
            }),
            counters: Counters::default(),
        }
    }
}

#[async_trait]
impl ChunkCache for MemoryChunkCache {
    async fn has(&self, hash: &ContentHash) -> bool {
        self.inner.lock().await.lru.contains(hash)
    }

    async fn read(&self, hash: &ContentHash) -> Result<Option<ChunkStream>, StoreError> {
        let data = self.inner.lock().await.lru.get(hash).cloned();
        self.counters.record(data.is_some());
        Ok(data.map(|bytes| Box::pin(Cursor::new(bytes)) as ChunkStream))
    }

    async fn write(&self, hash: &ContentHash, data: Bytes) -> Result<(), StoreError> {
        let size = data.len() as u64;
        if size > self.max_bytes {
            debug!(%hash, size, max = self.max_bytes, "chunk larger than cache, not cached");
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        if let Some(old) = inner.lru.pop(hash) {
            inner.bytes -= old.len() as u64;
        }
        while (inner.bytes + size > self.max_bytes || inner.lru.len() >= self.max_entries)
            && !inner.lru.is_empty()
        {
            if let Some((_, evicted)) = inner.lru.pop_lru() {
                inner.bytes -= evicted.len() as u64;
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        inner.lru.put(*hash, data);
        inner.bytes += size;
        self.counters.insertions.fetch_add(1, Ordering::Relaxed);
        self.counters.set_size(inner.lru.len(), inner.bytes);
        Ok(())
    }

    async fn evict(&self, hash: &ContentHash) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let existed = match inner.lru.pop(hash) {
            Some(old) => {
                inner.bytes -= old.len() as u64;
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        };
        self.counters.set_size(inner.lru.len(), inner.bytes);
        Ok(existed)
    }

    async fn evict_all(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        self.counters
            .evictions
            .fetch_add(inner.lru.len() as u64, Ordering::Relaxed);
        inner.lru.clear();
        inner.bytes = 0;
        self.counters.set_size(0, 0);
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }
}

/// On-disk chunk cache: one file per hash under a two-character fan-out.
///
/// Payloads are written to a temporary file and renamed into place, so a
/// partially written chunk is never visible under its hash.
pub struct DiskChunkCache {
    dir: PathBuf,
    max_bytes: u64,
    index: Mutex<Tracked<u64>>,
    counters: Counters,
    tmp_seq: AtomicU64,
}

impl DiskChunkCache {
    /// Open (or create) a cache rooted at `dir`, indexing existing entries.
    /// Leftover temporary files are removed.
    pub async fn open(dir: impl Into<PathBuf>, max_bytes: u64) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let mut tracked = Tracked {
            lru: LruCache::unbounded(),
            bytes: 0,
        };
        let mut fans = tokio::fs::read_dir(&dir).await?;
        while let Some(fan) = fans.next_entry().await? {
            if !fan.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(fan.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let name = file.file_name();
                let name = name.to_string_lossy();
                match name.parse::<ContentHash>() {
                    Ok(hash) => {
                        let size = file.metadata().await?.len();
                        tracked.lru.put(hash, size);
                        tracked.bytes += size;
                    }
                    Err(_) if name.ends_with(".tmp") => {
                        let _ = tokio::fs::remove_file(file.path()).await;
                    }
                    Err(_) => warn!(file = %file.path().display(), "ignoring foreign file in chunk cache"),
                }
            }
        }
        debug!(dir = %dir.display(), entries = tracked.lru.len(), bytes = tracked.bytes, "disk chunk cache opened");
        let counters = Counters::default();
        counters.set_size(tracked.lru.len(), tracked.bytes);
        Ok(Self {
            dir,
            max_bytes,
            index: Mutex::new(tracked),
            counters,
            tmp_seq: AtomicU64::new(0),
        })
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.to_hex();
        self.dir.join(&hex[..2]).join(hex)
    }

    /// Drop an index entry whose file has disappeared.
    async fn forget(&self, hash: &ContentHash) {
        let mut index = self.index.lock().await;
        if let Some(size) = index.lru.pop(hash) {
            index.bytes -= size;
            self.counters.set_size(index.lru.len(), index.bytes);
        }
    }

    async fn remove_files(&self, hashes: Vec<ContentHash>) -> Result<(), StoreError> {
        for hash in hashes {
            match tokio::fs::remove_file(self.path_for(&hash)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkCache for DiskChunkCache {
    async fn has(&self, hash: &ContentHash) -> bool {
        if !self.index.lock().await.lru.contains(hash) {
            return false;
        }
        match tokio::fs::try_exists(self.path_for(hash)).await {
            Ok(true) => true,
            Ok(false) => {
                self.forget(hash).await;
                false
            }
            Err(e) => {
                warn!(%hash, error = %e, "cannot stat cached chunk");
                false
            }
        }
    }

    async fn read(&self, hash: &ContentHash) -> Result<Option<ChunkStream>, StoreError> {
        // The index decides membership, as in `has`.
        if !self.index.lock().await.lru.contains(hash) {
            self.counters.record(false);
            return Ok(None);
        }
        match tokio::fs::File::open(self.path_for(hash)).await {
            Ok(file) => {
                self.index.lock().await.lru.promote(hash);
                self.counters.record(true);
                Ok(Some(Box::pin(file)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.forget(hash).await;
                self.counters.record(false);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, hash: &ContentHash, data: Bytes) -> Result<(), StoreError> {
        let size = data.len() as u64;
        if size > self.max_bytes {
            debug!(%hash, size, max = self.max_bytes, "chunk larger than cache, not cached");
            return Ok(());
        }
        let target = self.path_for(hash);
        let fan = target.parent().unwrap_or(&self.dir).to_path_buf();
        tokio::fs::create_dir_all(&fan).await?;
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = fan.join(format!("{}.{}.{}.tmp", hash.to_hex(), std::process::id(), seq));
        let mut file = tokio::fs::File::create(&tmp).await?;
        let written = async {
            file.write_all(&data).await?;
            file.sync_data().await?;
            tokio::fs::rename(&tmp, &target).await
        }
        .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        let evicted = {
            let mut index = self.index.lock().await;
            if let Some(old) = index.lru.pop(hash) {
                index.bytes -= old;
            }
            let mut evicted = Vec::new();
            while index.bytes + size > self.max_bytes {
                match index.lru.pop_lru() {
                    Some((old_hash, old_size)) => {
                        index.bytes -= old_size;
                        evicted.push(old_hash);
                    }
                    None => break,
                }
            }
            index.lru.put(*hash, size);
            index.bytes += size;
            self.counters.set_size(index.lru.len(), index.bytes);
            evicted
        };
        self.counters.insertions.fetch_add(1, Ordering::Relaxed);
        self.counters
            .evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        self.remove_files(evicted).await
    }

    async fn evict(&self, hash: &ContentHash) -> Result<bool, StoreError> {
        let existed = {
            let mut index = self.index.lock().await;
            let existed = match index.lru.pop(hash) {
                Some(size) => {
                    index.bytes -= size;
                    true
                }
                None => false,
            };
            self.counters.set_size(index.lru.len(), index.bytes);
            existed
        };
        if existed {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.remove_files(vec![*hash]).await?;
        Ok(existed)
    }

    async fn evict_all(&self) -> Result<(), StoreError> {
        let mut index = self.index.lock().await;
        self.counters
            .evictions
            .fetch_add(index.lru.len() as u64, Ordering::Relaxed);
        index.lru.clear();
        index.bytes = 0;
        self.counters.set_size(0, 0);
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }
}
