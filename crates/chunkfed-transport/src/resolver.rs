//! Three-tier chunk resolution.
//!
//! `resolve_chunk(cluster, hash)` answers from, in order:
//! 1. the local source, when a live export's current recipe contains the hash;
//! 2. the local chunk cache;
//! 3. a remote node of `cluster`, through a [`CacheFillReader`] so a fully
//!    read payload lands in the cache.
//!
//! Misses in tiers 1 and 2 fall through silently. Only the remote tier's
//! failure reaches the caller. Resolutions are independent tasks; there is no
//! lock shared across hashes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chunkfed_core::{ChunkStream, ContentHash, HashAlgorithm, SourceFileSystem};
use chunkfed_store::{ChunkCache, ExportRegistry, RecipeStore};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::client::ClientManager;
use crate::error::{Result, TransportError};
use crate::interceptor::{CacheFillReader, FillCounters};

/// Default number of concurrent pre-fills in [`ChunkResolver::prefill_many`].
pub const DEFAULT_PREFILL_CONCURRENCY: usize = 8;

/// Resolver counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverStats {
    /// Chunks answered from the local source.
    pub source_hits: u64,
    /// Chunks answered from the cache.
    pub cache_hits: u64,
    /// Chunks fetched from a remote cluster.
    pub remote_fetches: u64,
    /// Requests from peers answered locally.
    pub served: u64,
    /// Resolutions that failed.
    pub failures: u64,
    /// Remote payloads written to the cache.
    pub cache_fills: u64,
    /// Remote payloads not cached (abandoned, oversized or mismatched).
    pub fills_discarded: u64,
}

#[derive(Debug, Default)]
struct ResolverCounters {
    source_hits: AtomicU64,
    cache_hits: AtomicU64,
    remote_fetches: AtomicU64,
    served: AtomicU64,
    failures: AtomicU64,
}

/// Resolves chunk hashes to byte streams for one cluster.
pub struct ChunkResolver {
    cluster_name: String,
    recipes: Arc<RecipeStore>,
    exports: Arc<ExportRegistry>,
    source: Arc<dyn SourceFileSystem>,
    cache: Arc<dyn ChunkCache>,
    clients: Arc<ClientManager>,
    max_fill_bytes: Option<usize>,
    verify: Option<HashAlgorithm>,
    peer_algorithms: HashMap<String, HashAlgorithm>,
    counters: ResolverCounters,
    fills: Arc<FillCounters>,
}

impl ChunkResolver {
    /// Create a resolver for `cluster_name`.
    pub fn new(
        cluster_name: impl Into<String>,
        recipes: Arc<RecipeStore>,
        exports: Arc<ExportRegistry>,
        source: Arc<dyn SourceFileSystem>,
        cache: Arc<dyn ChunkCache>,
        clients: Arc<ClientManager>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            recipes,
            exports,
            source,
            cache,
            clients,
            max_fill_bytes: None,
            verify: None,
            peer_algorithms: HashMap::new(),
            counters: ResolverCounters::default(),
            fills: Arc::new(FillCounters::default()),
        }
    }

    /// Never cache remote payloads larger than `limit` bytes.
    pub fn with_max_fill_bytes(mut self, limit: usize) -> Self {
        self.max_fill_bytes = Some(limit);
        self
    }

    /// Check remote payloads against their hash before caching them.
    /// `algorithm` applies to every peer without its own entry.
    pub fn with_verification(mut self, algorithm: HashAlgorithm) -> Self {
        self.verify = Some(algorithm);
        self
    }

    /// Hash algorithm `cluster` chunks with, when it differs from ours.
    /// Used only when verification is on.
    pub fn with_peer_algorithm(mut self, cluster: impl Into<String>, algorithm: HashAlgorithm) -> Self {
        self.peer_algorithms.insert(cluster.into(), algorithm);
        self
    }

    /// Algorithm remote payloads of `cluster` are verified with, if any.
    pub fn verification_for(&self, cluster: &str) -> Option<HashAlgorithm> {
        self.verify
            .map(|default| self.peer_algorithms.get(cluster).copied().unwrap_or(default))
    }

    /// Name of the cluster this resolver serves.
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// The chunk cache filled by remote fetches.
    pub fn cache(&self) -> &Arc<dyn ChunkCache> {
        &self.cache
    }

    /// Resolve `hash` of `cluster`, trying the local source, the cache, then
    /// the remote cluster.
    pub async fn resolve_chunk(&self, cluster: &str, hash: &ContentHash) -> Result<ChunkStream> {
        if let Some(stream) = self.from_source(hash).await {
            self.counters.source_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(stream);
        }
        if let Some(stream) = self.from_cache(hash).await {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(stream);
        }
        match self.from_remote(cluster, hash).await {
            Ok(stream) => {
                self.counters.remote_fetches.fetch_add(1, Ordering::Relaxed);
                Ok(stream)
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(cluster, hash = %hash, error = %e, "chunk resolution failed");
                Err(e)
            }
        }
    }

    /// Answer a peer's request from the local tiers only.
    pub async fn serve_local(&self, hash: &ContentHash) -> Option<ChunkStream> {
        let stream = match self.from_source(hash).await {
            Some(stream) => Some(stream),
            None => self.from_cache(hash).await,
        };
        if stream.is_some() {
            self.counters.served.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!(hash = %hash, "chunk not held locally");
        }
        stream
    }

    /// Resolve `hash` and drain it, for the cache fill side effect only.
    /// Returns the number of bytes drained.
    pub async fn prefill(&self, cluster: &str, hash: &ContentHash) -> Result<u64> {
        let mut stream = self.resolve_chunk(cluster, hash).await?;
        let drained = tokio::io::copy(&mut stream, &mut tokio::io::sink()).await?;
        Ok(drained)
    }

    /// Pre-fill many hashes, at most `concurrency` at a time.
    pub async fn prefill_many(
        &self,
        cluster: &str,
        hashes: Vec<ContentHash>,
        concurrency: usize,
    ) -> Vec<(ContentHash, Result<u64>)> {
        stream::iter(hashes)
            .map(|hash| async move {
                let outcome = self.prefill(cluster, &hash).await;
                (hash, outcome)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    /// Counters snapshot.
    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            source_hits: self.counters.source_hits.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            remote_fetches: self.counters.remote_fetches.load(Ordering::Relaxed),
            served: self.counters.served.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            cache_fills: self.fills.filled.load(Ordering::Relaxed),
            fills_discarded: self.fills.discarded.load(Ordering::Relaxed),
        }
    }

    /// Tier 1. The recipe must still be the stored one, must still be
    /// exported and must still describe the resource, otherwise the bytes
    /// could be stale.
    async fn from_source(&self, hash: &ContentHash) -> Option<ChunkStream> {
        for (candidate, _) in self.recipes.find_all_by_hash(hash) {
            let path = &candidate.path().path;
            // The local index may trail writes made by the leader.
            let recipe = match self.recipes.current(path) {
                Ok(Some(recipe)) => recipe,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %path, error = %e, "recipe lookup failed");
                    continue;
                }
            };
            let Some(chunk) = recipe.find_chunk(hash).copied() else {
                continue;
            };
            let entry = match self.exports.get(path) {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %path, error = %e, "export lookup failed");
                    continue;
                }
            };
            match self.source.metadata(&entry.resource_path).await {
                Ok(current) if !recipe.is_stale(&current) => {}
                Ok(_) => {
                    debug!(path = %path, "resource changed since chunking, skipping source tier");
                    continue;
                }
                Err(e) => {
                    debug!(path = %path, error = %e, "resource unavailable");
                    continue;
                }
            }
            match self
                .source
                .open_range(&entry.resource_path, chunk.offset, u64::from(chunk.length))
                .await
            {
                Ok(stream) => {
                    debug!(hash = %hash, path = %path, offset = chunk.offset, tier = "source", "chunk resolved");
                    return Some(stream);
                }
                Err(e) => debug!(path = %path, error = %e, "range open failed"),
            }
        }
        None
    }

    /// Tier 2.
    async fn from_cache(&self, hash: &ContentHash) -> Option<ChunkStream> {
        match self.cache.read(hash).await {
            Ok(Some(stream)) => {
                debug!(hash = %hash, tier = "cache", "chunk resolved");
                Some(stream)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(hash = %hash, error = %e, "cache read failed");
                None
            }
        }
    }

    /// Tier 3. A node that fails the request is reported and the next live
    /// node is tried; a definitive answer such as "not found" ends the attempt.
    async fn from_remote(&self, cluster: &str, hash: &ContentHash) -> Result<ChunkStream> {
        let attempts = self.clients.coordinator().live_nodes(cluster).len().max(1);
        let mut last_error = None;
        for _ in 0..attempts {
            let client = self.clients.client_for(cluster).await?;
            match client.get_data_chunk(cluster, hash).await {
                Ok(stream) => {
                    debug!(hash = %hash, cluster, node = %client.cluster().node.node_id, tier = "remote", "chunk resolved");
                    let mut reader = CacheFillReader::new(stream, *hash, Arc::clone(&self.cache))
                        .with_counters(Arc::clone(&self.fills));
                    if let Some(limit) = self.max_fill_bytes {
                        reader = reader.with_max_fill_bytes(limit);
                    }
                    if let Some(algorithm) = self.verification_for(cluster) {
                        reader = reader.with_verification(algorithm);
                    }
                    return Ok(Box::pin(reader));
                }
                Err(e) if e.is_node_failure() => {
                    warn!(cluster, node = %client.cluster().node.node_id, error = %e, "remote fetch failed, trying next node");
                    self.clients.report_failure(client.as_ref());
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| TransportError::ClusterUnreachable {
            cluster: cluster.to_string(),
        }))
    }
}
