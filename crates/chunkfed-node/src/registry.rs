//! Named driver constructors.
//!
//! Configuration selects drivers by name; this table maps each name to a
//! constructor. Built-ins: caches `memory` and `disk`, transports `loopback`
//! and `http`, source scheme `file`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chunkfed_core::{LocalFileSystem, SchemeRouter, SourceFileSystem};
use chunkfed_store::{ChunkCache, DiskChunkCache, MemoryChunkCache};
use chunkfed_transport::{ClientFactory, HttpClientFactory, LoopbackFactory, LoopbackNetwork};
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::config::{CacheConfig, TransportConfig};

/// Builds a chunk cache from its configuration.
pub type CacheConstructor =
    Box<dyn Fn(CacheConfig) -> BoxFuture<'static, anyhow::Result<Arc<dyn ChunkCache>>> + Send + Sync>;

/// Builds a transport client factory from its configuration.
pub type TransportConstructor =
    Box<dyn Fn(&TransportConfig) -> anyhow::Result<Arc<dyn ClientFactory>> + Send + Sync>;

/// Builds the source backend for one URI scheme.
pub type SourceConstructor = Box<dyn Fn() -> Arc<dyn SourceFileSystem> + Send + Sync>;

/// Table of named driver constructors.
pub struct DriverRegistry {
    caches: HashMap<String, CacheConstructor>,
    transports: HashMap<String, TransportConstructor>,
    sources: HashMap<String, SourceConstructor>,
    loopback: Arc<LoopbackNetwork>,
}

impl DriverRegistry {
    /// Registry without any driver.
    pub fn empty() -> Self {
        Self {
            caches: HashMap::new(),
            transports: HashMap::new(),
            sources: HashMap::new(),
            loopback: Arc::new(LoopbackNetwork::new()),
        }
    }

    /// Registry with the built-in drivers.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();

        registry.register_cache("memory", |config: CacheConfig| {
            async move {
                let cache: Arc<dyn ChunkCache> =
                    Arc::new(MemoryChunkCache::new(config.max_entries, config.max_bytes));
                Ok::<_, anyhow::Error>(cache)
            }
            .boxed()
        });
        registry.register_cache("disk", |config: CacheConfig| {
            async move {
                let dir = config
                    .dir
                    .ok_or_else(|| anyhow::anyhow!("disk cache needs a directory"))?;
                let cache: Arc<dyn ChunkCache> =
                    Arc::new(DiskChunkCache::open(dir, config.max_bytes).await?);
                Ok::<_, anyhow::Error>(cache)
            }
            .boxed()
        });

        let network = Arc::clone(&registry.loopback);
        registry.register_transport("loopback", move |_config: &TransportConfig| {
            let factory: Arc<dyn ClientFactory> =
                Arc::new(LoopbackFactory::new(Arc::clone(&network)));
            Ok(factory)
        });
        registry.register_transport("http", |config: &TransportConfig| {
            let factory: Arc<dyn ClientFactory> = Arc::new(HttpClientFactory::new(
                Duration::from_millis(config.request_timeout_ms),
            ));
            Ok(factory)
        });

        registry.register_source("file", || -> Arc<dyn SourceFileSystem> {
            Arc::new(LocalFileSystem::new())
        });
        registry
    }

    /// Add or replace a cache driver.
    pub fn register_cache<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn(CacheConfig) -> BoxFuture<'static, anyhow::Result<Arc<dyn ChunkCache>>>
            + Send
            + Sync
            + 'static,
    {
        self.caches.insert(name.into(), Box::new(ctor));
    }

    /// Add or replace a transport driver.
    pub fn register_transport<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn(&TransportConfig) -> anyhow::Result<Arc<dyn ClientFactory>> + Send + Sync + 'static,
    {
        self.transports.insert(name.into(), Box::new(ctor));
    }

    /// Add or replace the source backend of a URI scheme.
    pub fn register_source<F>(&mut self, scheme: impl Into<String>, ctor: F)
    where
        F: Fn() -> Arc<dyn SourceFileSystem> + Send + Sync + 'static,
    {
        self.sources.insert(scheme.into(), Box::new(ctor));
    }

    /// Build the configured chunk cache.
    pub async fn build_cache(&self, config: &CacheConfig) -> anyhow::Result<Arc<dyn ChunkCache>> {
        let ctor = self
            .caches
            .get(&config.driver)
            .ok_or_else(|| anyhow::anyhow!("unknown chunk cache driver: {}", config.driver))?;
        ctor(config.clone()).await
    }

    /// Build the configured transport client factory.
    pub fn build_transport(&self, config: &TransportConfig) -> anyhow::Result<Arc<dyn ClientFactory>> {
        let ctor = self
            .transports
            .get(&config.driver)
            .ok_or_else(|| anyhow::anyhow!("unknown transport driver: {}", config.driver))?;
        ctor(config)
    }

    /// Source router with every registered scheme.
    pub fn build_source(&self) -> SchemeRouter {
        let mut router = SchemeRouter::new();
        for (scheme, ctor) in &self.sources {
            router.register(scheme.clone(), ctor());
        }
        router
    }

    /// The in-process network used by the `loopback` transport.
    pub fn loopback_network(&self) -> &Arc<LoopbackNetwork> {
        &self.loopback
    }

    /// Registered cache driver names, sorted.
    pub fn cache_drivers(&self) -> Vec<&str> {
        sorted_names(self.caches.keys())
    }

    /// Registered transport driver names, sorted.
    pub fn transport_drivers(&self) -> Vec<&str> {
        sorted_names(self.transports.keys())
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

fn sorted_names<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
    let mut names: Vec<&str> = keys.map(String::as_str).collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkfed_core::ContentHash;

    #[test]
    fn test_builtin_names() {
        let registry = DriverRegistry::with_builtin();
        assert_eq!(registry.cache_drivers(), vec!["disk", "memory"]);
        assert_eq!(registry.transport_drivers(), vec!["http", "loopback"]);
        assert_eq!(registry.build_source().schemes(), vec!["file"]);
    }

    #[tokio::test]
    async fn test_build_memory_cache() {
        let registry = DriverRegistry::with_builtin();
        let cache = registry.build_cache(&CacheConfig::default()).await.unwrap();
        let hash = ContentHash([1; 32]);
        cache.write(&hash, bytes_of(b"x")).await.unwrap();
        assert!(cache.has(&hash).await);
    }

    #[tokio::test]
    async fn test_build_disk_cache() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DriverRegistry::with_builtin();
        let config = CacheConfig {
            driver: "disk".to_string(),
            dir: Some(dir.path().join("cache")),
            ..Default::default()
        };
        let cache = registry.build_cache(&config).await.unwrap();
        assert_eq!(cache.stats().entries, 0);
        assert!(dir.path().join("cache").is_dir());
    }

    #[tokio::test]
    async fn test_unknown_drivers_rejected() {
        let registry = DriverRegistry::with_builtin();
        let cache = CacheConfig {
            driver: "redis".to_string(),
            ..Default::default()
        };
        assert!(registry.build_cache(&cache).await.is_err());
        let transport = TransportConfig {
            driver: "carrier-pigeon".to_string(),
            ..Default::default()
        };
        assert!(registry.build_transport(&transport).is_err());
    }

    #[tokio::test]
    async fn test_custom_driver_registration() {
        let mut registry = DriverRegistry::empty();
        registry.register_cache("tiny", |_config: CacheConfig| {
            async move {
                let cache: Arc<dyn ChunkCache> = Arc::new(MemoryChunkCache::new(1, 16));
                Ok::<_, anyhow::Error>(cache)
            }
            .boxed()
        });
        let config = CacheConfig {
            driver: "tiny".to_string(),
            ..Default::default()
        };
        assert!(registry.build_cache(&config).await.is_ok());
    }

    fn bytes_of(data: &[u8]) -> bytes::Bytes {
        bytes::Bytes::copy_from_slice(data)
    }
}
