//! Node configuration, loaded from TOML or JSON.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chunkfed_core::{DataExportEntry, HashAlgorithm, DEFAULT_CHUNK_SIZE};
use serde::{Deserialize, Serialize};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Chunk cache driver selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// `memory` or `disk`.
    pub driver: String,
    /// Capacity in payload bytes.
    pub max_bytes: u64,
    /// Capacity in entries (memory driver).
    pub max_entries: usize,
    /// Cache directory (disk driver).
    pub dir: Option<PathBuf>,
    /// Remote payloads above this size are streamed but not cached.
    pub max_fill_bytes: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            driver: "memory".to_string(),
            max_bytes: 1 << 30,
            max_entries: 4096,
            dir: None,
            max_fill_bytes: None,
        }
    }
}

/// Transport driver selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// `loopback` or `http`.
    pub driver: String,
    /// Per-request timeout.
    pub request_timeout_ms: u64,
    /// Check remote payloads against their hash before caching.
    pub verify_remote: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            driver: "http".to_string(),
            request_timeout_ms: 30_000,
            verify_remote: true,
        }
    }
}

/// A peer cluster and its nodes, in preference order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteClusterConfig {
    /// Cluster name.
    pub name: String,
    /// Node addresses. Each address doubles as the node id.
    pub nodes: Vec<String>,
    /// Hash algorithm the cluster chunks with, when it differs from
    /// `hash_algorithm`. Remote payloads are verified with it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_algorithm: Option<String>,
}

impl RemoteClusterConfig {
    /// Parsed `hash_algorithm`, if set.
    pub fn algorithm(&self) -> anyhow::Result<Option<HashAlgorithm>> {
        self.hash_algorithm
            .as_deref()
            .map(HashAlgorithm::from_str)
            .transpose()
            .map_err(Into::into)
    }
}

/// Everything a node needs to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Name of this node's cluster.
    pub cluster_name: String,
    /// Name of this node within its cluster.
    pub node_id: String,
    /// Fixed chunk size in bytes.
    pub chunk_size: u32,
    /// `blake3` or `sha256`.
    pub hash_algorithm: String,
    /// Seconds between reconciliation passes.
    pub reconcile_interval_secs: u64,
    /// Scheduled jobs allowed to run at once.
    pub scheduler_workers: usize,
    /// Chunk cache driver.
    pub chunk_cache: CacheConfig,
    /// Transport driver.
    pub transport: TransportConfig,
    /// Peer clusters this node reads from.
    pub remote_clusters: Vec<RemoteClusterConfig>,
    /// Exports seeded at start-up.
    pub exports: Vec<DataExportEntry>,
    /// Static leadership, for deployments without an election.
    pub leader: bool,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            cluster_name: "local".to_string(),
            node_id: "node1".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            hash_algorithm: HashAlgorithm::Blake3.as_str().to_string(),
            reconcile_interval_secs: 60,
            scheduler_workers: 4,
            chunk_cache: CacheConfig::default(),
            transport: TransportConfig::default(),
            remote_clusters: Vec::new(),
            exports: Vec::new(),
            leader: true,
            log_format: LogFormat::Text,
        }
    }
}

impl NodeConfig {
    /// Load and validate a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: NodeConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the node cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cluster_name.is_empty() {
            anyhow::bail!("cluster_name must not be empty");
        }
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than zero");
        }
        if self.reconcile_interval_secs == 0 {
            anyhow::bail!("reconcile_interval_secs must be greater than zero");
        }
        if self.scheduler_workers == 0 {
            anyhow::bail!("scheduler_workers must be greater than zero");
        }
        self.algorithm()?;
        if self.chunk_cache.driver == "disk" && self.chunk_cache.dir.is_none() {
            anyhow::bail!("chunk_cache.dir is required for the disk driver");
        }
        for remote in &self.remote_clusters {
            if remote.name == self.cluster_name {
                anyhow::bail!("remote cluster {} has this node's cluster name", remote.name);
            }
            remote.algorithm()?;
        }
        Ok(())
    }

    /// Parsed hash algorithm.
    pub fn algorithm(&self) -> anyhow::Result<HashAlgorithm> {
        Ok(HashAlgorithm::from_str(&self.hash_algorithm)?)
    }
}
