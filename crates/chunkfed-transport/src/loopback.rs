//! In-process transport: clusters in one process serve each other directly.
//!
//! Each node address maps to a peer [`ChunkResolver`], held weakly so the
//! network never keeps a resolver alive. A request is answered by the peer's
//! local tiers only, the same thing a chunk-serving endpoint would do.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chunkfed_core::{ChunkStream, ContentHash};
use chunkfed_sync::NodeInfo;
use dashmap::{DashMap, DashSet};

use crate::client::{ClientFactory, RemoteCluster, TransportClient};
use crate::error::{Result, TransportError};
use crate::resolver::ChunkResolver;

/// Registry of in-process endpoints, keyed by node address.
#[derive(Default)]
pub struct LoopbackNetwork {
    endpoints: DashMap<String, Weak<ChunkResolver>>,
    down: DashSet<String>,
}

impl LoopbackNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `resolver` at `address`.
    pub fn register(&self, address: impl Into<String>, resolver: &Arc<ChunkResolver>) {
        self.endpoints.insert(address.into(), Arc::downgrade(resolver));
    }

    /// Stop serving at `address`.
    pub fn unregister(&self, address: &str) {
        self.endpoints.remove(address);
    }

    /// Simulate an outage of `address`.
    pub fn set_down(&self, address: &str, down: bool) {
        if down {
            self.down.insert(address.to_string());
        } else {
            self.down.remove(address);
        }
    }

    fn endpoint(&self, address: &str) -> Option<Arc<ChunkResolver>> {
        if self.down.contains(address) {
            return None;
        }
        self.endpoints.get(address).and_then(|w| w.upgrade())
    }
}

/// Client bound to one loopback node.
pub struct LoopbackClient {
    remote: RemoteCluster,
    network: Arc<LoopbackNetwork>,
}

impl LoopbackClient {
    /// Create a client for `node` of `cluster`.
    pub fn new(cluster: &str, node: NodeInfo, network: Arc<LoopbackNetwork>) -> Self {
        Self {
            remote: RemoteCluster::new(cluster, node),
            network,
        }
    }

    fn remote_error(&self, msg: impl Into<String>) -> TransportError {
        TransportError::Remote {
            cluster: self.remote.name.clone(),
            node: self.remote.node.node_id.clone(),
            msg: msg.into(),
        }
    }
}

#[async_trait]
impl TransportClient for LoopbackClient {
    fn cluster(&self) -> &RemoteCluster {
        &self.remote
    }

    async fn get_data_chunk(&self, cluster: &str, hash: &ContentHash) -> Result<ChunkStream> {
        let peer = self
            .network
            .endpoint(&self.remote.node.address)
            .ok_or_else(|| self.remote_error("endpoint down"))?;
        if peer.cluster_name() != cluster {
            return Err(self.remote_error(format!(
                "node serves cluster {}, not {}",
                peer.cluster_name(),
                cluster
            )));
        }
        peer.serve_local(hash)
            .await
            .ok_or_else(|| TransportError::ChunkNotFound {
                cluster: cluster.to_string(),
                hash: hash.to_hex(),
            })
    }

    async fn is_alive(&self) -> bool {
        self.network.endpoint(&self.remote.node.address).is_some()
    }
}

/// Factory producing [`LoopbackClient`]s over a shared network.
pub struct LoopbackFactory {
    network: Arc<LoopbackNetwork>,
}

impl LoopbackFactory {
    /// Create a factory over `network`.
    pub fn new(network: Arc<LoopbackNetwork>) -> Self {
        Self { network }
    }
}

impl ClientFactory for LoopbackFactory {
    fn connect(&self, cluster: &str, node: &NodeInfo) -> Result<Arc<dyn TransportClient>> {
        Ok(Arc::new(LoopbackClient::new(
            cluster,
            node.clone(),
            Arc::clone(&self.network),
        )))
    }
}
