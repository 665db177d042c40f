//! Remote transport clients and per-cluster client selection.

use std::sync::Arc;

use async_trait::async_trait;
use chunkfed_core::{ChunkStream, ContentHash};
use chunkfed_sync::{ClusterCoordinator, NodeInfo};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};

/// The remote node a client talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCluster {
    /// Cluster name.
    pub name: String,
    /// Node within the cluster.
    pub node: NodeInfo,
}

impl RemoteCluster {
    /// Create remote cluster info.
    pub fn new(name: impl Into<String>, node: NodeInfo) -> Self {
        Self {
            name: name.into(),
            node,
        }
    }
}

/// Client for one node of a remote cluster.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// The node this client is bound to.
    fn cluster(&self) -> &RemoteCluster;

    /// Stream the payload of chunk `hash` owned by `cluster`.
    async fn get_data_chunk(&self, cluster: &str, hash: &ContentHash) -> Result<ChunkStream>;

    /// Cheap liveness probe.
    async fn is_alive(&self) -> bool;
}

/// Builds clients for nodes. Selected by the configured transport driver.
pub trait ClientFactory: Send + Sync {
    /// Create a client for `node` of `cluster`.
    fn connect(&self, cluster: &str, node: &NodeInfo) -> Result<Arc<dyn TransportClient>>;
}

/// Hands out a working client per remote cluster.
///
/// Nodes are tried in the coordinator's order. A node whose client cannot be
/// built or fails its liveness probe is reported unreachable and skipped.
pub struct ClientManager {
    coordinator: Arc<dyn ClusterCoordinator>,
    factory: Arc<dyn ClientFactory>,
    clients: DashMap<(String, String), Arc<dyn TransportClient>>,
}

impl ClientManager {
    /// Create a manager.
    pub fn new(coordinator: Arc<dyn ClusterCoordinator>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            coordinator,
            factory,
            clients: DashMap::new(),
        }
    }

    /// The coordinator consulted for live nodes.
    pub fn coordinator(&self) -> &Arc<dyn ClusterCoordinator> {
        &self.coordinator
    }

    /// First live, responsive client for `cluster`.
    pub async fn client_for(&self, cluster: &str) -> Result<Arc<dyn TransportClient>> {
        for node in self.coordinator.live_nodes(cluster) {
            let key = (cluster.to_string(), node.node_id.clone());
            let cached = self.clients.get(&key).map(|c| Arc::clone(c.value()));
            let client = match cached {
                Some(client) => client,
                None => match self.factory.connect(cluster, &node) {
                    Ok(client) => {
                        self.clients.insert(key.clone(), Arc::clone(&client));
                        client
                    }
                    Err(e) => {
                        warn!(cluster, node = %node.node_id, error = %e, "cannot create client");
                        self.coordinator.mark_unreachable(cluster, &node);
                        continue;
                    }
                },
            };
            if client.is_alive().await {
                self.coordinator.mark_reachable(cluster, &node);
                return Ok(client);
            }
            debug!(cluster, node = %node.node_id, "node failed liveness probe");
            self.clients.remove(&key);
            self.coordinator.mark_unreachable(cluster, &node);
        }
        Err(TransportError::ClusterUnreachable {
            cluster: cluster.to_string(),
        })
    }

    /// Report that `client` failed mid-request so its node is skipped.
    pub fn report_failure(&self, client: &dyn TransportClient) {
        let remote = client.cluster();
        self.clients
            .remove(&(remote.name.clone(), remote.node.node_id.clone()));
        self.coordinator.mark_unreachable(&remote.name, &remote.node);
    }

    /// Number of cached clients.
    pub fn cached_clients(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkfed_sync::StaticCoordinator;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct FakeClient {
        remote: RemoteCluster,
        alive: bool,
    }

    #[async_trait]
    impl TransportClient for FakeClient {
        fn cluster(&self) -> &RemoteCluster {
            &self.remote
        }

        async fn get_data_chunk(&self, cluster: &str, hash: &ContentHash) -> Result<ChunkStream> {
            Err(TransportError::ChunkNotFound {
                cluster: cluster.to_string(),
                hash: hash.to_hex(),
            })
        }

        async fn is_alive(&self) -> bool {
            self.alive
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        dead: HashSet<String>,
        broken: HashSet<String>,
        connects: Mutex<Vec<String>>,
    }

    impl ClientFactory for FakeFactory {
        fn connect(&self, cluster: &str, node: &NodeInfo) -> Result<Arc<dyn TransportClient>> {
            self.connects.lock().unwrap().push(node.node_id.clone());
            if self.broken.contains(&node.node_id) {
                return Err(TransportError::InvalidAddress {
                    address: node.address.clone(),
                    reason: "broken".to_string(),
                });
            }
            Ok(Arc::new(FakeClient {
                remote: RemoteCluster::new(cluster, node.clone()),
                alive: !self.dead.contains(&node.node_id),
            }))
        }
    }

    fn coordinator() -> Arc<StaticCoordinator> {
        let c = Arc::new(StaticCoordinator::new(false));
        c.set_nodes(
            "west",
            vec![
                NodeInfo::new("w1", "a1"),
                NodeInfo::new("w2", "a2"),
                NodeInfo::new("w3", "a3"),
            ],
        );
        c
    }

    #[tokio::test]
    async fn test_first_live_node_wins() {
        let manager = ClientManager::new(coordinator(), Arc::new(FakeFactory::default()));
        let client = manager.client_for("west").await.unwrap();
        assert_eq!(client.cluster().node.node_id, "w1");
        assert_eq!(manager.cached_clients(), 1);
    }

    #[tokio::test]
    async fn test_skips_dead_and_broken_nodes() {
        let coord = coordinator();
        let factory = FakeFactory {
            dead: ["w1".to_string()].into_iter().collect(),
            broken: ["w2".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let manager = ClientManager::new(coord.clone(), Arc::new(factory));
        let client = manager.client_for("west").await.unwrap();
        assert_eq!(client.cluster().node.node_id, "w3");
        let live: Vec<String> = coord.live_nodes("west").into_iter().map(|n| n.node_id).collect();
        assert_eq!(live, vec!["w3"]);
    }

    #[tokio::test]
    async fn test_no_live_node_is_unreachable() {
        let manager = ClientManager::new(coordinator(), Arc::new(FakeFactory::default()));
        assert!(matches!(
            manager.client_for("east").await,
            Err(TransportError::ClusterUnreachable { cluster }) if cluster == "east"
        ));
    }

    #[tokio::test]
    async fn test_report_failure_moves_to_next_node() {
        let manager = ClientManager::new(coordinator(), Arc::new(FakeFactory::default()));
        let first = manager.client_for("west").await.unwrap();
        manager.report_failure(first.as_ref());
        let second = manager.client_for("west").await.unwrap();
        assert_eq!(second.cluster().node.node_id, "w2");
    }

    #[tokio::test]
    async fn test_clients_are_reused() {
        let factory = Arc::new(FakeFactory::default());
        let manager = ClientManager::new(coordinator(), factory.clone());
        manager.client_for("west").await.unwrap();
        manager.client_for("west").await.unwrap();
        assert_eq!(factory.connects.lock().unwrap().len(), 1);
    }
}
