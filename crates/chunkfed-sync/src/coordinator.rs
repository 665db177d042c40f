//! Cluster coordination: leadership and live peer nodes.
//!
//! Membership storage and health bookkeeping belong to an external
//! collaborator. [`StaticCoordinator`] is the configured, in-process variant:
//! leadership is a flag and peers come from configuration, filtered by a
//! blacklist and a time-limited unreachable set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One node of a (usually remote) cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node identifier, unique within its cluster.
    pub node_id: String,
    /// Address of the node's chunk-serving endpoint.
    pub address: String,
}

impl NodeInfo {
    /// Create node info.
    pub fn new(node_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            address: address.into(),
        }
    }
}

/// Leadership and liveness as seen by this node.
pub trait ClusterCoordinator: Send + Sync {
    /// True if this node currently leads its cluster.
    fn is_leader(&self) -> bool;

    /// Nodes of `cluster` that are neither blacklisted nor currently
    /// unreachable, in preference order.
    fn live_nodes(&self, cluster: &str) -> Vec<NodeInfo>;

    /// Report a failed contact with `node`.
    fn mark_unreachable(&self, cluster: &str, node: &NodeInfo);

    /// Report a successful contact with `node`.
    fn mark_reachable(&self, cluster: &str, node: &NodeInfo);
}

/// Default time an unreachable node is skipped before being retried.
pub const DEFAULT_UNREACHABLE_TTL: Duration = Duration::from_secs(30);

/// Coordinator backed by static configuration.
pub struct StaticCoordinator {
    leader: AtomicBool,
    clusters: RwLock<HashMap<String, Vec<NodeInfo>>>,
    blacklist: DashSet<(String, String)>,
    unreachable: DashMap<(String, String), Instant>,
    unreachable_ttl: Duration,
}

impl StaticCoordinator {
    /// Create a coordinator. `leader` is the initial leadership flag.
    pub fn new(leader: bool) -> Self {
        Self::with_ttl(leader, DEFAULT_UNREACHABLE_TTL)
    }

    /// Create a coordinator with a custom unreachable cool-down.
    pub fn with_ttl(leader: bool, unreachable_ttl: Duration) -> Self {
        Self {
            leader: AtomicBool::new(leader),
            clusters: RwLock::new(HashMap::new()),
            blacklist: DashSet::new(),
            unreachable: DashMap::new(),
            unreachable_ttl,
        }
    }

    /// Change leadership, e.g. after an external election.
    pub fn set_leader(&self, leader: bool) {
        let was = self.leader.swap(leader, Ordering::SeqCst);
        if was != leader {
            info!(leader, "leadership changed");
        }
    }

    /// Add or replace the node list of a cluster.
    pub fn set_nodes(&self, cluster: impl Into<String>, nodes: Vec<NodeInfo>) {
        if let Ok(mut clusters) = self.clusters.write() {
            clusters.insert(cluster.into(), nodes);
        }
    }

    /// Permanently exclude a node until [`StaticCoordinator::unblacklist`].
    pub fn blacklist(&self, cluster: &str, node_id: &str) {
        self.blacklist.insert((cluster.to_string(), node_id.to_string()));
    }

    /// Lift a blacklist entry.
    pub fn unblacklist(&self, cluster: &str, node_id: &str) {
        self.blacklist.remove(&(cluster.to_string(), node_id.to_string()));
    }

    /// Known cluster names.
    pub fn clusters(&self) -> Vec<String> {
        self.clusters
            .read()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn is_unreachable(&self, key: &(String, String)) -> bool {
        let expired = match self.unreachable.get(key) {
            Some(since) => since.elapsed() >= self.unreachable_ttl,
            None => return false,
        };
        if expired {
            self.unreachable.remove(key);
        }
        !expired
    }
}

impl ClusterCoordinator for StaticCoordinator {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn live_nodes(&self, cluster: &str) -> Vec<NodeInfo> {
        let nodes = match self.clusters.read() {
            Ok(clusters) => clusters.get(cluster).cloned().unwrap_or_default(),
            Err(_) => return Vec::new(),
        };
        nodes
            .into_iter()
            .filter(|n| {
                let key = (cluster.to_string(), n.node_id.clone());
                !self.blacklist.contains(&key) && !self.is_unreachable(&key)
            })
            .collect()
    }

    fn mark_unreachable(&self, cluster: &str, node: &NodeInfo) {
        debug!(cluster, node = %node.node_id, "node marked unreachable");
        self.unreachable
            .insert((cluster.to_string(), node.node_id.clone()), Instant::now());
    }

    fn mark_reachable(&self, cluster: &str, node: &NodeInfo) {
        self.unreachable
            .remove(&(cluster.to_string(), node.node_id.clone()));
    }
}
