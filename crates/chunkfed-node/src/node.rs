//! Node assembly.
//!
//! Every component is built here from configuration and handed to its users
//! as an `Arc`. Nothing is global.

use std::sync::Arc;
use std::time::Duration;

use chunkfed_core::RecipeGenerator;
use chunkfed_store::{ChunkCache, ExportRegistry, MemoryMap, RecipeStore};
use chunkfed_sync::{
    NodeInfo, Reconciler, ScheduleDriver, ScheduleHandle, ScheduledTask, StaticCoordinator,
    TokioScheduler,
};
use chunkfed_transport::{ChunkResolver, ClientManager};
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::registry::DriverRegistry;

/// A fully wired node.
pub struct Node {
    /// Configuration the node was built from.
    pub config: NodeConfig,
    /// Leadership and peer liveness.
    pub coordinator: Arc<StaticCoordinator>,
    /// Current recipes of this cluster.
    pub recipes: Arc<RecipeStore>,
    /// Exports of this cluster.
    pub exports: Arc<ExportRegistry>,
    /// Cache of remote chunks.
    pub cache: Arc<dyn ChunkCache>,
    /// Chunk resolver.
    pub resolver: Arc<ChunkResolver>,
    /// Reconciliation task.
    pub reconciler: Arc<Reconciler>,
    scheduler: TokioScheduler,
}

impl Node {
    /// Build a node, seeding the configured exports.
    pub async fn build(config: NodeConfig, registry: &DriverRegistry) -> anyhow::Result<Self> {
        config.validate()?;
        let generator = RecipeGenerator::new(config.chunk_size, config.algorithm()?)?;

        let coordinator = Arc::new(StaticCoordinator::new(config.leader));
        for remote in &config.remote_clusters {
            let nodes = remote
                .nodes
                .iter()
                .map(|address| NodeInfo::new(address.clone(), address.clone()))
                .collect();
            coordinator.set_nodes(remote.name.clone(), nodes);
        }

        let recipes = Arc::new(RecipeStore::open(Arc::new(MemoryMap::new()))?);
        let exports = Arc::new(ExportRegistry::new(Arc::new(MemoryMap::new())));
        for entry in &config.exports {
            exports.add(entry.clone())?;
        }

        let source = Arc::new(registry.build_source());
        let cache = registry.build_cache(&config.chunk_cache).await?;
        let clients = Arc::new(ClientManager::new(
            coordinator.clone(),
            registry.build_transport(&config.transport)?,
        ));

        let mut resolver = ChunkResolver::new(
            config.cluster_name.clone(),
            recipes.clone(),
            exports.clone(),
            source.clone(),
            cache.clone(),
            clients,
        );
        if config.transport.verify_remote {
            resolver = resolver.with_verification(generator.algorithm());
            for remote in &config.remote_clusters {
                if let Some(algorithm) = remote.algorithm()? {
                    resolver = resolver.with_peer_algorithm(remote.name.clone(), algorithm);
                }
            }
        }
        if let Some(limit) = config.chunk_cache.max_fill_bytes {
            resolver = resolver.with_max_fill_bytes(limit);
        }
        let resolver = Arc::new(resolver);
        registry
            .loopback_network()
            .register(loopback_address(&config.cluster_name, &config.node_id), &resolver);

        let reconciler = Arc::new(Reconciler::new(
            config.cluster_name.clone(),
            recipes.clone(),
            exports.clone(),
            source,
            generator,
        ));
        let scheduler = TokioScheduler::new(config.scheduler_workers, coordinator.clone());

        info!(
            cluster = %config.cluster_name,
            node = %config.node_id,
            exports = config.exports.len(),
            remotes = config.remote_clusters.len(),
            cache = %config.chunk_cache.driver,
            transport = %config.transport.driver,
            "node assembled"
        );

        Ok(Self {
            config,
            coordinator,
            recipes,
            exports,
            cache,
            resolver,
            reconciler,
            scheduler,
        })
    }

    /// Schedule leader-only reconciliation at the configured interval, and a
    /// reload of the local recipe view on every node so that followers pick
    /// up recipes written by the leader.
    pub fn start(&self) -> anyhow::Result<Vec<ScheduleHandle>> {
        let interval = Duration::from_secs(self.config.reconcile_interval_secs);
        let reconcile = self.reconciler.schedule(&self.scheduler, interval)?;

        let recipes = Arc::clone(&self.recipes);
        let reload = ScheduledTask::new("recipe-reload", move || {
            let recipes = Arc::clone(&recipes);
            async move {
                if let Err(e) = recipes.reload() {
                    warn!(error = %e, "recipe reload failed");
                }
            }
        })
        .with_delay(interval)
        .every(interval);
        let reload = self.scheduler.schedule(reload)?;
        Ok(vec![reconcile, reload])
    }

    /// Cancel all scheduled work.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

/// Address under which a node is reachable on the loopback transport.
pub fn loopback_address(cluster: &str, node_id: &str) -> String {
    format!("loop://{}/{}", cluster, node_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkfed_core::DataExportEntry;
    use tokio::io::AsyncReadExt;

    fn config(cluster: &str, dir: &tempfile::TempDir) -> NodeConfig {
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![5u8; 3000]).unwrap();
        NodeConfig {
            cluster_name: cluster.to_string(),
            chunk_size: 1024,
            exports: vec![DataExportEntry::new("/pub", format!("file://{}", path.display()))],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_build_seeds_exports_and_reconciles() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::build(config("east", &dir), &DriverRegistry::with_builtin())
            .await
            .unwrap();
        assert_eq!(node.exports.len().unwrap(), 1);
        let report = node.reconciler.run_once().await.unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(node.recipes.get("/pub/data.bin").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_two_nodes_over_loopback() {
        let registry = DriverRegistry::with_builtin();
        let west_dir = tempfile::tempdir().unwrap();
        let mut west_config = config("west", &west_dir);
        west_config.node_id = "w1".to_string();
        west_config.transport.driver = "loopback".to_string();
        let west = Node::build(west_config, &registry).await.unwrap();
        west.reconciler.run_once().await.unwrap();

        let east_dir = tempfile::tempdir().unwrap();
        let mut east_config = config("east", &east_dir);
        east_config.transport.driver = "loopback".to_string();
        east_config.remote_clusters = vec![crate::config::RemoteClusterConfig {
            name: "west".to_string(),
            nodes: vec![loopback_address("west", "w1")],
            hash_algorithm: None,
        }];
        let east = Node::build(east_config, &registry).await.unwrap();

        let recipe = west.recipes.get("/pub/data.bin").unwrap();
        let mut stream = east
            .resolver
            .resolve_chunk("west", &recipe.chunks()[0].hash)
            .await
            .unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, vec![5u8; 1024]);
        assert!(east.cache.has(&recipe.chunks()[0].hash).await);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::build(config("east", &dir), &DriverRegistry::with_builtin())
            .await
            .unwrap();
        let mut reports = node.reconciler.subscribe();
        let handles = node.start().unwrap();
        assert_eq!(handles.len(), 2);
        reports.changed().await.unwrap();
        assert_eq!(reports.borrow().added, 1);
        node.shutdown();
        for handle in handles {
            handle.join().await;
        }
        assert!(node.start().is_err());
    }
}
