//! Command line of the `cfed-node` binary.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chunkfed_core::{
    HashAlgorithm, LocalFileSystem, RecipeGenerator, SourceFileSystem, DEFAULT_CHUNK_SIZE,
};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::{LogFormat, NodeConfig};
use crate::node::Node;
use crate::registry::DriverRegistry;

/// Command line of `cfed-node`.
#[derive(Parser)]
#[command(name = "cfed-node")]
#[command(about = "chunkfed federated chunk node", long_about = None)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// `cfed-node` subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Run the node until Ctrl-C, reconciling on the leader.
    Serve {
        /// Node configuration file (`.toml` or `.json`).
        #[arg(short, long, env = "CFED_CONFIG", default_value = "/etc/chunkfed/node.toml")]
        config: PathBuf,
    },
    /// Run one reconciliation pass and print its report as JSON.
    Reconcile {
        /// Node configuration file (`.toml` or `.json`).
        #[arg(short, long, env = "CFED_CONFIG", default_value = "/etc/chunkfed/node.toml")]
        config: PathBuf,
    },
    /// Chunk a local file and print its recipe as JSON.
    Recipe {
        /// Local file to chunk.
        file: PathBuf,
        /// Chunk size in bytes.
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u32,
        /// `blake3` or `sha256`.
        #[arg(long, default_value = "blake3")]
        algorithm: String,
    },
}

impl Cli {
    /// Load the configuration file named by the subcommand, if any.
    pub fn load_config(&self) -> Result<Option<NodeConfig>> {
        match &self.command {
            Command::Serve { config } | Command::Reconcile { config } => {
                Ok(Some(NodeConfig::from_file(config)?))
            }
            Command::Recipe { .. } => Ok(None),
        }
    }

    /// Log format requested by `config`, text without one.
    pub fn log_format(config: Option<&NodeConfig>) -> LogFormat {
        config.map(|c| c.log_format).unwrap_or_default()
    }

    /// Execute the subcommand.
    pub async fn run(self, config: Option<NodeConfig>) -> Result<()> {
        match (self.command, config) {
            (Command::Serve { .. }, Some(config)) => serve(config).await,
            (Command::Reconcile { .. }, Some(config)) => reconcile(config).await,
            (
                Command::Recipe {
                    file,
                    chunk_size,
                    algorithm,
                },
                _,
            ) => recipe(&file, chunk_size, &algorithm).await,
            (_, None) => anyhow::bail!("configuration required"),
        }
    }
}

async fn serve(config: NodeConfig) -> Result<()> {
    let registry = DriverRegistry::with_builtin();
    let node = Node::build(config, &registry).await?;
    let handles = node.start()?;
    info!(
        cluster = %node.config.cluster_name,
        interval_secs = node.config.reconcile_interval_secs,
        leader = node.config.leader,
        "node serving, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    node.shutdown();
    for handle in handles {
        handle.join().await;
    }
    Ok(())
}

async fn reconcile(config: NodeConfig) -> Result<()> {
    let registry = DriverRegistry::with_builtin();
    let node = Node::build(config, &registry).await?;
    let report = node.reconciler.run_once().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn recipe(file: &Path, chunk_size: u32, algorithm: &str) -> Result<()> {
    let algorithm: HashAlgorithm = algorithm.parse()?;
    let generator = RecipeGenerator::new(chunk_size, algorithm)?;
    let source = LocalFileSystem::new();
    let uri = file.display().to_string();
    let metadata = source.metadata(&uri).await?;
    if metadata.is_directory {
        anyhow::bail!("{} is a directory", uri);
    }
    let mut stream = source.open(&uri).await?;
    let recipe = generator.generate(metadata, &mut stream).await?;
    println!("{}", recipe.to_json()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recipe_defaults() {
        let cli = Cli::parse_from(["cfed-node", "recipe", "/tmp/x"]);
        match cli.command {
            Command::Recipe {
                chunk_size,
                algorithm,
                ..
            } => {
                assert_eq!(chunk_size, DEFAULT_CHUNK_SIZE);
                assert_eq!(algorithm, "blake3");
            }
            _ => panic!("expected recipe"),
        }
    }

    #[test]
    fn test_parse_reconcile_config() {
        let cli = Cli::parse_from(["cfed-node", "reconcile", "--config", "/tmp/n.toml"]);
        assert!(matches!(cli.command, Command::Reconcile { config } if config == Path::new("/tmp/n.toml")));
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let cli = Cli::parse_from(["cfed-node", "serve", "--config", "/nonexistent/node.toml"]);
        assert!(cli.load_config().is_err());
    }

    #[tokio::test]
    async fn test_recipe_command_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello").unwrap();
        recipe(&path, 2, "sha256").await.unwrap();
        assert!(recipe(dir.path(), 2, "sha256").await.is_err());
        assert!(recipe(&path, 2, "md5").await.is_err());
    }
}
