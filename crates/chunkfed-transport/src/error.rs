//! Error types for remote chunk retrieval.

use std::io;

use chunkfed_core::CoreError;
use chunkfed_store::StoreError;
use thiserror::Error;

/// Errors surfaced by transport clients and the chunk resolver.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No live node of the cluster could be reached.
    #[error("cluster {cluster} unreachable")]
    ClusterUnreachable {
        /// Cluster that was asked for.
        cluster: String,
    },

    /// A node answered, but the exchange failed.
    #[error("node {node} of cluster {cluster}: {msg}")]
    Remote {
        /// Remote cluster.
        cluster: String,
        /// Node that failed.
        node: String,
        /// What went wrong.
        msg: String,
    },

    /// The remote cluster has no chunk with this hash.
    #[error("chunk {hash} not found in cluster {cluster}")]
    ChunkNotFound {
        /// Cluster that answered.
        cluster: String,
        /// Hex digest of the requested chunk.
        hash: String,
    },

    /// A node address the configured client cannot use.
    #[error("invalid node address {address}: {reason}")]
    InvalidAddress {
        /// Address as configured.
        address: String,
        /// Why it was refused.
        reason: String,
    },

    /// Local store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Local source or recipe failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// I/O failure, including a broken remote stream.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransportError {
    /// True if the failure is the node's fault rather than a definitive answer.
    /// Such nodes are marked unreachable and the next live node is tried.
    pub fn is_node_failure(&self) -> bool {
        matches!(self, TransportError::Remote { .. } | TransportError::Io(_))
    }
}

impl From<TransportError> for io::Error {
    fn from(e: TransportError) -> Self {
        let kind = match &e {
            TransportError::ClusterUnreachable { .. } => io::ErrorKind::NotConnected,
            TransportError::ChunkNotFound { .. } => io::ErrorKind::NotFound,
            TransportError::InvalidAddress { .. } => io::ErrorKind::InvalidInput,
            TransportError::Io(inner) => inner.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
