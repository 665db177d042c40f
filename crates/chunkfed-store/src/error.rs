//! Error types for the store subsystem.

use chunkfed_core::CoreError;
use thiserror::Error;

/// Errors that can occur in the recipe store, export registry or chunk cache.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing replicated map failed.
    #[error("key-value error: {msg}")]
    Kv {
        /// Error message from the backend.
        msg: String,
    },

    /// A stored value could not be encoded or decoded.
    #[error("codec error for key {key}: {source}")]
    Codec {
        /// Key whose value failed.
        key: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A stored recipe failed validation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Cache I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
