//! Error types for the chunkfed-core crate

/// All errors that can occur while modelling, chunking or probing data objects
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The underlying resource was deleted or could not be read
    #[error("source unavailable: {uri}: {source}")]
    SourceUnavailable {
        /// Resource URI that failed
        uri: String,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },
    /// No source file system is registered for the URI scheme
    #[error("unsupported resource scheme: {scheme}")]
    UnsupportedScheme {
        /// The scheme that had no backend
        scheme: String,
    },
    /// A recipe violates its structural invariants. Indicates a programming error.
    #[error("malformed recipe: {reason}")]
    MalformedRecipe {
        /// Which invariant was violated
        reason: String,
    },
    /// A content hash string could not be parsed
    #[error("invalid content hash {input:?}: {reason}")]
    InvalidHash {
        /// The rejected input
        input: String,
        /// Why it was rejected
        reason: String,
    },
    /// Hash algorithm name not recognised
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
    /// Chunk size must be positive
    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(u32),
    /// Stream I/O error while reading object content
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// True if the error means the resource itself is gone or unreadable.
    pub fn is_source_unavailable(&self) -> bool {
        matches!(
            self,
            CoreError::SourceUnavailable { .. } | CoreError::UnsupportedScheme { .. }
        )
    }
}
