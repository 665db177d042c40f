//! Error types for the sync subsystem.

use chunkfed_core::CoreError;
use chunkfed_store::StoreError;
use thiserror::Error;

/// Errors that abort a whole reconciliation pass or scheduling call.
///
/// Per-entry failures inside a pass are logged and counted, never returned.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Recipe store or export registry failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Chunking or probing failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The scheduler was shut down.
    #[error("scheduler shut down")]
    Shutdown,
}
