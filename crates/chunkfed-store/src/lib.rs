#![warn(missing_docs)]

//! chunkfed stores: the per-cluster recipe store and export registry on top of a
//! replicated key-value map, and the hash-addressed chunk cache.

pub mod cache;
pub mod error;
pub mod export_registry;
pub mod kvstore;
pub mod recipe_store;

pub use cache::{CacheStats, ChunkCache, DiskChunkCache, MemoryChunkCache};
pub use error::StoreError;
pub use export_registry::ExportRegistry;
pub use kvstore::{MemoryMap, ReplicatedMap};
pub use recipe_store::RecipeStore;
