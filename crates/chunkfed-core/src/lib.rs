#![warn(missing_docs)]

//! chunkfed core: data object model, recipes and the fixed-size chunker.
//!
//! Write path: Source file → Probe metadata → Chunk (fixed size) → Fingerprint → Recipe
//! Read path:  Recipe chunk → Source byte range

pub mod chunker;
pub mod error;
pub mod fingerprint;
pub mod object;
pub mod recipe;
pub mod source;

pub use chunker::{RecipeGenerator, DEFAULT_CHUNK_SIZE, MAX_READ_BUFFER};
pub use error::CoreError;
pub use fingerprint::{ContentHash, ContentHasher, HashAlgorithm};
pub use object::{uri_scheme, DataExportEntry, DataObjectMetadata, DataObjectPath};
pub use recipe::{Recipe, RecipeChunk};
pub use source::{ChunkStream, LocalFileSystem, SchemeRouter, SourceFileSystem};
