//! Recipes: the ordered, content-hashed chunk list describing one object version.

use crate::error::CoreError;
use crate::fingerprint::{ContentHash, HashAlgorithm};
use crate::object::{DataObjectMetadata, DataObjectPath};
use serde::{Deserialize, Serialize};

/// One fixed-size (or final partial) byte range of an object plus its content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipeChunk {
    /// Byte offset of the chunk within the object
    #[serde(rename = "start")]
    pub offset: u64,
    /// Chunk length in bytes, always > 0
    #[serde(rename = "len")]
    pub length: u32,
    /// Hash of exactly the bytes `[offset, offset + length)`
    pub hash: ContentHash,
}

impl RecipeChunk {
    /// Create a chunk descriptor.
    pub fn new(offset: u64, length: u32, hash: ContentHash) -> Self {
        Self {
            offset,
            length,
            hash,
        }
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }
}

/// Immutable description of an object's full content at one point in time.
///
/// A changed object is represented by a new `Recipe`; chunks are never
/// mutated in place. Construction validates ordering, contiguity and coverage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RecipeDocument", try_from = "RecipeDocument")]
pub struct Recipe {
    metadata: DataObjectMetadata,
    algorithm: HashAlgorithm,
    chunk_size: u32,
    chunks: Vec<RecipeChunk>,
}

impl Recipe {
    /// Build a recipe, rejecting any invariant violation as `MalformedRecipe`.
    pub fn new(
        metadata: DataObjectMetadata,
        algorithm: HashAlgorithm,
        chunk_size: u32,
        chunks: Vec<RecipeChunk>,
    ) -> Result<Self, CoreError> {
        validate(&metadata, chunk_size, &chunks)?;
        Ok(Self {
            metadata,
            algorithm,
            chunk_size,
            chunks,
        })
    }

    /// Probed metadata the recipe was built from.
    pub fn metadata(&self) -> &DataObjectMetadata {
        &self.metadata
    }

    /// Object identity.
    pub fn path(&self) -> &DataObjectPath {
        &self.metadata.path
    }

    /// Hash algorithm used for every chunk.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Nominal chunk size.
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Chunks in ascending offset order.
    pub fn chunks(&self) -> &[RecipeChunk] {
        &self.chunks
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True for zero-length objects.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// First chunk whose content hash equals `hash`.
    pub fn find_chunk(&self, hash: &ContentHash) -> Option<&RecipeChunk> {
        self.chunks.iter().find(|c| &c.hash == hash)
    }

    /// Iterate over chunk hashes in order.
    pub fn hashes(&self) -> impl Iterator<Item = &ContentHash> + '_ {
        self.chunks.iter().map(|c| &c.hash)
    }

    /// True if `current` describes a different version than the one chunked.
    pub fn is_stale(&self, current: &DataObjectMetadata) -> bool {
        !self.metadata.same_version(current)
    }

    /// Encode as `{path, algorithm, chunk_size, chunks, metadata}` JSON.
    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode and re-validate a JSON recipe.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(json)?)
    }
}

fn malformed(reason: String) -> CoreError {
    CoreError::MalformedRecipe { reason }
}

fn validate(
    metadata: &DataObjectMetadata,
    chunk_size: u32,
    chunks: &[RecipeChunk],
) -> Result<(), CoreError> {
    if chunk_size == 0 {
        return Err(malformed("chunk_size must be positive".into()));
    }
    if chunks.is_empty() != (metadata.object_size == 0) {
        return Err(malformed(format!(
            "object size {} with {} chunks",
            metadata.object_size,
            chunks.len()
        )));
    }
    let mut expected = 0u64;
    let last = chunks.len().saturating_sub(1);
    for (i, chunk) in chunks.iter().enumerate() {
        if chunk.offset != expected {
            return Err(malformed(format!(
                "chunk {} starts at {} but previous chunk ended at {}",
                i, chunk.offset, expected
            )));
        }
        if chunk.length == 0 || chunk.length > chunk_size {
            return Err(malformed(format!(
                "chunk {} has length {} (chunk size {})",
                i, chunk.length, chunk_size
            )));
        }
        if i != last && chunk.length != chunk_size {
            return Err(malformed(format!(
                "non-final chunk {} has length {} (chunk size {})",
                i, chunk.length, chunk_size
            )));
        }
        expected = chunk.end();
    }
    if expected != metadata.object_size {
        return Err(malformed(format!(
            "chunks cover {} bytes, object size is {}",
            expected, metadata.object_size
        )));
    }
    Ok(())
}

/// JSON document shape of a recipe.
#[derive(Serialize, Deserialize)]
struct RecipeDocument {
    path: String,
    algorithm: HashAlgorithm,
    chunk_size: u32,
    chunks: Vec<RecipeChunk>,
    metadata: DataObjectMetadata,
}

impl From<Recipe> for RecipeDocument {
    fn from(r: Recipe) -> Self {
        Self {
            path: r.metadata.path.path.clone(),
            algorithm: r.algorithm,
            chunk_size: r.chunk_size,
            chunks: r.chunks,
            metadata: r.metadata,
        }
    }
}

impl TryFrom<RecipeDocument> for Recipe {
    type Error = CoreError;

    fn try_from(doc: RecipeDocument) -> Result<Self, Self::Error> {
        if doc.path != doc.metadata.path.path {
            return Err(malformed(format!(
                "path {:?} disagrees with metadata path {:?}",
                doc.path, doc.metadata.path.path
            )));
        }
        Recipe::new(doc.metadata, doc.algorithm, doc.chunk_size, doc.chunks)
    }
}
