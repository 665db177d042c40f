//! Fixed-size chunking and recipe generation

use crate::error::CoreError;
use crate::fingerprint::HashAlgorithm;
use crate::object::DataObjectMetadata;
use crate::recipe::{Recipe, RecipeChunk};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Default chunk size: 1 MiB
pub const DEFAULT_CHUNK_SIZE: u32 = 1024 * 1024;

/// Upper bound on the internal read buffer, independent of chunk size.
pub const MAX_READ_BUFFER: usize = 100 * 1024;

/// Splits a byte stream into fixed-size chunks and hashes each one.
///
/// Stateless: the same stream with the same chunk size and algorithm always
/// yields an identical recipe, on any cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecipeGenerator {
    chunk_size: u32,
    algorithm: HashAlgorithm,
}

impl Default for RecipeGenerator {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            algorithm: HashAlgorithm::default(),
        }
    }
}

impl RecipeGenerator {
    /// Create a generator. `chunk_size` must be positive.
    pub fn new(chunk_size: u32, algorithm: HashAlgorithm) -> Result<Self, CoreError> {
        if chunk_size == 0 {
            return Err(CoreError::InvalidChunkSize(chunk_size));
        }
        Ok(Self {
            chunk_size,
            algorithm,
        })
    }

    /// Configured chunk size.
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Configured hash algorithm.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Read `reader` to the end and build a recipe for it.
    ///
    /// The returned recipe's size is the number of bytes actually read; if the
    /// object changed since `metadata` was probed the size is corrected and the
    /// stale modification time makes the next reconciliation pass rebuild it.
    /// Nothing is returned on a read error.
    pub async fn generate<R>(
        &self,
        metadata: DataObjectMetadata,
        reader: &mut R,
    ) -> Result<Recipe, CoreError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let chunk_size = self.chunk_size as usize;
        let mut buf = vec![0u8; chunk_size.min(MAX_READ_BUFFER)];
        let mut chunks = Vec::new();
        let mut chunk_offset = 0u64;
        let mut filled = 0usize;
        let mut hasher = self.algorithm.hasher();

        loop {
            let want = (chunk_size - filled).min(buf.len());
            let n = reader.read(&mut buf[..want]).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            filled += n;
            if filled == chunk_size {
                let sealed = std::mem::replace(&mut hasher, self.algorithm.hasher());
                chunks.push(RecipeChunk::new(chunk_offset, filled as u32, sealed.finalize()));
                chunk_offset += filled as u64;
                filled = 0;
            }
        }
        if filled > 0 {
            chunks.push(RecipeChunk::new(chunk_offset, filled as u32, hasher.finalize()));
            chunk_offset += filled as u64;
        }

        let mut metadata = metadata;
        if metadata.object_size != chunk_offset {
            debug!(
                path = %metadata.path,
                probed = metadata.object_size,
                read = chunk_offset,
                "object size changed while chunking"
            );
            metadata.object_size = chunk_offset;
        }
        Recipe::new(metadata, self.algorithm, self.chunk_size, chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::DataObjectPath;
    use proptest::prelude::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    fn meta(size: u64) -> DataObjectMetadata {
        DataObjectMetadata::file(DataObjectPath::new("east", "/obj"), size, 42)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn chunk(data: &[u8], chunk_size: u32) -> Recipe {
        let generator = RecipeGenerator::new(chunk_size, HashAlgorithm::Blake3).unwrap();
        let mut reader = data;
        generator.generate(meta(data.len() as u64), &mut reader).await.unwrap()
    }

    /// Reader that yields at most `step` bytes per call.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let n = self.step.min(buf.remaining()).min(self.data.len() - self.pos);
            let start = self.pos;
            buf.put_slice(&self.data[start..start + n]);
            self.pos += n;
            Poll::Ready(Ok(()))
        }
    }

    struct Broken;

    impl AsyncRead for Broken {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::other("disk on fire")))
        }
    }

    #[test]
    fn zero_chunk_size_rejected() {
        assert!(matches!(
            RecipeGenerator::new(0, HashAlgorithm::Blake3),
            Err(CoreError::InvalidChunkSize(0))
        ));
    }

    #[tokio::test]
    async fn empty_stream_has_no_chunks() {
        let r = chunk(&[], 16).await;
        assert!(r.is_empty());
        assert_eq!(r.metadata().object_size, 0);
    }

    #[tokio::test]
    async fn example_object_yields_three_chunks() {
        let data = pattern(2_500_000);
        let r = chunk(&data, 1_048_576).await;
        let offsets: Vec<u64> = r.chunks().iter().map(|c| c.offset).collect();
        let lengths: Vec<u32> = r.chunks().iter().map(|c| c.length).collect();
        assert_eq!(offsets, vec![0, 1_048_576, 2_097_152]);
        assert_eq!(lengths, vec![1_048_576, 1_048_576, 402_848]);
        assert_eq!(
            r.chunks()[2].hash,
            HashAlgorithm::Blake3.digest(&data[2_097_152..])
        );
    }

    #[tokio::test]
    async fn trickled_reads_give_same_recipe() {
        let data = pattern(10_000);
        let expected = chunk(&data, 1024).await;
        let generator = RecipeGenerator::new(1024, HashAlgorithm::Blake3).unwrap();
        let mut reader = Trickle {
            data: data.clone(),
            pos: 0,
            step: 7,
        };
        let got = generator.generate(meta(10_000), &mut reader).await.unwrap();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn chunk_larger_than_read_buffer() {
        let data = pattern(MAX_READ_BUFFER * 3 + 17);
        let r = chunk(&data, (MAX_READ_BUFFER * 2) as u32).await;
        assert_eq!(r.len(), 2);
        assert_eq!(r.chunks()[0].hash, HashAlgorithm::Blake3.digest(&data[..MAX_READ_BUFFER * 2]));
    }

    #[tokio::test]
    async fn size_corrected_when_object_grew() {
        let data = pattern(100);
        let generator = RecipeGenerator::new(64, HashAlgorithm::Sha256).unwrap();
        let mut reader = &data[..];
        let r = generator.generate(meta(50), &mut reader).await.unwrap();
        assert_eq!(r.metadata().object_size, 100);
        assert_eq!(r.metadata().last_modification_time, 42);
    }

    #[tokio::test]
    async fn read_error_surfaces() {
        let generator = RecipeGenerator::default();
        let err = generator.generate(meta(10), &mut Broken).await.unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));
    }

    proptest! {
        #[test]
        fn prop_deterministic_and_covering(
            data in prop::collection::vec(any::<u8>(), 0..20_000),
            chunk_size in 1u32..4096,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (a, b) = rt.block_on(async {
                (chunk(&data, chunk_size).await, chunk(&data, chunk_size).await)
            });
            prop_assert_eq!(&a, &b);

            let total: u64 = a.chunks().iter().map(|c| c.length as u64).sum();
            prop_assert_eq!(total, data.len() as u64);
            let mut expected = 0u64;
            for (i, c) in a.chunks().iter().enumerate() {
                prop_assert_eq!(c.offset, expected);
                if i + 1 < a.len() {
                    prop_assert_eq!(c.length, chunk_size);
                }
                let range = &data[c.offset as usize..c.end() as usize];
                prop_assert_eq!(c.hash, HashAlgorithm::Blake3.digest(range));
                expected = c.end();
            }
        }
    }
}
