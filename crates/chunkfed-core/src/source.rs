//! Source file systems: where exported resources actually live.
//!
//! Backends are selected by URI scheme through [`SchemeRouter`]. The only
//! built-in backend is [`LocalFileSystem`] for `file://` URIs and bare paths.

use crate::error::CoreError;
use crate::object::{uri_scheme, DataObjectMetadata, DataObjectPath};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

/// Byte stream handed between the chunk tiers and their callers.
pub type ChunkStream = Pin<Box<dyn AsyncRead + Send>>;

/// Read access to the underlying storage of exported resources.
#[async_trait]
pub trait SourceFileSystem: Send + Sync {
    /// Probe size, type and modification time. The returned path carries the
    /// URI with an empty cluster name; callers relabel it.
    async fn metadata(&self, uri: &str) -> Result<DataObjectMetadata, CoreError>;

    /// Open the whole resource.
    async fn open(&self, uri: &str) -> Result<ChunkStream, CoreError>;

    /// Open exactly `[offset, offset + length)` of the resource.
    async fn open_range(&self, uri: &str, offset: u64, length: u64) -> Result<ChunkStream, CoreError>;
}

/// Source backend for the local POSIX file system.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    /// Create the backend.
    pub fn new() -> Self {
        Self
    }

    fn local_path(uri: &str) -> Result<PathBuf, CoreError> {
        match uri.split_once("://") {
            Some(("file", rest)) => Ok(PathBuf::from(rest)),
            Some((scheme, _)) => Err(CoreError::UnsupportedScheme {
                scheme: scheme.to_string(),
            }),
            None => Ok(PathBuf::from(uri)),
        }
    }

    fn unavailable(uri: &str, source: std::io::Error) -> CoreError {
        CoreError::SourceUnavailable {
            uri: uri.to_string(),
            source,
        }
    }
}

#[async_trait]
impl SourceFileSystem for LocalFileSystem {
    async fn metadata(&self, uri: &str) -> Result<DataObjectMetadata, CoreError> {
        let path = Self::local_path(uri)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Self::unavailable(uri, e))?;
        let mtime = meta
            .modified()
            .map_err(|e| Self::unavailable(uri, e))?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Ok(DataObjectMetadata {
            path: DataObjectPath::new("", uri),
            object_size: meta.len(),
            is_directory: meta.is_dir(),
            last_modification_time: mtime,
        })
    }

    async fn open(&self, uri: &str) -> Result<ChunkStream, CoreError> {
        let path = Self::local_path(uri)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| Self::unavailable(uri, e))?;
        Ok(Box::pin(file))
    }

    async fn open_range(&self, uri: &str, offset: u64, length: u64) -> Result<ChunkStream, CoreError> {
        let path = Self::local_path(uri)?;
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| Self::unavailable(uri, e))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| Self::unavailable(uri, e))?;
        Ok(Box::pin(file.take(length)))
    }
}

/// Dispatches to a backend by URI scheme.
#[derive(Clone, Default)]
pub struct SchemeRouter {
    backends: HashMap<String, Arc<dyn SourceFileSystem>>,
}

impl SchemeRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with only the local `file` backend registered.
    pub fn local() -> Self {
        let mut router = Self::new();
        router.register("file", Arc::new(LocalFileSystem::new()));
        router
    }

    /// Register (or replace) the backend for `scheme`.
    pub fn register(&mut self, scheme: impl Into<String>, backend: Arc<dyn SourceFileSystem>) {
        self.backends.insert(scheme.into(), backend);
    }

    /// Registered schemes.
    pub fn schemes(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    fn backend(&self, uri: &str) -> Result<&Arc<dyn SourceFileSystem>, CoreError> {
        let scheme = uri_scheme(uri);
        self.backends
            .get(scheme)
            .ok_or_else(|| CoreError::UnsupportedScheme {
                scheme: scheme.to_string(),
            })
    }
}

#[async_trait]
impl SourceFileSystem for SchemeRouter {
    async fn metadata(&self, uri: &str) -> Result<DataObjectMetadata, CoreError> {
        self.backend(uri)?.metadata(uri).await
    }

    async fn open(&self, uri: &str) -> Result<ChunkStream, CoreError> {
        self.backend(uri)?.open(uri).await
    }

    async fn open_range(&self, uri: &str, offset: u64, length: u64) -> Result<ChunkStream, CoreError> {
        self.backend(uri)?.open_range(uri, offset, length).await
    }
}
