#![warn(missing_docs)]

//! chunkfed transport: federated chunk retrieval.
//!
//! Read path: local source range → chunk cache → remote cluster (cache fill on completion)

pub mod client;
pub mod error;
pub mod http;
pub mod interceptor;
pub mod loopback;
pub mod resolver;

pub use client::{ClientFactory, ClientManager, RemoteCluster, TransportClient};
pub use error::{Result, TransportError};
pub use http::{HttpClientFactory, HttpTransportClient, DEFAULT_REQUEST_TIMEOUT};
pub use interceptor::{CacheFillReader, FillCounters};
pub use loopback::{LoopbackClient, LoopbackFactory, LoopbackNetwork};
pub use resolver::{ChunkResolver, ResolverStats, DEFAULT_PREFILL_CONCURRENCY};
