//! HTTP transport client.
//!
//! Chunks are fetched with `GET {node}/chunks/{cluster}/{hash}` and streamed
//! straight into an `AsyncRead`; liveness is `GET {node}/health`. The serving
//! side lives with the control plane.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chunkfed_core::{ChunkStream, ContentHash};
use chunkfed_sync::NodeInfo;
use futures::TryStreamExt;
use reqwest::StatusCode;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::client::{ClientFactory, RemoteCluster, TransportClient};
use crate::error::{Result, TransportError};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for one node's HTTP chunk endpoint.
pub struct HttpTransportClient {
    remote: RemoteCluster,
    base: String,
    http: reqwest::Client,
}

impl HttpTransportClient {
    /// Create a client. The node address must be an `http://` URL; the client
    /// is built without a TLS stack, so `https://` is refused up front.
    pub fn new(cluster: &str, node: NodeInfo, timeout: Duration) -> Result<Self> {
        let base = node.address.trim_end_matches('/').to_string();
        if base.starts_with("https://") {
            return Err(TransportError::InvalidAddress {
                address: node.address.clone(),
                reason: "TLS is not supported by this client".to_string(),
            });
        }
        if !base.starts_with("http://") {
            return Err(TransportError::InvalidAddress {
                address: node.address.clone(),
                reason: "expected an http:// URL".to_string(),
            });
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Remote {
                cluster: cluster.to_string(),
                node: node.node_id.clone(),
                msg: format!("cannot build HTTP client: {}", e),
            })?;
        Ok(Self {
            remote: RemoteCluster::new(cluster, node),
            base,
            http,
        })
    }

    /// URL of chunk `hash` of `cluster` on this node.
    pub fn chunk_url(&self, cluster: &str, hash: &ContentHash) -> String {
        format!("{}/chunks/{}/{}", self.base, cluster, hash)
    }

    fn remote_error(&self, msg: impl Into<String>) -> TransportError {
        TransportError::Remote {
            cluster: self.remote.name.clone(),
            node: self.remote.node.node_id.clone(),
            msg: msg.into(),
        }
    }
}

#[async_trait]
impl TransportClient for HttpTransportClient {
    fn cluster(&self) -> &RemoteCluster {
        &self.remote
    }

    async fn get_data_chunk(&self, cluster: &str, hash: &ContentHash) -> Result<ChunkStream> {
        let url = self.chunk_url(cluster, hash);
        debug!(url = %url, "fetching remote chunk");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.remote_error(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TransportError::ChunkNotFound {
                cluster: cluster.to_string(),
                hash: hash.to_hex(),
            });
        }
        if !status.is_success() {
            return Err(self.remote_error(format!("unexpected status {}", status)));
        }
        let body = response
            .bytes_stream()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err));
        Ok(Box::pin(StreamReader::new(body)))
    }

    async fn is_alive(&self) -> bool {
        match self.http.get(format!("{}/health", self.base)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(node = %self.remote.node.node_id, error = %e, "health probe failed");
                false
            }
        }
    }
}

/// Factory producing [`HttpTransportClient`]s.
pub struct HttpClientFactory {
    timeout: Duration,
}

impl HttpClientFactory {
    /// Create a factory with the given per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl ClientFactory for HttpClientFactory {
    fn connect(&self, cluster: &str, node: &NodeInfo) -> Result<Arc<dyn TransportClient>> {
        Ok(Arc::new(HttpTransportClient::new(
            cluster,
            node.clone(),
            self.timeout,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkfed_core::HashAlgorithm;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal chunk endpoint: `/health` is up, `known` under `west` returns a
    /// payload, other `west` chunks are 404 and everything else is 500.
    async fn chunk_server(known: ContentHash) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&request);
                    let path = request.split_whitespace().nth(1).unwrap_or("").to_string();
                    let (status, body): (&str, &[u8]) = if path == "/health" {
                        ("200 OK", &b""[..])
                    } else if path == format!("/chunks/west/{}", known) {
                        ("200 OK", &b"chunk payload"[..])
                    } else if path.starts_with("/chunks/west/") {
                        ("404 Not Found", &b""[..])
                    } else {
                        ("500 Internal Server Error", &b"boom"[..])
                    };
                    let head = format!(
                        "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                        status,
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        address
    }

    #[tokio::test]
    async fn test_status_codes_map_to_outcomes() {
        let known = HashAlgorithm::Blake3.digest(b"chunk payload");
        let address = chunk_server(known).await;
        let client =
            HttpTransportClient::new("west", NodeInfo::new("w1", address), Duration::from_secs(5))
                .unwrap();
        assert!(client.is_alive().await);

        let mut stream = client.get_data_chunk("west", &known).await.unwrap();
        let mut body = Vec::new();
        stream.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"chunk payload");

        let missing = HashAlgorithm::Blake3.digest(b"other");
        let err = client.get_data_chunk("west", &missing).await.err().unwrap();
        assert!(matches!(err, TransportError::ChunkNotFound { ref hash, .. } if *hash == missing.to_hex()));
        assert!(!err.is_node_failure());

        let err = client.get_data_chunk("east", &known).await.err().unwrap();
        assert!(matches!(err, TransportError::Remote { ref msg, .. } if msg.contains("500")));
        assert!(err.is_node_failure());
    }

    #[test]
    fn test_rejects_non_http_address() {
        let err = HttpTransportClient::new("west", NodeInfo::new("w1", "tcp://w1:9400"), DEFAULT_REQUEST_TIMEOUT);
        assert!(matches!(err, Err(TransportError::InvalidAddress { .. })));
    }

    #[test]
    fn test_rejects_https_address() {
        let err = HttpTransportClient::new(
            "west",
            NodeInfo::new("w1", "https://w1:9443"),
            DEFAULT_REQUEST_TIMEOUT,
        );
        match err {
            Err(TransportError::InvalidAddress { address, .. }) => {
                assert_eq!(address, "https://w1:9443")
            }
            _ => panic!("https address accepted"),
        }
    }

    #[test]
    fn test_chunk_url_layout() {
        let client = HttpTransportClient::new(
            "west",
            NodeInfo::new("w1", "http://w1:9400/"),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .unwrap();
        let hash = HashAlgorithm::Blake3.digest(b"x");
        assert_eq!(
            client.chunk_url("west", &hash),
            format!("http://w1:9400/chunks/west/{}", hash.to_hex())
        );
    }

    #[tokio::test]
    async fn test_unreachable_node_is_not_alive() {
        // Port 9 on localhost (discard) is closed in test environments.
        let client = HttpTransportClient::new(
            "west",
            NodeInfo::new("w1", "http://127.0.0.1:9"),
            Duration::from_millis(500),
        )
        .unwrap();
        assert!(!client.is_alive().await);
        let hash = HashAlgorithm::Blake3.digest(b"x");
        let err = client.get_data_chunk("west", &hash).await.err().unwrap();
        assert!(err.is_node_failure());
    }
}
