//! Cache-filling read decorator for remote chunk streams.
//!
//! [`CacheFillReader`] forwards every read of the wrapped stream unchanged and
//! copies the delivered bytes aside. When the stream reaches end-of-data the
//! copy is written to the chunk cache under the chunk's hash, once, before the
//! final zero-length read is reported. A stream that errors, overflows the
//! fill limit, fails verification, or is dropped early leaves the cache
//! untouched.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::BytesMut;
use chunkfed_core::{ContentHash, HashAlgorithm};
use chunkfed_store::ChunkCache;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, warn};

/// Shared counters of fill outcomes.
#[derive(Debug, Default)]
pub struct FillCounters {
    /// Payloads written to the cache.
    pub filled: AtomicU64,
    /// Fills abandoned before completion.
    pub discarded: AtomicU64,
}

enum FillState {
    Buffering(BytesMut),
    Writing(BoxFuture<'static, ()>),
    Bypass,
    Done,
}

/// `AsyncRead` decorator that fills the chunk cache on natural completion.
pub struct CacheFillReader<R> {
    inner: R,
    hash: ContentHash,
    cache: Arc<dyn ChunkCache>,
    state: FillState,
    max_fill_bytes: Option<usize>,
    verify: Option<HashAlgorithm>,
    counters: Option<Arc<FillCounters>>,
}

impl<R> CacheFillReader<R> {
    /// Wrap `inner`, filling `cache` under `hash`.
    pub fn new(inner: R, hash: ContentHash, cache: Arc<dyn ChunkCache>) -> Self {
        Self {
            inner,
            hash,
            cache,
            state: FillState::Buffering(BytesMut::new()),
            max_fill_bytes: None,
            verify: None,
            counters: None,
        }
    }

    /// Stop buffering (and never cache) once more than `limit` bytes arrive.
    pub fn with_max_fill_bytes(mut self, limit: usize) -> Self {
        self.max_fill_bytes = Some(limit);
        self
    }

    /// Only cache the payload if it digests to the expected hash.
    pub fn with_verification(mut self, algorithm: HashAlgorithm) -> Self {
        self.verify = Some(algorithm);
        self
    }

    /// Record outcomes in `counters`.
    pub fn with_counters(mut self, counters: Arc<FillCounters>) -> Self {
        self.counters = Some(counters);
        self
    }

    fn discard(&mut self, reason: &str) {
        if let FillState::Buffering(buf) = &self.state {
            debug!(hash = %self.hash, buffered = buf.len(), reason, "cache fill discarded");
            if let Some(counters) = &self.counters {
                counters.discarded.fetch_add(1, Ordering::Relaxed);
            }
            self.state = FillState::Bypass;
        }
    }

    fn append(&mut self, data: &[u8]) {
        let overflow = match &self.state {
            FillState::Buffering(buf) => self
                .max_fill_bytes
                .is_some_and(|limit| buf.len() + data.len() > limit),
            _ => return,
        };
        if overflow {
            self.discard("fill limit exceeded");
        } else if let FillState::Buffering(buf) = &mut self.state {
            buf.extend_from_slice(data);
        }
    }

    /// Turn the completed buffer into a pending cache write.
    fn start_write(&mut self) {
        let FillState::Buffering(buf) = std::mem::replace(&mut self.state, FillState::Done) else {
            return;
        };
        let payload = buf.freeze();
        if let Some(algorithm) = self.verify {
            let actual = algorithm.digest(&payload);
            if actual != self.hash {
                warn!(hash = %self.hash, actual = %actual, "remote payload does not match its hash, not caching");
                if let Some(counters) = &self.counters {
                    counters.discarded.fetch_add(1, Ordering::Relaxed);
                }
                return;
            }
        }
        let cache = Arc::clone(&self.cache);
        let counters = self.counters.clone();
        let hash = self.hash;
        self.state = FillState::Writing(
            async move {
                let len = payload.len();
                match cache.write(&hash, payload).await {
                    Ok(()) => {
                        debug!(hash = %hash, len, "chunk cached");
                        if let Some(counters) = counters {
                            counters.filled.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(e) => warn!(hash = %hash, error = %e, "cache fill failed"),
                }
            }
            .boxed(),
        );
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CacheFillReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if let FillState::Writing(write) = &mut this.state {
            return match write.poll_unpin(cx) {
                Poll::Ready(()) => {
                    this.state = FillState::Done;
                    Poll::Ready(Ok(()))
                }
                Poll::Pending => Poll::Pending,
            };
        }

        let before = buf.filled().len();
        let had_room = buf.remaining() > 0;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => {
                this.discard("read error");
                Poll::Ready(Err(e))
            }
            Poll::Ready(Ok(())) => {
                let read = &buf.filled()[before..];
                if !read.is_empty() {
                    this.append(read);
                    return Poll::Ready(Ok(()));
                }
                if !had_room {
                    return Poll::Ready(Ok(()));
                }
                this.start_write();
                if let FillState::Writing(write) = &mut this.state {
                    if write.poll_unpin(cx).is_pending() {
                        return Poll::Pending;
                    }
                    this.state = FillState::Done;
                }
                Poll::Ready(Ok(()))
            }
        }
    }
}

impl<R> Drop for CacheFillReader<R> {
    fn drop(&mut self) {
        self.discard("stream abandoned");
    }
}
