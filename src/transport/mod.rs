//! The transport seam.
//!
//! A [`Transport`] executes one finalized [`WireRequest`] and hands back a
//! [`RawResponse`] whose body is a [`ResponseStream`]. Transports never retry;
//! retry and failure policy live in the [`resilience`](crate::resilience) layer.
//!
//! [`ReqwestTransport`] is the production transport. Anything else that can
//! speak HTTP can be plugged in by implementing [`Transport`].

mod reqwest_transport;

pub use reqwest_transport::{ReqwestTransport, ReqwestTransportBuilder};

use crate::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, StatusCode};
use std::io;
use url::Url;

/// A fully built request, ready to be put on the wire.
#[derive(Debug, Clone)]
pub struct WireRequest {
    /// The HTTP verb.
    pub method: Method,
    /// The resolved URL, including the query string.
    pub url: Url,
    /// All request headers.
    pub headers: HeaderMap,
    /// The encoded body, if any.
    pub body: Option<Bytes>,
}

/// A response as returned by a transport, before any interpretation.
pub struct RawResponse {
    /// The response status.
    pub status: StatusCode,
    /// The response headers.
    pub headers: HeaderMap,
    /// The response body.
    pub body: Box<dyn ResponseStream>,
}

impl std::fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Executes requests.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use restgen::transport::{BufferedStream, RawResponse, Transport, WireRequest};
/// use http::{HeaderMap, StatusCode};
///
/// struct AlwaysNoContent;
///
/// #[async_trait]
/// impl Transport for AlwaysNoContent {
///     async fn execute(&self, _request: WireRequest) -> restgen::Result<RawResponse> {
///         Ok(RawResponse {
///             status: StatusCode::NO_CONTENT,
///             headers: HeaderMap::new(),
///             body: Box::new(BufferedStream::empty()),
///         })
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request and returns the raw response.
    ///
    /// # Errors
    ///
    /// Returns a transport-level error ([`Error::Network`](crate::Error::Network),
    /// [`Error::Transport`](crate::Error::Transport) or
    /// [`Error::Timeout`](crate::Error::Timeout)) when no response was received.
    async fn execute(&self, request: WireRequest) -> Result<RawResponse>;
}

/// The body of a response, backed by a live connection or by memory.
///
/// Chunks that have been handed out are kept so that [`reset`](Self::reset)
/// can replay the body from the start.
#[async_trait]
pub trait ResponseStream: Send + Sync {
    /// Returns the next chunk, or `None` at the end of the body.
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>>;

    /// Rewinds the stream to its first byte.
    ///
    /// # Errors
    ///
    /// Fails when the beginning of the body is no longer available, e.g. the
    /// connection was released before the body was fully buffered.
    fn reset(&mut self) -> io::Result<()>;

    /// Returns the underlying connection to the transport. Idempotent.
    fn release(&mut self);
}

/// Reads everything from the current position to the end of the stream.
pub(crate) async fn read_to_end(stream: &mut dyn ResponseStream) -> io::Result<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next_chunk().await? {
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

/// An in-memory body.
#[derive(Debug, Clone, Default)]
pub struct BufferedStream {
    data: Bytes,
    consumed: bool,
}

impl BufferedStream {
    /// A stream over the given bytes.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            consumed: false,
        }
    }

    /// A stream with no content.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseStream for BufferedStream {
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        if self.consumed || self.data.is_empty() {
            self.consumed = true;
            return Ok(None);
        }
        self.consumed = true;
        Ok(Some(self.data.clone()))
    }

    fn reset(&mut self) -> io::Result<()> {
        self.consumed = false;
        Ok(())
    }

    fn release(&mut self) {}
}

/// A response body handed to the caller for manual streaming.
///
/// Returned by methods declared as `ReturnKind::entity::<BodyStream>()`. The
/// connection stays open until the stream is released or dropped.
pub struct BodyStream {
    inner: Box<dyn ResponseStream>,
    released: bool,
}

impl BodyStream {
    pub(crate) fn new(inner: Box<dyn ResponseStream>) -> Self {
        Self {
            inner,
            released: false,
        }
    }

    /// Returns the next chunk, or `None` at the end of the body.
    pub async fn chunk(&mut self) -> crate::Result<Option<Bytes>> {
        Ok(self.inner.next_chunk().await?)
    }

    /// Reads the rest of the body and releases the connection.
    pub async fn bytes(mut self) -> crate::Result<Bytes> {
        let bytes = read_to_end(self.inner.as_mut()).await?;
        self.release();
        Ok(bytes)
    }

    /// Releases the connection. Idempotent.
    pub fn release(&mut self) {
        if !self.released {
            self.inner.release();
            self.released = true;
        }
    }

    /// Returns `true` once the connection has been released.
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for BodyStream {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyStream")
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transports and instrumented streams for unit tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counters shared between a [`CountingStream`] and the test.
    #[derive(Debug, Default)]
    pub(crate) struct StreamStats {
        pub(crate) reads: AtomicUsize,
        pub(crate) resets: AtomicUsize,
        pub(crate) releases: AtomicUsize,
    }

    impl StreamStats {
        pub(crate) fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }

        pub(crate) fn resets(&self) -> usize {
            self.resets.load(Ordering::SeqCst)
        }

        pub(crate) fn releases(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }
    }

    /// A buffered stream that counts what is done to it.
    pub(crate) struct CountingStream {
        inner: BufferedStream,
        stats: Arc<StreamStats>,
        fail_reset: bool,
    }

    impl CountingStream {
        pub(crate) fn new(data: impl Into<Bytes>) -> (Self, Arc<StreamStats>) {
            let stats = Arc::new(StreamStats::default());
            let stream = Self {
                inner: BufferedStream::new(data),
                stats: stats.clone(),
                fail_reset: false,
            };
            (stream, stats)
        }

        pub(crate) fn failing_reset(mut self) -> Self {
            self.fail_reset = true;
            self
        }
    }

    #[async_trait]
    impl ResponseStream for CountingStream {
        async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
            let chunk = self.inner.next_chunk().await?;
            if chunk.is_some() {
                self.stats.reads.fetch_add(1, Ordering::SeqCst);
            }
            Ok(chunk)
        }

        fn reset(&mut self) -> io::Result<()> {
            self.stats.resets.fetch_add(1, Ordering::SeqCst);
            if self.fail_reset {
                return Err(io::Error::new(io::ErrorKind::Other, "mark not supported"));
            }
            self.inner.reset()
        }

        fn release(&mut self) {
            self.stats.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Builds a raw response around a stream.
    pub(crate) fn raw(status: u16, content_type: Option<&str>, body: impl ResponseStream + 'static) -> RawResponse {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = content_type {
            headers.insert(
                http::header::CONTENT_TYPE,
                http::HeaderValue::from_str(content_type).unwrap(),
            );
        }
        RawResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            body: Box::new(body),
        }
    }

    /// A transport that replays queued responses and records every request.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        responses: Mutex<VecDeque<RawResponse>>,
        pub(crate) requests: Mutex<Vec<WireRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn push(&self, response: RawResponse) {
            self.responses.lock().push_back(response);
        }

        pub(crate) fn calls(&self) -> usize {
            self.requests.lock().len()
        }

        pub(crate) fn last_request(&self) -> Option<WireRequest> {
            self.requests.lock().last().cloned()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(&self, request: WireRequest) -> Result<RawResponse> {
            self.requests.lock().push(request);
            self.responses
                .lock()
                .pop_front()
                .ok_or_else(|| crate::Error::Transport("no scripted response left".into()))
        }
    }
}
