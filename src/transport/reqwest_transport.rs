//! A pooled HTTP transport built on `reqwest`.

use super::{RawResponse, ResponseStream, Transport, WireRequest};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use std::io;
use std::time::Duration;

/// A [`Transport`] backed by a pooled [`reqwest::Client`].
///
/// The transport is designed to be shared across clients. It maintains a
/// connection pool and applies its default headers and timeout to every request.
///
/// # Examples
///
/// ```no_run
/// use restgen::transport::ReqwestTransport;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), restgen::Error> {
/// let transport = ReqwestTransport::builder()
///     .timeout(Duration::from_secs(30))
///     .default_header("User-Agent", "my-app/1.0")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
}

impl ReqwestTransport {
    /// Creates a transport with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Creates a new `ReqwestTransportBuilder`.
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, wire: WireRequest) -> Result<RawResponse> {
        tracing::debug!(
            method = %wire.method,
            url = %wire.url,
            "Executing HTTP request"
        );

        let mut request = self.http_client.request(wire.method, wire.url);

        for (name, value) in &self.default_headers {
            if !wire.headers.contains_key(name) {
                request = request.header(name, value);
            }
        }

        request = request.headers(wire.headers);

        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        if let Some(body) = wire.body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout
            } else {
                Error::Network(e)
            }
        })?;

        Ok(RawResponse {
            status: response.status(),
            headers: response.headers().clone(),
            body: Box::new(ReqwestStream::new(response)),
        })
    }
}

/// A response body read chunk by chunk from a live connection.
///
/// Every chunk handed out is kept, so the body can be replayed after a reset
/// as long as it was either fully read or the connection is still open.
struct ReqwestStream {
    response: Option<reqwest::Response>,
    chunks: Vec<Bytes>,
    position: usize,
    exhausted: bool,
}

impl ReqwestStream {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response: Some(response),
            chunks: Vec::new(),
            position: 0,
            exhausted: false,
        }
    }
}

#[async_trait]
impl ResponseStream for ReqwestStream {
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        if let Some(chunk) = self.chunks.get(self.position) {
            self.position += 1;
            return Ok(Some(chunk.clone()));
        }
        if self.exhausted {
            return Ok(None);
        }

        let response = self
            .response
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection already released"))?;

        match response.chunk().await {
            Ok(Some(chunk)) => {
                self.chunks.push(chunk.clone());
                self.position += 1;
                Ok(Some(chunk))
            }
            Ok(None) => {
                self.exhausted = true;
                Ok(None)
            }
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        }
    }

    fn reset(&mut self) -> io::Result<()> {
        if self.response.is_none() && !self.exhausted && !self.chunks.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection released before the body was buffered",
            ));
        }
        self.position = 0;
        Ok(())
    }

    fn release(&mut self) {
        // Dropping the response hands the connection back to the pool.
        self.response = None;
    }
}

/// Builder for configuring and creating a [`ReqwestTransport`].
#[derive(Debug, Default)]
pub struct ReqwestTransportBuilder {
    default_headers: HeaderMap,
    timeout: Option<Duration>,
}

impl ReqwestTransportBuilder {
    /// Creates a new `ReqwestTransportBuilder` with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// Headers set on an individual request take precedence.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Usage(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Usage(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the configured `ReqwestTransport`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn build(self) -> Result<ReqwestTransport> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Usage(format!("Failed to build HTTP client: {}", e)))?;

        Ok(ReqwestTransport {
            http_client,
            default_headers: self.default_headers,
            timeout: self.timeout,
        })
    }
}
