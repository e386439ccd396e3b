//! The response envelope.
//!
//! A [`ResponseEnvelope`] wraps one raw transport response. It reads the body
//! at most once, caches the resulting entity, and owns the connection until it
//! is released.
//!
//! Envelopes come in two flavours. A live envelope is backed by the
//! transport's stream. A copied envelope holds a fully buffered body and no
//! return type; it is what errors carry, so interceptors and callers can look
//! at a failed response long after its connection was handed back.

use crate::criteria::{DefaultErrorStatus, StatusCriteria};
use crate::entity::{Entity, TypeInfo};
use crate::error::ResponseFailure;
use crate::media::MediaType;
use crate::providers::ProviderRegistry;
use crate::transport::{read_to_end, BodyStream, BufferedStream, RawResponse, ResponseStream};
use crate::{Error, Result};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};
use std::any::Any;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// A response received for one call.
///
/// # Examples
///
/// ```no_run
/// use restgen::{Arg, ServiceClient};
///
/// #[derive(Debug, serde::Deserialize)]
/// struct Frob {
///     id: String,
/// }
///
/// # async fn example(client: ServiceClient) -> Result<(), restgen::Error> {
/// let mut envelope = client
///     .invoke("create_frob", vec![Arg::entity(String::from("frob"))])
///     .await?
///     .into_envelope()?;
///
/// envelope.check_failure_status().await?;
/// println!("Created in {:?}", envelope.latency());
/// if let Some(frob) = envelope.entity::<Frob>().await? {
///     println!("Created {}", frob.id);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ResponseEnvelope {
    status: StatusCode,
    headers: HeaderMap,
    stream: Option<Box<dyn ResponseStream>>,
    providers: Arc<ProviderRegistry>,
    criteria: Arc<dyn StatusCriteria>,
    entity: Option<Entity>,
    return_type: Option<TypeInfo>,
    attributed_to: Option<String>,
    latency: Duration,
    released: bool,
    copied: bool,
}

impl ResponseEnvelope {
    /// Wraps a raw response, reading bodies with `providers`.
    ///
    /// Failures are classified with [`DefaultErrorStatus`] until other
    /// criteria are attached.
    pub fn new(raw: RawResponse, providers: Arc<ProviderRegistry>) -> Self {
        Self {
            status: raw.status,
            headers: raw.headers,
            stream: Some(raw.body),
            providers,
            criteria: Arc::new(DefaultErrorStatus),
            entity: None,
            return_type: None,
            attributed_to: None,
            latency: Duration::ZERO,
            released: false,
            copied: false,
        }
    }

    pub(crate) fn with_criteria(mut self, criteria: Arc<dyn StatusCriteria>) -> Self {
        self.criteria = criteria;
        self
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn attribute_to(mut self, method: impl Into<String>) -> Self {
        self.attributed_to = Some(method.into());
        self
    }

    pub(crate) fn set_return_type(&mut self, return_type: Option<TypeInfo>) {
        self.return_type = return_type;
    }

    /// The response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Time from dispatch until the response headers arrived.
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// The media type from `Content-Type`, or `*/*` if absent or invalid.
    pub fn media_type(&self) -> MediaType {
        self.header(CONTENT_TYPE.as_str())
            .and_then(|value| MediaType::parse(value).ok())
            .unwrap_or(MediaType::WILDCARD)
    }

    /// The entity type the declaring method expects, if known.
    pub fn return_type(&self) -> Option<TypeInfo> {
        self.return_type
    }

    /// The `Service.method` this response belongs to, if known.
    pub fn attributed_to(&self) -> Option<&str> {
        self.attributed_to.as_deref()
    }

    /// Returns `true` once the connection has been released.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Returns `true` for a buffered copy made after a failure.
    pub fn is_copy(&self) -> bool {
        self.copied
    }

    /// Reads the body as a `T`.
    ///
    /// The body is read and decoded at most once; later calls return the
    /// cached value. Returns `None` for `204 No Content`.
    ///
    /// # Errors
    ///
    /// * [`Error::EntityTypeMismatch`] if the entity was already read as another type.
    /// * [`Error::NoReader`] if no reader handles this type and content type.
    /// * [`Error::DeserializationFailed`] if the reader rejects the body.
    ///
    /// The last two carry a buffered copy of this response.
    pub async fn entity<T: Any + Send + Sync>(&mut self) -> Result<Option<&T>> {
        let entity = self.read_entity(TypeInfo::of::<T>()).await?;
        Ok(entity.and_then(Entity::downcast_ref::<T>))
    }

    /// Reads the body as the method's declared entity type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] if no entity type is attached, otherwise the
    /// same errors as [`entity`](Self::entity).
    pub async fn typed_entity(&mut self) -> Result<Option<&Entity>> {
        let type_info = self.return_type.ok_or_else(|| {
            Error::Usage("No type information to extract entity with".to_string())
        })?;
        self.read_entity(type_info).await
    }

    /// Reads the body as a `T` and takes ownership of it.
    ///
    /// # Errors
    ///
    /// The same errors as [`entity`](Self::entity).
    pub async fn into_entity<T: Any + Send + Sync>(mut self) -> Result<Option<T>> {
        self.read_entity(TypeInfo::of::<T>()).await?;
        Ok(self.take_entity().and_then(|entity| entity.downcast::<T>().ok()))
    }

    pub(crate) fn take_entity(&mut self) -> Option<Entity> {
        self.entity.take()
    }

    pub(crate) async fn read_entity(&mut self, type_info: TypeInfo) -> Result<Option<&Entity>> {
        match self.entity.as_ref().map(Entity::type_info) {
            Some(cached) if cached != type_info => {
                return Err(Error::EntityTypeMismatch {
                    cached: cached.name(),
                    requested: type_info.name(),
                });
            }
            Some(_) => {}
            None => {
                if self.status == StatusCode::NO_CONTENT {
                    self.release();
                    return Ok(None);
                }
                let entity = self.unmarshal(type_info).await?;
                self.entity = Some(entity);
            }
        }
        Ok(self.entity.as_ref())
    }

    async fn unmarshal(&mut self, type_info: TypeInfo) -> Result<Entity> {
        if type_info.is::<BodyStream>() {
            // The caller streams the body and releases the connection itself.
            let stream = self.stream.take().ok_or_else(|| {
                Error::Extraction("The response stream is no longer available".to_string())
            })?;
            return Ok(Entity::new(BodyStream::new(stream)));
        }

        let media_type = self.media_type();
        let Some(reader) = self.providers.reader(type_info, &media_type) else {
            let copy = self.copy_from_error().await;
            self.release();
            return Err(Error::NoReader {
                media_type: media_type.to_string(),
                type_name: type_info.name(),
                response: Box::new(copy),
            });
        };

        let body = match self.read_body().await {
            Ok(body) => body,
            Err(e) => {
                self.release();
                return Err(e);
            }
        };

        match reader.read_from(type_info, &media_type, &self.headers, body.clone()) {
            Ok(entity) if entity.type_info() == type_info => {
                self.release();
                Ok(entity)
            }
            Ok(entity) => {
                self.release();
                Err(Error::Extraction(format!(
                    "Reader for {} produced a {}",
                    type_info,
                    entity.type_info()
                )))
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    status = self.status.as_u16(),
                    type_name = type_info.name(),
                    raw_response = %String::from_utf8_lossy(&body),
                    "Failed to deserialize response"
                );
                let copy = self.copy_with_body(body);
                self.release();
                Err(Error::DeserializationFailed {
                    type_name: type_info.name(),
                    message: e.to_string(),
                    response: Box::new(copy),
                })
            }
        }
    }

    async fn read_body(&mut self) -> Result<Bytes> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            Error::Extraction("The response stream is no longer available".to_string())
        })?;
        if let Err(e) = stream.reset() {
            tracing::debug!(error = %e, "Could not rewind response stream before reading");
        }
        Ok(read_to_end(stream.as_mut()).await?)
    }

    /// Reads the raw body from the current stream position.
    ///
    /// Does not touch the entity cache. Call [`reset_stream`](Self::reset_stream)
    /// first to read from the beginning again.
    ///
    /// # Errors
    ///
    /// Fails if the stream was handed out or the read fails.
    pub async fn bytes(&mut self) -> Result<Bytes> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            Error::Extraction("The response stream is no longer available".to_string())
        })?;
        Ok(read_to_end(stream.as_mut()).await?)
    }

    /// Reads the raw body from the current stream position as text.
    ///
    /// # Errors
    ///
    /// The same errors as [`bytes`](Self::bytes).
    pub async fn text(&mut self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Rewinds the body to its first byte.
    ///
    /// # Errors
    ///
    /// Fails if the stream was handed out or cannot be rewound.
    pub fn reset_stream(&mut self) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream.reset(),
            None => Err(io::Error::new(
                io::ErrorKind::Other,
                "the response stream was handed to the caller",
            )),
        }
    }

    /// Returns the connection to the transport.
    ///
    /// Safe to call any number of times; only the first call has an effect.
    /// Dropping the envelope releases it too.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        if let Some(stream) = self.stream.as_mut() {
            stream.release();
        }
        self.released = true;
    }

    /// Raises a [`ResponseFailure`] if the status matches the error status criteria.
    ///
    /// The failure carries a buffered copy of this response, and this
    /// envelope's connection is released.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResponseFailure`] for failing statuses.
    pub async fn check_failure_status(&mut self) -> Result<()> {
        if self.criteria.is_failure(self.status) {
            let message = format!("Error status {} returned", self.status);
            return Err(self.response_failure(message).await);
        }
        Ok(())
    }

    pub(crate) async fn response_failure(&mut self, message: String) -> Error {
        let copy = self.copy_from_error().await;
        self.release();
        Error::ResponseFailure(Box::new(ResponseFailure::new(message, copy)))
    }

    /// Buffers the whole body into a copied, type-erased envelope.
    ///
    /// A body that cannot be read is logged and copied as empty.
    pub async fn copy_from_error(&mut self) -> ResponseEnvelope {
        let body = match self.read_body().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    status = self.status.as_u16(),
                    "Could not buffer the body of a failed response"
                );
                Bytes::new()
            }
        };
        self.copy_with_body(body)
    }

    fn copy_with_body(&self, body: Bytes) -> ResponseEnvelope {
        ResponseEnvelope {
            status: self.status,
            headers: self.headers.clone(),
            stream: Some(Box::new(BufferedStream::new(body))),
            providers: self.providers.clone(),
            criteria: self.criteria.clone(),
            entity: None,
            return_type: None,
            attributed_to: self.attributed_to.clone(),
            latency: self.latency,
            released: false,
            copied: true,
        }
    }
}

impl Drop for ResponseEnvelope {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ResponseEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseEnvelope")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("entity", &self.entity)
            .field("return_type", &self.return_type)
            .field("attributed_to", &self.attributed_to)
            .field("latency", &self.latency)
            .field("released", &self.released)
            .field("copied", &self.copied)
            .finish_non_exhaustive()
    }
}
