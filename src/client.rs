//! Typed service clients.
//!
//! A [`ServiceClient`] is built from a [`ServiceDescriptor`] and dispatches
//! each call to the invoker compiled for that method. Use [`ClientBuilder`] to
//! configure the transport, codecs, interceptors and error status criteria.

use crate::args::Arg;
use crate::criteria::{DefaultErrorStatus, StatusCriteria};
use crate::descriptor::ServiceDescriptor;
use crate::entity::{Entity, TypeInfo};
use crate::envelope::ResponseEnvelope;
use crate::error::CallFailure;
use crate::error_handler::{ErrorHandler, ErrorInterceptor};
use crate::invoker::{BoundService, CriteriaTable, InvocationConfig};
use crate::providers::{JsonProvider, MessageBodyReader, MessageBodyWriter, ProviderRegistry};
use crate::request::RequestFilter;
use crate::transport::Transport;
use crate::{Error, Result};
use async_trait::async_trait;
use http::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// A client for one service interface.
///
/// Cloning is cheap; clones share the compiled bindings and the transport.
///
/// # Examples
///
/// ```no_run
/// use restgen::transport::ReqwestTransport;
/// use restgen::{MethodDescriptor, ParamRole, ReturnKind, ServiceClient, ServiceDescriptor};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Frob {
///     id: String,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), restgen::Error> {
/// let descriptor = ServiceDescriptor::builder("Frobs")
///     .path("/frob")
///     .method(
///         MethodDescriptor::get("get_frob")
///             .path("/{id}")
///             .param(ParamRole::path("id"))
///             .returns(ReturnKind::entity::<Frob>()),
///     )
///     .build()?;
///
/// let client = ServiceClient::builder(descriptor)
///     .base_url("https://api.example.com")?
///     .transport(ReqwestTransport::new()?)
///     .json::<Frob>()
///     .build()?;
///
/// let frob: Frob = client
///     .invoke("get_frob", vec!["abc".into()])
///     .await?
///     .into_entity()?;
/// println!("Frob: {}", frob.name);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    base_url: String,
    service: Arc<BoundService>,
}

impl ServiceClient {
    /// Creates a `ClientBuilder` for the given service.
    pub fn builder(descriptor: impl Into<Arc<ServiceDescriptor>>) -> ClientBuilder {
        ClientBuilder::new(descriptor.into())
    }

    pub(crate) fn bound(base_url: String, service: Arc<BoundService>) -> Self {
        Self {
            inner: Arc::new(ClientInner { base_url, service }),
        }
    }

    /// The base URL every request path is resolved against.
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// The service this client was built for.
    pub fn descriptor(&self) -> &ServiceDescriptor {
        self.inner.service.descriptor()
    }

    /// Calls a method by name with one argument per declared parameter.
    ///
    /// # Errors
    ///
    /// * [`Error::Usage`] for unknown methods, a wrong argument count or
    ///   arguments that cannot be marshalled.
    /// * [`Error::ResponseFailure`] (or whatever an error interceptor raises)
    ///   when the response status is classified as a failure.
    /// * Transport, codec and extraction errors as they occur.
    pub async fn invoke(&self, method: &str, args: Vec<Arg>) -> Result<Reply> {
        self.call(method, args).await.map_err(|failure| failure.error)
    }

    /// Like [`invoke`](Self::invoke), keeping the status of a classified
    /// failure that an interceptor may have replaced.
    pub(crate) async fn call(&self, method: &str, args: Vec<Arg>) -> std::result::Result<Reply, CallFailure> {
        self.inner
            .service
            .invoke(&self.inner.base_url, method, args)
            .await
    }
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("service", &self.descriptor().name())
            .field("base_url", &self.inner.base_url)
            .finish()
    }
}

/// Something that can call service methods by name.
///
/// Implemented by [`ServiceClient`] and
/// [`ResilientClient`](crate::resilience::ResilientClient), so hand-written
/// typed facades can sit on top of either.
///
/// # Examples
///
/// ```
/// use restgen::{Invoke, Result};
///
/// struct Frobs<C>(C);
///
/// impl<C: Invoke> Frobs<C> {
///     async fn name(&self, id: &str) -> Result<String> {
///         self.0.invoke("name", vec![id.into()]).await?.into_entity()
///     }
/// }
/// ```
#[async_trait]
pub trait Invoke: Send + Sync {
    /// Calls `method` with `args`.
    async fn invoke(&self, method: &str, args: Vec<Arg>) -> Result<Reply>;
}

#[async_trait]
impl Invoke for ServiceClient {
    async fn invoke(&self, method: &str, args: Vec<Arg>) -> Result<Reply> {
        ServiceClient::invoke(self, method, args).await
    }
}

/// The result of a call, shaped by the method's declared return kind.
#[derive(Debug)]
pub enum Reply {
    /// The method returns nothing.
    Unit,
    /// The response status.
    Status(StatusCode),
    /// The live response, unclassified.
    Envelope(ResponseEnvelope),
    /// The decoded body.
    Entity(Entity),
    /// The method returns an entity but the response was `204 No Content`.
    NoContent,
    /// A client for a sub-resource.
    Client(ServiceClient),
}

impl Reply {
    /// Wraps a value as an entity reply, e.g. for fallbacks.
    pub fn entity<T: Any + Send + Sync>(value: T) -> Self {
        Reply::Entity(Entity::new(value))
    }

    fn kind(&self) -> &'static str {
        match self {
            Reply::Unit => "unit",
            Reply::Status(_) => "status",
            Reply::Envelope(_) => "envelope",
            Reply::Entity(_) => "entity",
            Reply::NoContent => "no content",
            Reply::Client(_) => "client",
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        Error::Usage(format!("Expected a {} reply, got {}", expected, self.kind()))
    }

    /// The decoded body as a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntityTypeMismatch`] if the body is another type,
    /// [`Error::Extraction`] for `204 No Content` and [`Error::Usage`] for
    /// non-entity replies.
    pub fn into_entity<T: Any>(self) -> Result<T> {
        match self {
            Reply::Entity(entity) => entity.downcast::<T>().map_err(|entity| Error::EntityTypeMismatch {
                cached: entity.type_info().name(),
                requested: TypeInfo::of::<T>().name(),
            }),
            Reply::NoContent => Err(Error::Extraction(
                "The response had no content".to_string(),
            )),
            other => Err(other.unexpected("entity")),
        }
    }

    /// The decoded body as a `T`, or `None` for `204 No Content`.
    ///
    /// # Errors
    ///
    /// The same errors as [`into_entity`](Self::into_entity), except for `204`.
    pub fn into_optional<T: Any>(self) -> Result<Option<T>> {
        match self {
            Reply::NoContent => Ok(None),
            other => other.into_entity().map(Some),
        }
    }

    /// The response status.
    pub fn into_status(self) -> Result<StatusCode> {
        match self {
            Reply::Status(status) => Ok(status),
            other => Err(other.unexpected("status")),
        }
    }

    /// The response envelope.
    pub fn into_envelope(self) -> Result<ResponseEnvelope> {
        match self {
            Reply::Envelope(envelope) => Ok(envelope),
            other => Err(other.unexpected("envelope")),
        }
    }

    /// The sub-resource client.
    pub fn into_client(self) -> Result<ServiceClient> {
        match self {
            Reply::Client(client) => Ok(client),
            other => Err(other.unexpected("client")),
        }
    }

    /// Checks that the method returned nothing.
    pub fn into_unit(self) -> Result<()> {
        match self {
            Reply::Unit => Ok(()),
            other => Err(other.unexpected("unit")),
        }
    }
}

/// A builder for configuring and creating a [`ServiceClient`].
///
/// # Examples
///
/// ```no_run
/// use restgen::transport::ReqwestTransport;
/// use restgen::{ServiceClient, ServiceDescriptor};
/// use http::StatusCode;
/// use std::time::Duration;
///
/// # fn example(descriptor: ServiceDescriptor) -> Result<(), restgen::Error> {
/// let transport = ReqwestTransport::builder()
///     .timeout(Duration::from_secs(30))
///     .default_header("User-Agent", "frob-client/1.0")?
///     .build()?;
///
/// let client = ServiceClient::builder(descriptor)
///     .base_url("https://api.example.com")?
///     .transport(transport)
///     // Only server errors raise; 4xx bodies are read like any other.
///     .error_status_criteria(|status: StatusCode| status.is_server_error())
///     .request_filter(|request: &mut restgen::request::ClientRequest| -> restgen::Result<()> {
///         request.header("X-Request-Source", "batch")?;
///         Ok(())
///     })
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    descriptor: Arc<ServiceDescriptor>,
    base_url: Option<Url>,
    transport: Option<Arc<dyn Transport>>,
    providers: ProviderRegistry,
    interceptors: Vec<Arc<dyn ErrorInterceptor>>,
    filters: Vec<Arc<dyn RequestFilter>>,
    criteria: Arc<dyn StatusCriteria>,
    method_criteria: HashMap<String, Arc<dyn StatusCriteria>>,
}

impl ClientBuilder {
    /// Creates a builder with the builtin codecs and default error status criteria.
    pub fn new(descriptor: Arc<ServiceDescriptor>) -> Self {
        Self {
            descriptor,
            base_url: None,
            transport: None,
            providers: ProviderRegistry::new(),
            interceptors: Vec::new(),
            filters: Vec::new(),
            criteria: Arc::new(DefaultErrorStatus),
            method_criteria: HashMap::new(),
        }
    }

    /// The service being built.
    pub fn descriptor(&self) -> &Arc<ServiceDescriptor> {
        &self.descriptor
    }

    /// Sets the base URL for all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Sets the transport requests are executed with.
    pub fn transport(self, transport: impl Transport + 'static) -> Self {
        self.transport_arc(Arc::new(transport))
    }

    /// Sets a shared transport.
    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the provider registry.
    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    /// Registers a body reader.
    pub fn register_reader(mut self, reader: impl MessageBodyReader + 'static) -> Self {
        self.providers.register_reader(Arc::new(reader));
        self
    }

    /// Registers a body writer.
    pub fn register_writer(mut self, writer: impl MessageBodyWriter + 'static) -> Self {
        self.providers.register_writer(Arc::new(writer));
        self
    }

    /// Registers a provider that both reads and writes.
    pub fn register_provider<P>(mut self, provider: P) -> Self
    where
        P: MessageBodyReader + MessageBodyWriter + 'static,
    {
        self.providers.register(provider);
        self
    }

    /// Registers JSON reading and writing for `T`.
    pub fn json<T>(self) -> Self
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
    {
        self.register_provider(JsonProvider::<T>::new())
    }

    /// Appends an error interceptor. Interceptors run in registration order.
    pub fn error_interceptor(mut self, interceptor: impl ErrorInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Appends a request filter. Filters run in registration order.
    pub fn request_filter(mut self, filter: impl RequestFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Sets the error status criteria for every method without an override.
    pub fn error_status_criteria(mut self, criteria: impl StatusCriteria + 'static) -> Self {
        self.criteria = Arc::new(criteria);
        self
    }

    /// Overrides the error status criteria for one method.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] if the service has no such method.
    pub fn method_error_status_criteria(
        mut self,
        method: &str,
        criteria: impl StatusCriteria + 'static,
    ) -> Result<Self> {
        if self.descriptor.method(method).is_none() {
            return Err(Error::Usage(format!(
                "{} has no method named {}",
                self.descriptor.name(),
                method
            )));
        }
        self.method_criteria.insert(method.to_string(), Arc::new(criteria));
        Ok(self)
    }

    /// Compiles every method and builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] if the base URL or transport is missing, if no
    /// reader or writer is registered, or if a method declaration cannot be
    /// bound.
    pub fn build(self) -> Result<ServiceClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Usage("You have not specified a base URL".to_string()))?;
        let transport = self
            .transport
            .ok_or_else(|| Error::Usage("You must provide a transport".to_string()))?;
        if !self.providers.has_readers() {
            return Err(Error::Usage("No message body readers are registered".to_string()));
        }
        if !self.providers.has_writers() {
            return Err(Error::Usage("No message body writers are registered".to_string()));
        }

        let config = Arc::new(InvocationConfig {
            transport,
            providers: Arc::new(self.providers),
            error_handler: ErrorHandler::new(self.interceptors),
            filters: self.filters,
        });
        let criteria = CriteriaTable {
            global: self.criteria,
            per_method: self.method_criteria,
        };
        let service = BoundService::compile(self.descriptor, config, &criteria)?;

        Ok(ServiceClient::bound(base_url.to_string(), Arc::new(service)))
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("service", &self.descriptor.name())
            .field("base_url", &self.base_url)
            .field("providers", &self.providers)
            .field("interceptors", &self.interceptors.len())
            .field("filters", &self.filters.len())
            .finish_non_exhaustive()
    }
}
