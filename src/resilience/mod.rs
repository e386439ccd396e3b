//! Resilience wrapper: every HTTP-bound method runs as a command guarded by a
//! circuit breaker, a timeout, an isolation group and an optional fallback.
//!
//! Failures the server blames on the caller (by default a `400 Bad Request`)
//! and failures to process an otherwise successful response are passed
//! through untouched and never count against circuit health.
//!
//! # Examples
//!
//! ```no_run
//! use restgen::resilience::{CircuitBreakerConfig, Fallback, ResilientClient};
//! use restgen::transport::ReqwestTransport;
//! use restgen::{ServiceClient, ServiceDescriptor};
//! use std::time::Duration;
//!
//! # fn example(descriptor: ServiceDescriptor) -> Result<(), restgen::Error> {
//! let builder = ServiceClient::builder(descriptor)
//!     .base_url("https://api.example.com")?
//!     .transport(ReqwestTransport::new()?);
//!
//! let client = ResilientClient::builder(builder)
//!     .timeout(Duration::from_secs(2))
//!     .circuit_breaker(CircuitBreakerConfig::default().with_sleep_window(Duration::from_secs(10)))
//!     .method_fallback("name", Fallback::value(String::from("unknown")))?
//!     .build()?;
//! # let _ = client;
//! # Ok(())
//! # }
//! ```

mod breaker;
mod command;
mod metrics;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use command::{CommandError, Fallback, FailureType};
pub use metrics::{CommandMetrics, CommandRegistry, CommandState, MetricsSnapshot};

use crate::args::Arg;
use crate::client::{ClientBuilder, Invoke, Reply, ServiceClient};
use crate::{Error, Result};
use async_trait::async_trait;
use http::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Decides which failed calls are the caller's fault.
///
/// Matching errors propagate unchanged, skip the fallback and do not count
/// against the circuit breaker.
pub trait BadRequestCriteria: Send + Sync {
    /// Returns `true` if the call failed as a bad request.
    ///
    /// `status` is the status of the classified failed response, kept even
    /// when an error interceptor replaced the error. It is `None` when the
    /// call failed before a response was classified.
    fn is_bad_request(&self, status: Option<StatusCode>, error: &Error) -> bool;
}

/// A classified failure with status `400 Bad Request`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusIsBadRequest;

impl BadRequestCriteria for StatusIsBadRequest {
    fn is_bad_request(&self, status: Option<StatusCode>, _error: &Error) -> bool {
        status == Some(StatusCode::BAD_REQUEST)
    }
}

impl<F> BadRequestCriteria for F
where
    F: Fn(Option<StatusCode>, &Error) -> bool + Send + Sync,
{
    fn is_bad_request(&self, status: Option<StatusCode>, error: &Error) -> bool {
        self(status, error)
    }
}

/// Command settings for one method.
#[derive(Clone)]
pub struct CommandDescriptor {
    /// Key for circuit breaker and metrics state.
    pub command_key: String,
    /// Isolation group the concurrency limit applies to.
    pub group_key: String,
    /// Time allowed for the call.
    pub timeout: Duration,
    /// Concurrent calls allowed per isolation group.
    pub max_concurrent_requests: usize,
    /// Used when the call fails, times out, is short-circuited or rejected.
    pub fallback: Option<Fallback>,
    /// Failures exempt from circuit accounting.
    pub bad_request: Arc<dyn BadRequestCriteria>,
    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl CommandDescriptor {
    /// Creates a descriptor with default settings.
    pub fn new(command_key: impl Into<String>, group_key: impl Into<String>) -> Self {
        Self {
            command_key: command_key.into(),
            group_key: group_key.into(),
            timeout: Duration::from_secs(1),
            max_concurrent_requests: 10,
            fallback: None,
            bad_request: Arc::new(StatusIsBadRequest),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl std::fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("command_key", &self.command_key)
            .field("group_key", &self.group_key)
            .field("timeout", &self.timeout)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("fallback", &self.fallback.is_some())
            .field("circuit_breaker", &self.circuit_breaker)
            .finish_non_exhaustive()
    }
}

struct BoundCommand {
    descriptor: CommandDescriptor,
    state: Arc<CommandState>,
    group: Arc<Semaphore>,
}

/// A [`ServiceClient`] whose HTTP-bound methods run as commands.
///
/// Sub-resource locators are not wrapped; the clients they return are plain
/// [`ServiceClient`]s.
#[derive(Clone)]
pub struct ResilientClient {
    client: ServiceClient,
    commands: Arc<HashMap<String, BoundCommand>>,
}

impl ResilientClient {
    /// Wraps the client `builder` will produce.
    pub fn builder(builder: ClientBuilder) -> ResilientClientBuilder {
        ResilientClientBuilder::new(builder)
    }

    /// The wrapped client.
    pub fn inner(&self) -> &ServiceClient {
        &self.client
    }

    /// Calls a method by name.
    ///
    /// # Errors
    ///
    /// The call's own error when it fails without a fallback or is a bad
    /// request, [`Error::Command`] when the circuit is open, the group is
    /// saturated, the call times out with no fallback, or a fallback fails.
    pub async fn invoke(&self, method: &str, args: Vec<Arg>) -> Result<Reply> {
        let Some(command) = self.commands.get(method) else {
            return self.client.invoke(method, args).await;
        };

        let client = self.client.clone();
        let name = method.to_string();
        command::execute(&command.descriptor, &command.state, &command.group, async move {
            client.call(&name, args).await
        })
        .await
    }

    /// The settings a method runs with.
    pub fn command(&self, method: &str) -> Option<&CommandDescriptor> {
        self.commands.get(method).map(|c| &c.descriptor)
    }

    /// The shared circuit and metrics state of a method.
    pub fn command_state(&self, method: &str) -> Option<&Arc<CommandState>> {
        self.commands.get(method).map(|c| &c.state)
    }

    /// A snapshot of a method's counters.
    pub fn metrics(&self, method: &str) -> Option<MetricsSnapshot> {
        self.commands.get(method).map(|c| c.state.metrics().snapshot())
    }
}

#[async_trait]
impl Invoke for ResilientClient {
    async fn invoke(&self, method: &str, args: Vec<Arg>) -> Result<Reply> {
        ResilientClient::invoke(self, method, args).await
    }
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("client", &self.client)
            .field("commands", &self.commands.len())
            .finish()
    }
}

#[derive(Default)]
struct MethodOverrides {
    command_key: Option<String>,
    group_key: Option<String>,
    timeout: Option<Duration>,
    fallback: Option<Fallback>,
    bad_request: Option<Arc<dyn BadRequestCriteria>>,
    circuit_breaker: Option<CircuitBreakerConfig>,
}

/// A builder for [`ResilientClient`].
///
/// Global settings apply to every method without an override.
pub struct ResilientClientBuilder {
    client: ClientBuilder,
    group_key: Option<String>,
    timeout: Duration,
    max_concurrent_requests: usize,
    bad_request: Arc<dyn BadRequestCriteria>,
    circuit_breaker: CircuitBreakerConfig,
    registry: Option<Arc<CommandRegistry>>,
    overrides: HashMap<String, MethodOverrides>,
}

impl ResilientClientBuilder {
    /// Creates a builder with default command settings.
    pub fn new(client: ClientBuilder) -> Self {
        let defaults = CommandDescriptor::new("", "");
        Self {
            client,
            group_key: None,
            timeout: defaults.timeout,
            max_concurrent_requests: defaults.max_concurrent_requests,
            bad_request: defaults.bad_request,
            circuit_breaker: defaults.circuit_breaker,
            registry: None,
            overrides: HashMap::new(),
        }
    }

    fn method(&mut self, method: &str) -> Result<&mut MethodOverrides> {
        let descriptor = self.client.descriptor();
        match descriptor.method(method) {
            Some(m) if !m.is_sub_resource() => Ok(self.overrides.entry(method.to_string()).or_default()),
            Some(_) => Err(Error::Usage(format!(
                "{}.{} is a sub-resource locator and is not run as a command",
                descriptor.name(),
                method
            ))),
            None => Err(Error::Usage(format!(
                "{} has no method named {}",
                descriptor.name(),
                method
            ))),
        }
    }

    /// Sets the default isolation group. Defaults to the service name.
    pub fn group_key(mut self, group_key: impl Into<String>) -> Self {
        self.group_key = Some(group_key.into());
        self
    }

    /// Sets the default timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the concurrency limit of each isolation group.
    pub fn max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    /// Sets the default bad-request criteria.
    pub fn bad_request_criteria(mut self, criteria: impl BadRequestCriteria + 'static) -> Self {
        self.bad_request = Arc::new(criteria);
        self
    }

    /// Sets the default circuit breaker settings.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Uses `registry` instead of the process-wide one.
    pub fn registry(mut self, registry: Arc<CommandRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Overrides the timeout of one method.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] if the service has no such HTTP-bound method.
    /// The same holds for every other `method_*` setter.
    pub fn method_timeout(mut self, method: &str, timeout: Duration) -> Result<Self> {
        self.method(method)?.timeout = Some(timeout);
        Ok(self)
    }

    /// Sets the fallback of one method.
    pub fn method_fallback(mut self, method: &str, fallback: Fallback) -> Result<Self> {
        self.method(method)?.fallback = Some(fallback);
        Ok(self)
    }

    /// Overrides the command key of one method. Defaults to `Service.method`.
    pub fn method_command_key(mut self, method: &str, key: impl Into<String>) -> Result<Self> {
        self.method(method)?.command_key = Some(key.into());
        Ok(self)
    }

    /// Overrides the isolation group of one method.
    pub fn method_isolation_group(mut self, method: &str, group: impl Into<String>) -> Result<Self> {
        self.method(method)?.group_key = Some(group.into());
        Ok(self)
    }

    /// Overrides the bad-request criteria of one method.
    pub fn method_bad_request_criteria(
        mut self,
        method: &str,
        criteria: impl BadRequestCriteria + 'static,
    ) -> Result<Self> {
        self.method(method)?.bad_request = Some(Arc::new(criteria));
        Ok(self)
    }

    /// Overrides the circuit breaker settings of one method.
    pub fn method_circuit_breaker(mut self, method: &str, config: CircuitBreakerConfig) -> Result<Self> {
        self.method(method)?.circuit_breaker = Some(config);
        Ok(self)
    }

    /// Builds the wrapped client and one command per HTTP-bound method.
    ///
    /// # Errors
    ///
    /// Any error from [`ClientBuilder::build`].
    pub fn build(mut self) -> Result<ResilientClient> {
        let registry = self.registry.take().unwrap_or_else(CommandRegistry::global);
        let client = self.client.build()?;
        let service = client.descriptor().name().to_string();
        let default_group = self.group_key.clone().unwrap_or_else(|| service.clone());

        let mut commands = HashMap::new();
        for method in client.descriptor().methods() {
            if method.is_sub_resource() {
                continue;
            }
            let overrides = self.overrides.remove(method.name()).unwrap_or_default();
            let descriptor = CommandDescriptor {
                command_key: overrides
                    .command_key
                    .unwrap_or_else(|| format!("{}.{}", service, method.name())),
                group_key: overrides.group_key.unwrap_or_else(|| default_group.clone()),
                timeout: overrides.timeout.unwrap_or(self.timeout),
                max_concurrent_requests: self.max_concurrent_requests,
                fallback: overrides.fallback,
                bad_request: overrides.bad_request.unwrap_or_else(|| self.bad_request.clone()),
                circuit_breaker: overrides
                    .circuit_breaker
                    .unwrap_or_else(|| self.circuit_breaker.clone()),
            };

            let state = registry.command(&descriptor.command_key, &descriptor.circuit_breaker);
            let group = registry.group(&descriptor.group_key, descriptor.max_concurrent_requests);
            tracing::debug!(
                command_key = %descriptor.command_key,
                group = %descriptor.group_key,
                timeout_ms = descriptor.timeout.as_millis() as u64,
                fallback = descriptor.fallback.is_some(),
                "Registered command"
            );
            commands.insert(
                method.name().to_string(),
                BoundCommand {
                    descriptor,
                    state,
                    group,
                },
            );
        }

        Ok(ResilientClient {
            client,
            commands: Arc::new(commands),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{MethodDescriptor, ParamRole, ReturnKind, ServiceDescriptor};
    use crate::envelope::ResponseEnvelope;
    use crate::error_handler::ErrorInterceptor;
    use crate::transport::testing::{raw, CountingStream, ScriptedTransport};

    fn descriptor() -> ServiceDescriptor {
        let part = ServiceDescriptor::builder("Part")
            .method(MethodDescriptor::get("name").returns(ReturnKind::entity::<String>()))
            .build()
            .unwrap();
        ServiceDescriptor::builder("Frobs")
            .path("/frob")
            .method(
                MethodDescriptor::get("name")
                    .path("/{id}")
                    .param(ParamRole::path("id"))
                    .returns(ReturnKind::entity::<String>()),
            )
            .method(
                MethodDescriptor::new("part")
                    .path("/{id}/part")
                    .param(ParamRole::path("id"))
                    .returns(ReturnKind::sub_resource(part)),
            )
            .build()
            .unwrap()
    }

    fn builder(transport: Arc<ScriptedTransport>) -> ClientBuilder {
        ServiceClient::builder(descriptor())
            .base_url("http://localhost")
            .unwrap()
            .transport_arc(transport)
    }

    fn push(transport: &ScriptedTransport, status: u16, body: &'static str) {
        let (stream, _) = CountingStream::new(body);
        transport.push(raw(status, Some("text/plain"), stream));
    }

    #[test]
    fn test_defaults() {
        let client = ResilientClient::builder(builder(ScriptedTransport::new()))
            .registry(Arc::new(CommandRegistry::new()))
            .build()
            .unwrap();

        let command = client.command("name").unwrap();
        assert_eq!(command.command_key, "Frobs.name");
        assert_eq!(command.group_key, "Frobs");
        assert_eq!(command.timeout, Duration::from_secs(1));
        assert_eq!(command.max_concurrent_requests, 10);
        assert!(command.fallback.is_none());
        assert!(client.command("part").is_none());
    }

    #[test]
    fn test_unknown_or_locator_method_overrides_fail() {
        let result = ResilientClient::builder(builder(ScriptedTransport::new())).method_timeout("nope", Duration::ZERO);
        assert!(matches!(result, Err(Error::Usage(_))));

        let result = ResilientClient::builder(builder(ScriptedTransport::new()))
            .method_fallback("part", Fallback::value(String::new()));
        assert!(matches!(result, Err(Error::Usage(_))));
    }

    #[tokio::test]
    async fn test_bad_request_is_not_counted() {
        let transport = ScriptedTransport::new();
        push(&transport, 400, "bad id");

        let client = ResilientClient::builder(builder(transport.clone()))
            .registry(Arc::new(CommandRegistry::new()))
            .method_fallback("name", Fallback::value(String::from("fallback")))
            .unwrap()
            .build()
            .unwrap();

        let error = client.invoke("name", vec!["x".into()]).await.unwrap_err();
        assert_eq!(error.status(), Some(StatusCode::BAD_REQUEST));

        let metrics = client.metrics("name").unwrap();
        assert_eq!(metrics.bad_request, 1);
        assert_eq!(metrics.failure, 0);
        assert_eq!(metrics.fallback_success, 0);
    }

    struct Translate;

    #[async_trait]
    impl ErrorInterceptor for Translate {
        async fn handle(&self, response: &mut ResponseEnvelope) -> Result<()> {
            Err(Error::Usage(format!("rejected: {}", response.text().await?)))
        }
    }

    #[tokio::test]
    async fn test_translated_bad_request_is_not_counted() {
        let transport = ScriptedTransport::new();
        push(&transport, 400, "bad id");

        let client = ResilientClient::builder(builder(transport.clone()).error_interceptor(Translate))
            .registry(Arc::new(CommandRegistry::new()))
            .method_fallback("name", Fallback::value(String::from("fallback")))
            .unwrap()
            .build()
            .unwrap();

        let error = client.invoke("name", vec!["x".into()]).await.unwrap_err();
        assert!(matches!(&error, Error::Usage(m) if m == "rejected: bad id"));

        let metrics = client.metrics("name").unwrap();
        assert_eq!(metrics.bad_request, 1);
        assert_eq!(metrics.failure, 0);
        assert_eq!(metrics.fallback_success, 0);
    }

    #[tokio::test]
    async fn test_server_error_uses_fallback() {
        let transport = ScriptedTransport::new();
        push(&transport, 500, "down");

        let client = ResilientClient::builder(builder(transport.clone()))
            .registry(Arc::new(CommandRegistry::new()))
            .method_fallback("name", Fallback::value(String::from("fallback")))
            .unwrap()
            .build()
            .unwrap();

        let name: String = client.invoke("name", vec!["x".into()]).await.unwrap().into_entity().unwrap();
        assert_eq!(name, "fallback");
        assert_eq!(client.metrics("name").unwrap().failure, 1);
    }

    #[tokio::test]
    async fn test_custom_bad_request_criteria() {
        let transport = ScriptedTransport::new();
        push(&transport, 404, "missing");

        let client = ResilientClient::builder(builder(transport.clone()))
            .registry(Arc::new(CommandRegistry::new()))
            .method_bad_request_criteria("name", |status: Option<StatusCode>, _: &Error| {
                status == Some(StatusCode::NOT_FOUND)
            })
            .unwrap()
            .build()
            .unwrap();

        let error = client.invoke("name", vec!["x".into()]).await.unwrap_err();
        assert!(error.is_response_failure());
        assert_eq!(client.metrics("name").unwrap().bad_request, 1);
    }

    #[tokio::test]
    async fn test_sub_resource_bypasses_commands() {
        let transport = ScriptedTransport::new();
        push(&transport, 200, "widget");

        let client = ResilientClient::builder(builder(transport.clone()))
            .registry(Arc::new(CommandRegistry::new()))
            .build()
            .unwrap();

        let part = client.invoke("part", vec!["a".into()]).await.unwrap().into_client().unwrap();
        let name: String = part.invoke("name", vec![]).await.unwrap().into_entity().unwrap();
        assert_eq!(name, "widget");
        assert_eq!(
            transport.last_request().unwrap().url.as_str(),
            "http://localhost/frob/a/part"
        );
    }
}
