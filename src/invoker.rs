//! The method binding table.
//!
//! Everything that depends on a method's declaration (marshallers, accepted
//! media type, extractor, error status criteria) is compiled once when the
//! client is built. A call only looks up its binding by name and runs it.

use crate::args::Arg;
use crate::client::{Reply, ServiceClient};
use crate::criteria::StatusCriteria;
use crate::descriptor::{MethodDescriptor, ParamRole, ReturnKind, ServiceDescriptor};
use crate::envelope::ResponseEnvelope;
use crate::error::CallFailure;
use crate::error_handler::ErrorHandler;
use crate::extract::Extractor;
use crate::marshal::Marshaller;
use crate::media::MediaType;
use crate::providers::ProviderRegistry;
use crate::request::{encode_path_value, join_path, resolve_template, ClientRequest, RequestFilter};
use crate::transport::Transport;
use crate::{Error, Result};
use http::Method;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Configuration shared by every invoker of a client and its sub-resources.
pub(crate) struct InvocationConfig {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) providers: Arc<ProviderRegistry>,
    pub(crate) error_handler: ErrorHandler,
    pub(crate) filters: Vec<Arc<dyn RequestFilter>>,
}

/// Error status criteria, global and per method name.
#[derive(Clone)]
pub(crate) struct CriteriaTable {
    pub(crate) global: Arc<dyn StatusCriteria>,
    pub(crate) per_method: HashMap<String, Arc<dyn StatusCriteria>>,
}

impl CriteriaTable {
    fn for_method(&self, name: &str) -> Arc<dyn StatusCriteria> {
        self.per_method
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.global.clone())
    }

    /// Sub-resources only inherit the global criteria.
    fn global_only(&self) -> Self {
        Self {
            global: self.global.clone(),
            per_method: HashMap::new(),
        }
    }
}

/// Executes one HTTP-bound method.
pub(crate) struct Invoker {
    name: String,
    verb: Method,
    path: String,
    marshallers: Vec<Marshaller>,
    accept: MediaType,
    extractor: Extractor,
    criteria: Arc<dyn StatusCriteria>,
}

impl Invoker {
    fn compile(
        service: &ServiceDescriptor,
        method: &MethodDescriptor,
        extractor: Extractor,
        criteria: Arc<dyn StatusCriteria>,
    ) -> Result<Self> {
        let name = format!("{}.{}", service.name(), method.name());
        let verb = method.verb_binding().cloned().ok_or_else(|| {
            Error::Usage(format!(
                "You must use at least one, but no more than one http method binding on: {}",
                name
            ))
        })?;

        let consumes = method
            .consumed()
            .or(service.consumes())
            .cloned()
            .unwrap_or(MediaType::APPLICATION_JSON);
        let accept = method
            .produced()
            .or(service.produces())
            .cloned()
            .unwrap_or(MediaType::APPLICATION_JSON);

        let marshallers = method
            .params()
            .iter()
            .map(|role| Marshaller::compile(role, &consumes))
            .collect::<Result<Vec<_>>>()?;

        let bodies = marshallers.iter().filter(|m| m.is_body()).count();
        if bodies > 1 {
            return Err(Error::Usage(format!(
                "{} declares more than one entity body parameter",
                name
            )));
        }
        if bodies == 1 && marshallers.iter().any(Marshaller::is_form) {
            return Err(Error::Usage(format!(
                "You cannot send both form parameters and an entity body on {}",
                name
            )));
        }

        let path = join_path(service.path().unwrap_or(""), method.path_template().unwrap_or(""));

        Ok(Self {
            name,
            verb,
            path,
            marshallers,
            accept,
            extractor,
            criteria,
        })
    }

    pub(crate) async fn invoke(
        &self,
        base_url: &str,
        config: &InvocationConfig,
        args: Vec<Arg>,
    ) -> std::result::Result<Reply, CallFailure> {
        if args.len() != self.marshallers.len() {
            return Err(Error::Usage(format!(
                "{} takes {} arguments but {} were supplied",
                self.name,
                self.marshallers.len(),
                args.len()
            ))
            .into());
        }

        let wire = {
            let mut request = ClientRequest::new(self.verb.clone(), join_path(base_url, &self.path));
            request.accept(&self.accept);
            for (marshaller, arg) in self.marshallers.iter().zip(args) {
                marshaller.build(&mut request, arg)?;
            }
            for filter in &config.filters {
                filter.filter(&mut request)?;
            }
            request.to_wire(&config.providers)?
        };

        let method = wire.method.clone();
        let url = wire.url.clone();
        let start = Instant::now();
        let raw = match config.transport.execute(wire).await {
            Ok(raw) => raw,
            Err(e) => return Err(config.error_handler.handle_call(e, None).await),
        };
        let latency = start.elapsed();

        tracing::info!(
            invoker = %self.name,
            method = %method,
            url = %url,
            status = raw.status.as_u16(),
            latency_ms = latency.as_millis() as u64,
            "Received HTTP response"
        );

        let envelope = ResponseEnvelope::new(raw, config.providers.clone())
            .with_criteria(self.criteria.clone())
            .with_latency(latency)
            .attribute_to(self.name.as_str());

        self.extractor.extract(envelope, &config.error_handler).await
    }
}

/// Produces a client for a nested resource instead of making a call.
pub(crate) struct SubResourceInvoker {
    name: String,
    path: String,
    params: Vec<String>,
    child: Arc<BoundService>,
}

impl SubResourceInvoker {
    fn compile(service: &ServiceDescriptor, method: &MethodDescriptor, child: Arc<BoundService>) -> Result<Self> {
        let name = format!("{}.{}", service.name(), method.name());
        let params = method
            .params()
            .iter()
            .map(|role| match role {
                ParamRole::Path(param) => Ok(param.clone()),
                other => Err(Error::Usage(format!(
                    "Sub-resource locator {} only takes path parameters, found {:?}",
                    name, other
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        let path = join_path(service.path().unwrap_or(""), method.path_template().unwrap_or(""));

        Ok(Self {
            name,
            path,
            params,
            child,
        })
    }

    fn invoke(&self, base_url: &str, args: Vec<Arg>) -> Result<Reply> {
        if args.len() != self.params.len() {
            return Err(Error::Usage(format!(
                "{} takes {} arguments but {} were supplied",
                self.name,
                self.params.len(),
                args.len()
            )));
        }

        let values: HashMap<&str, String> = self
            .params
            .iter()
            .map(String::as_str)
            .zip(args.iter().map(|arg| arg.first_value().map(encode_path_value)))
            .filter_map(|(name, value)| value.map(|v| (name, v)))
            .collect();
        let path = resolve_template(&self.path, |name| values.get(name).cloned())?;
        let child_base = join_path(base_url, &path);

        tracing::debug!(locator = %self.name, base_url = %child_base, "Created sub-resource client");
        Ok(Reply::Client(ServiceClient::bound(child_base, self.child.clone())))
    }
}

pub(crate) enum Binding {
    Http(Invoker),
    SubResource(SubResourceInvoker),
}

/// A compiled service: one binding per method.
pub(crate) struct BoundService {
    descriptor: Arc<ServiceDescriptor>,
    bindings: Vec<Binding>,
    index: HashMap<String, usize>,
    config: Arc<InvocationConfig>,
}

impl BoundService {
    pub(crate) fn compile(
        descriptor: Arc<ServiceDescriptor>,
        config: Arc<InvocationConfig>,
        criteria: &CriteriaTable,
    ) -> Result<Self> {
        let mut bindings = Vec::with_capacity(descriptor.methods().len());
        let mut index = HashMap::new();

        for method in descriptor.methods() {
            let binding = match method.return_kind() {
                ReturnKind::SubResource(child) => {
                    let child = BoundService::compile(child.clone(), config.clone(), &criteria.global_only())?;
                    Binding::SubResource(SubResourceInvoker::compile(&descriptor, method, Arc::new(child))?)
                }
                kind => {
                    let extractor = Extractor::for_return(kind).ok_or_else(|| {
                        Error::Usage(format!("No extractor for {}.{}", descriptor.name(), method.name()))
                    })?;
                    Binding::Http(Invoker::compile(
                        &descriptor,
                        method,
                        extractor,
                        criteria.for_method(method.name()),
                    )?)
                }
            };
            index.insert(method.name().to_string(), bindings.len());
            bindings.push(binding);
        }

        tracing::debug!(
            service = %descriptor.name(),
            methods = bindings.len(),
            "Compiled service bindings"
        );

        Ok(Self {
            descriptor,
            bindings,
            index,
            config,
        })
    }

    pub(crate) fn descriptor(&self) -> &Arc<ServiceDescriptor> {
        &self.descriptor
    }

    pub(crate) fn binding(&self, method: &str) -> Option<&Binding> {
        self.index.get(method).map(|&i| &self.bindings[i])
    }

    pub(crate) async fn invoke(
        &self,
        base_url: &str,
        method: &str,
        args: Vec<Arg>,
    ) -> std::result::Result<Reply, CallFailure> {
        match self.binding(method) {
            Some(Binding::Http(invoker)) => invoker.invoke(base_url, &self.config, args).await,
            Some(Binding::SubResource(locator)) => Ok(locator.invoke(base_url, args)?),
            None => Err(Error::Usage(format!(
                "{} has no method named {}",
                self.descriptor.name(),
                method
            ))
            .into()),
        }
    }
}
