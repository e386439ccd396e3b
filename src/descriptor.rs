//! Service descriptors: the declarative description of a service interface.
//!
//! A [`ServiceDescriptor`] lists the methods of an HTTP service together with
//! their binding metadata (verb, path template, parameter roles, content types
//! and return kind). Descriptors are validated once when built and are
//! immutable afterwards; clients compile them into invokers.
//!
//! # Examples
//!
//! ```
//! use restgen::{MediaType, MethodDescriptor, ParamRole, ReturnKind, ServiceDescriptor};
//!
//! #[derive(Debug)]
//! struct Frob;
//!
//! let descriptor = ServiceDescriptor::builder("FrobResource")
//!     .path("/frob")
//!     .produces(MediaType::APPLICATION_JSON)
//!     .method(
//!         MethodDescriptor::get("find_frob")
//!             .path("{frobId}")
//!             .param(ParamRole::path("frobId"))
//!             .returns(ReturnKind::entity::<Frob>()),
//!     )
//!     .build()?;
//!
//! assert!(descriptor.method("find_frob").is_some());
//! # Ok::<(), restgen::Error>(())
//! ```

use crate::entity::TypeInfo;
use crate::media::MediaType;
use crate::{Error, Result};
use http::Method;
use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

/// The role a method parameter plays in the outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamRole {
    /// A query string parameter.
    Query(String),
    /// A request header.
    Header(String),
    /// A cookie.
    Cookie(String),
    /// A path template variable.
    Path(String),
    /// A matrix parameter on the last path segment.
    Matrix(String),
    /// A form field in an `application/x-www-form-urlencoded` body.
    Form(String),
    /// The request body.
    Body,
}

impl ParamRole {
    /// A query string parameter.
    pub fn query(name: impl Into<String>) -> Self {
        ParamRole::Query(name.into())
    }

    /// A request header.
    pub fn header(name: impl Into<String>) -> Self {
        ParamRole::Header(name.into())
    }

    /// A cookie.
    pub fn cookie(name: impl Into<String>) -> Self {
        ParamRole::Cookie(name.into())
    }

    /// A path template variable.
    pub fn path(name: impl Into<String>) -> Self {
        ParamRole::Path(name.into())
    }

    /// A matrix parameter.
    pub fn matrix(name: impl Into<String>) -> Self {
        ParamRole::Matrix(name.into())
    }

    /// A form field.
    pub fn form(name: impl Into<String>) -> Self {
        ParamRole::Form(name.into())
    }
}

/// What a method hands back to its caller.
#[derive(Debug, Clone)]
pub enum ReturnKind {
    /// Nothing. The status is still classified.
    Unit,
    /// The HTTP status code.
    Status,
    /// The raw [`ResponseEnvelope`](crate::ResponseEnvelope), optionally tagged
    /// with the entity type the caller expects to read from it.
    Envelope(Option<TypeInfo>),
    /// An unmarshalled body of the given type.
    Entity(TypeInfo),
    /// A client for a nested service rooted below this one.
    SubResource(Arc<ServiceDescriptor>),
}

impl ReturnKind {
    /// An unmarshalled body of type `T`.
    pub fn entity<T: Any>() -> Self {
        ReturnKind::Entity(TypeInfo::of::<T>())
    }

    /// The raw envelope with no entity type attached.
    pub fn envelope() -> Self {
        ReturnKind::Envelope(None)
    }

    /// The raw envelope, tagged with the entity type `T`.
    pub fn envelope_of<T: Any>() -> Self {
        ReturnKind::Envelope(Some(TypeInfo::of::<T>()))
    }

    /// A nested service client.
    pub fn sub_resource(descriptor: ServiceDescriptor) -> Self {
        ReturnKind::SubResource(Arc::new(descriptor))
    }
}

/// Binding metadata for one service method.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    name: String,
    verbs: Vec<Method>,
    path: Option<String>,
    params: Vec<ParamRole>,
    produces: Option<MediaType>,
    consumes: Option<MediaType>,
    returns: ReturnKind,
}

impl MethodDescriptor {
    /// Starts a method with no verb binding.
    ///
    /// Use [`verb`](Self::verb) to bind one, or leave it unbound for a
    /// sub-resource factory.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verbs: Vec::new(),
            path: None,
            params: Vec::new(),
            produces: None,
            consumes: None,
            returns: ReturnKind::Unit,
        }
    }

    /// A `GET` method.
    pub fn get(name: impl Into<String>) -> Self {
        Self::new(name).verb(Method::GET)
    }

    /// A `POST` method.
    pub fn post(name: impl Into<String>) -> Self {
        Self::new(name).verb(Method::POST)
    }

    /// A `PUT` method.
    pub fn put(name: impl Into<String>) -> Self {
        Self::new(name).verb(Method::PUT)
    }

    /// A `DELETE` method.
    pub fn delete(name: impl Into<String>) -> Self {
        Self::new(name).verb(Method::DELETE)
    }

    /// A `PATCH` method.
    pub fn patch(name: impl Into<String>) -> Self {
        Self::new(name).verb(Method::PATCH)
    }

    /// A `HEAD` method.
    pub fn head(name: impl Into<String>) -> Self {
        Self::new(name).verb(Method::HEAD)
    }

    /// An `OPTIONS` method.
    pub fn options(name: impl Into<String>) -> Self {
        Self::new(name).verb(Method::OPTIONS)
    }

    /// Adds a verb binding. A method must end up with exactly one.
    pub fn verb(mut self, verb: Method) -> Self {
        self.verbs.push(verb);
        self
    }

    /// Sets the path template, relative to the service path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Appends the next parameter.
    pub fn param(mut self, role: ParamRole) -> Self {
        self.params.push(role);
        self
    }

    /// Sets the produced media type, sent as the `Accept` header.
    pub fn produces(mut self, media_type: MediaType) -> Self {
        self.produces = Some(media_type);
        self
    }

    /// Sets the consumed media type, used for the request body.
    pub fn consumes(mut self, media_type: MediaType) -> Self {
        self.consumes = Some(media_type);
        self
    }

    /// Sets the return kind. Defaults to [`ReturnKind::Unit`].
    pub fn returns(mut self, returns: ReturnKind) -> Self {
        self.returns = returns;
        self
    }

    /// The method name, which is also its identity within the service.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The verb binding. Only `None` for sub-resource factories.
    pub fn verb_binding(&self) -> Option<&Method> {
        self.verbs.first()
    }

    /// The path template, if any.
    pub fn path_template(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// The parameter roles in declaration order.
    pub fn params(&self) -> &[ParamRole] {
        &self.params
    }

    /// The declared produced media type.
    pub fn produced(&self) -> Option<&MediaType> {
        self.produces.as_ref()
    }

    /// The declared consumed media type.
    pub fn consumed(&self) -> Option<&MediaType> {
        self.consumes.as_ref()
    }

    /// The return kind.
    pub fn return_kind(&self) -> &ReturnKind {
        &self.returns
    }

    /// Returns `true` if invoking this method yields a nested client instead of an HTTP call.
    pub fn is_sub_resource(&self) -> bool {
        matches!(self.returns, ReturnKind::SubResource(_))
    }

    fn validate(&self, service: &str) -> Result<()> {
        if self.is_sub_resource() {
            if !self.verbs.is_empty() {
                return Err(Error::Usage(format!(
                    "Sub-resource method {}.{} cannot have an http method binding",
                    service, self.name
                )));
            }
            if self.path.is_none() {
                return Err(Error::Usage(format!(
                    "Sub-resource method {}.{} must have a path binding",
                    service, self.name
                )));
            }
            return Ok(());
        }

        if self.verbs.len() != 1 {
            return Err(Error::Usage(format!(
                "You must use at least one, but no more than one http method binding on: {}.{}",
                service, self.name
            )));
        }
        Ok(())
    }
}

/// Validated metadata for a service interface.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    name: String,
    path: Option<String>,
    produces: Option<MediaType>,
    consumes: Option<MediaType>,
    methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    /// Starts describing a service. The name prefixes command keys and diagnostics.
    pub fn builder(name: impl Into<String>) -> ServiceDescriptorBuilder {
        ServiceDescriptorBuilder {
            name: name.into(),
            path: None,
            produces: None,
            consumes: None,
            methods: Vec::new(),
        }
    }

    /// The service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The service-level path, prepended to every method path.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// The service-level default produced media type.
    pub fn produces(&self) -> Option<&MediaType> {
        self.produces.as_ref()
    }

    /// The service-level default consumed media type.
    pub fn consumes(&self) -> Option<&MediaType> {
        self.consumes.as_ref()
    }

    /// All methods in declaration order.
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    /// Looks up a method by name.
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// Builder for [`ServiceDescriptor`].
#[derive(Debug)]
pub struct ServiceDescriptorBuilder {
    name: String,
    path: Option<String>,
    produces: Option<MediaType>,
    consumes: Option<MediaType>,
    methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptorBuilder {
    /// Sets the service path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the default produced media type for methods that declare none.
    pub fn produces(mut self, media_type: MediaType) -> Self {
        self.produces = Some(media_type);
        self
    }

    /// Sets the default consumed media type for methods that declare none.
    pub fn consumes(mut self, media_type: MediaType) -> Self {
        self.consumes = Some(media_type);
        self
    }

    /// Adds a method.
    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    /// Validates and builds the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] if a method has no verb or more than one verb
    /// (sub-resource factories excepted), if a sub-resource factory has no path,
    /// or if two methods share a name.
    pub fn build(self) -> Result<ServiceDescriptor> {
        let mut seen = HashSet::new();
        for method in &self.methods {
            if !seen.insert(method.name.as_str()) {
                return Err(Error::Usage(format!(
                    "Duplicate method {} on {}",
                    method.name, self.name
                )));
            }
            method.validate(&self.name)?;
        }

        Ok(ServiceDescriptor {
            name: self.name,
            path: self.path,
            produces: self.produces,
            consumes: self.consumes,
            methods: self.methods,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child() -> ServiceDescriptor {
        ServiceDescriptor::builder("Part")
            .method(MethodDescriptor::get("name").returns(ReturnKind::entity::<String>()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_rejects_method_without_verb() {
        let result = ServiceDescriptor::builder("Frob")
            .method(MethodDescriptor::new("find"))
            .build();

        match result {
            Err(Error::Usage(message)) => assert!(message.contains("Frob.find")),
            other => panic!("Expected usage error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_method_with_two_verbs() {
        let result = ServiceDescriptor::builder("Frob")
            .method(MethodDescriptor::get("find").verb(Method::POST))
            .build();
        assert!(matches!(result, Err(Error::Usage(_))));
    }

    #[test]
    fn test_rejects_duplicate_method_names() {
        let result = ServiceDescriptor::builder("Frob")
            .method(MethodDescriptor::get("find"))
            .method(MethodDescriptor::delete("find"))
            .build();
        assert!(matches!(result, Err(Error::Usage(_))));
    }

    #[test]
    fn test_sub_resource_needs_path_and_no_verb() {
        let ok = ServiceDescriptor::builder("Frob")
            .method(
                MethodDescriptor::new("part")
                    .path("{id}/part")
                    .param(ParamRole::path("id"))
                    .returns(ReturnKind::sub_resource(child())),
            )
            .build();
        assert!(ok.is_ok());

        let no_path = ServiceDescriptor::builder("Frob")
            .method(MethodDescriptor::new("part").returns(ReturnKind::sub_resource(child())))
            .build();
        assert!(matches!(no_path, Err(Error::Usage(_))));

        let with_verb = ServiceDescriptor::builder("Frob")
            .method(
                MethodDescriptor::get("part")
                    .path("part")
                    .returns(ReturnKind::sub_resource(child())),
            )
            .build();
        assert!(matches!(with_verb, Err(Error::Usage(_))));
    }
}
