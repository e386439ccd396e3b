//! # Restgen - typed HTTP service clients
//!
//! Restgen turns a declarative description of an HTTP service into a working
//! client. Each method of a [`ServiceDescriptor`] is bound to a verb, a path
//! template and a list of parameter roles; invoking it builds the request,
//! negotiates body codecs, sends it through a pluggable [`transport`], classifies
//! the response and extracts a typed value.
//!
//! ## Quick Start
//!
//! ```no_run
//! use restgen::transport::ReqwestTransport;
//! use restgen::{MethodDescriptor, ParamRole, ReturnKind, ServiceClient, ServiceDescriptor};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Frob {
//!     id: String,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), restgen::Error> {
//!     let frobs = ServiceDescriptor::builder("Frobs")
//!         .path("/frob")
//!         .method(
//!             MethodDescriptor::get("get")
//!                 .path("/{id}")
//!                 .param(ParamRole::path("id"))
//!                 .returns(ReturnKind::entity::<Frob>()),
//!         )
//!         .method(
//!             MethodDescriptor::post("create")
//!                 .param(ParamRole::Body)
//!                 .returns(ReturnKind::entity::<Frob>()),
//!         )
//!         .build()?;
//!
//!     let client = ServiceClient::builder(frobs)
//!         .base_url("https://api.example.com")?
//!         .transport(ReqwestTransport::new()?)
//!         .json::<Frob>()
//!         .build()?;
//!
//!     let frob: Frob = client.invoke("get", vec!["abc".into()]).await?.into_entity()?;
//!     println!("Fetched {}", frob.name);
//!
//!     let created: Frob = client
//!         .invoke("create", vec![restgen::Arg::entity(frob)])
//!         .await?
//!         .into_entity()?;
//!     println!("Created {}", created.id);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Declarative bindings** - Query, header, cookie, path, matrix, form and body parameters
//! - **Content negotiation** - Pluggable body readers and writers chosen by type and media type
//! - **Response envelopes** - Status, headers, latency and lazily read, cached entities
//! - **Error classification** - Per-service and per-method error status criteria
//! - **Error interceptors** - Map failed responses to domain errors, each seeing a fresh body
//! - **Sub-resources** - Methods that return nested clients rooted at a sub-path
//! - **Resilience** - Circuit breaking, timeouts, isolation groups and fallbacks per method
//! - **Automatic logging** - Structured logging with `tracing`
//!
//! ## Error Handling
//!
//! Failed responses are copied before the connection is released, so they can
//! be inspected after the fact:
//!
//! ```no_run
//! use restgen::{Error, ServiceClient};
//!
//! # async fn example(client: ServiceClient) -> Result<(), Error> {
//! match client.invoke("get", vec!["abc".into()]).await {
//!     Ok(reply) => println!("Success: {:?}", reply),
//!     Err(Error::ResponseFailure(failure)) => {
//!         eprintln!("HTTP error {}: {}", failure.status(), failure.message());
//!     }
//!     Err(Error::DeserializationFailed { type_name, message, .. }) => {
//!         eprintln!("Failed to read {}: {}", type_name, message);
//!     }
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

mod args;
mod client;
mod criteria;
mod descriptor;
mod entity;
mod envelope;
mod error;
mod error_handler;
mod extract;
mod invoker;
mod marshal;
mod media;
pub mod providers;
pub mod request;
pub mod resilience;
pub mod transport;

pub use args::Arg;
pub use client::{ClientBuilder, Invoke, Reply, ServiceClient};
pub use criteria::{DefaultErrorStatus, StatusCriteria, StatusIn};
pub use descriptor::{MethodDescriptor, ParamRole, ReturnKind, ServiceDescriptor, ServiceDescriptorBuilder};
pub use entity::{Entity, TypeInfo};
pub use envelope::ResponseEnvelope;
pub use error::{Error, ResponseFailure, Result};
pub use error_handler::{ErrorHandler, ErrorInterceptor};
pub use media::MediaType;
pub use providers::{JsonProvider, MessageBodyReader, MessageBodyWriter, ProviderRegistry};
pub use resilience::ResilientClient;
