//! Error types for service client calls.
//!
//! Errors fall into a few families, and which family an error belongs to
//! decides how the rest of the pipeline treats it:
//!
//! * **Usage errors** ([`Error::Usage`]) come from invalid descriptors,
//!   conflicting parameter roles or missing configuration.
//! * **Transport errors** ([`Error::Network`], [`Error::Transport`],
//!   [`Error::Timeout`]) never reach error interceptors.
//! * **Classified HTTP failures** ([`Error::ResponseFailure`]) are responses
//!   whose status matched the method's error status criteria. They are the
//!   only errors error interceptors see.
//! * **Local extraction errors** ([`Error::NoReader`],
//!   [`Error::DeserializationFailed`], ...) happen while turning a response
//!   into a value.
//! * **Resilience failures** ([`Error::Command`]) come from the circuit
//!   breaker layer.

use crate::envelope::ResponseEnvelope;
use crate::resilience::CommandError;
use http::StatusCode;

/// The main error type for service client calls.
///
/// # Examples
///
/// ```no_run
/// use restgen::{Arg, Error, ServiceClient};
///
/// # async fn example(client: ServiceClient) -> Result<(), Error> {
/// match client.invoke("find_frob", vec![Arg::from("abc")]).await {
///     Ok(reply) => println!("Found: {:?}", reply),
///     Err(Error::ResponseFailure(mut failure)) => {
///         let body = failure.response_mut().text().await?;
///         eprintln!("{}: {}", failure, body);
///     }
///     Err(Error::DeserializationFailed { type_name, message, .. }) => {
///         eprintln!("Could not read a {}: {}", type_name, message);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The client, a descriptor or a request was configured incorrectly.
    ///
    /// Raised while building clients and while constructing requests, always
    /// before anything is sent.
    #[error("Usage error: {0}")]
    Usage(String),

    /// A network-level error from the reqwest transport.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A transport-level error from any other transport.
    #[error("Transport error: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync>),

    /// The transport timed out.
    #[error("Request timed out")]
    Timeout,

    /// The response status matched the method's error status criteria.
    ///
    /// Carries a copied, fully buffered envelope so that the status, headers
    /// and body can be inspected after the connection has been released.
    #[error("{0}")]
    ResponseFailure(Box<ResponseFailure>),

    /// No registered reader accepts the response's content type for the requested type.
    #[error("Unable to find a MessageBodyReader of content-type {media_type} and type {type_name}")]
    NoReader {
        /// The response content type.
        media_type: String,
        /// The requested type.
        type_name: &'static str,
        /// A copy of the response.
        response: Box<ResponseEnvelope>,
    },

    /// No registered writer accepts the request body's type and content type.
    #[error("could not find writer for content-type {media_type} type: {type_name}")]
    NoWriter {
        /// The request content type.
        media_type: String,
        /// The body type.
        type_name: &'static str,
    },

    /// A reader accepted the response but failed to decode it.
    ///
    /// The copied response still holds the raw body for debugging.
    #[error("Failed to deserialize {type_name} (status {}): {message}", .response.status())]
    DeserializationFailed {
        /// The requested type.
        type_name: &'static str,
        /// The reader's error message.
        message: String,
        /// A copy of the response.
        response: Box<ResponseEnvelope>,
    },

    /// A writer failed to encode the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// The envelope's entity was already read as a different type.
    #[error("The entity was already read as {cached} and cannot be read as {requested}")]
    EntityTypeMismatch {
        /// The type the entity was first read as.
        cached: &'static str,
        /// The type requested now.
        requested: &'static str,
    },

    /// The response could not be turned into a value for another reason,
    /// e.g. its stream was already handed to the caller.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Reading the response stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An invalid URL was provided or produced.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The resilience layer refused or gave up on the call.
    #[error("{0}")]
    Command(Box<CommandError>),
}

impl Error {
    /// Returns the HTTP status code if this error carries a response.
    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(ResponseEnvelope::status)
    }

    /// Returns the copied response if this error carries one.
    pub fn response(&self) -> Option<&ResponseEnvelope> {
        match self {
            Error::ResponseFailure(failure) => Some(failure.response()),
            Error::NoReader { response, .. } => Some(response),
            Error::DeserializationFailed { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Returns `true` for classified HTTP failures.
    pub fn is_response_failure(&self) -> bool {
        matches!(self, Error::ResponseFailure(_))
    }

    /// Returns `true` for failures that happened while processing a response
    /// the server did not declare as failed.
    ///
    /// These never reach error interceptors and never count against a
    /// circuit breaker.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::NoReader { .. }
                | Error::DeserializationFailed { .. }
                | Error::EntityTypeMismatch { .. }
                | Error::Extraction(_)
                | Error::Io(_)
        )
    }

    /// Returns `true` for transport-level failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Transport(_) | Error::Timeout)
    }

    /// Returns the resilience failure if this is one.
    pub fn command(&self) -> Option<&CommandError> {
        match self {
            Error::Command(error) => Some(error),
            _ => None,
        }
    }
}

impl From<CommandError> for Error {
    fn from(error: CommandError) -> Self {
        Error::Command(Box::new(error))
    }
}

impl From<ResponseFailure> for Error {
    fn from(failure: ResponseFailure) -> Self {
        Error::ResponseFailure(Box::new(failure))
    }
}

/// A response whose status was classified as a failure.
#[derive(Debug)]
pub struct ResponseFailure {
    message: String,
    response: ResponseEnvelope,
}

impl ResponseFailure {
    /// Creates a failure around a (usually copied) response.
    pub fn new(message: impl Into<String>, response: ResponseEnvelope) -> Self {
        Self {
            message: message.into(),
            response,
        }
    }

    /// The failure message, e.g. `Error status 404 Not Found returned`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The response status.
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// The copied response.
    pub fn response(&self) -> &ResponseEnvelope {
        &self.response
    }

    /// The copied response, mutably, e.g. to read its body.
    pub fn response_mut(&mut self) -> &mut ResponseEnvelope {
        &mut self.response
    }

    /// Unwraps the copied response.
    pub fn into_response(self) -> ResponseEnvelope {
        self.response
    }
}

impl std::fmt::Display for ResponseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// A failed call together with the status of the classified response it
/// started from.
///
/// Error interceptors may replace a [`Error::ResponseFailure`] with any other
/// error; `failed_status` still reports what the server answered.
#[derive(Debug)]
pub(crate) struct CallFailure {
    pub(crate) error: Error,
    pub(crate) failed_status: Option<StatusCode>,
}

impl From<Error> for CallFailure {
    fn from(error: Error) -> Self {
        let failed_status = match &error {
            Error::ResponseFailure(failure) => Some(failure.status()),
            _ => None,
        };
        Self { error, failed_status }
    }
}

/// A specialized `Result` type for service client calls.
pub type Result<T> = std::result::Result<T, Error>;
