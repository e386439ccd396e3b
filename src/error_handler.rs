//! The error interceptor chain.
//!
//! Classified HTTP failures ([`Error::ResponseFailure`]) are offered to every
//! registered [`ErrorInterceptor`] in registration order before they reach the
//! caller. Interceptors typically translate server error payloads into richer
//! errors. Every other error bypasses the chain.

use crate::envelope::ResponseEnvelope;
use crate::error::CallFailure;
use crate::{Error, Result};
use async_trait::async_trait;
use http::StatusCode;
use std::sync::Arc;

/// Inspects a failed response before the failure is raised.
///
/// Returning `Ok(())` passes the failure on to the next interceptor. Returning
/// an error stops the chain and raises that error instead.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use restgen::{Error, ErrorInterceptor, ResponseEnvelope};
/// use http::StatusCode;
///
/// struct NotFoundAsUsage;
///
/// #[async_trait]
/// impl ErrorInterceptor for NotFoundAsUsage {
///     async fn handle(&self, response: &mut ResponseEnvelope) -> restgen::Result<()> {
///         if response.status() == StatusCode::NOT_FOUND {
///             let body = response.text().await?;
///             return Err(Error::Usage(format!("no such resource: {}", body)));
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ErrorInterceptor: Send + Sync {
    /// Handles a failed response. The body stream starts at its first byte.
    async fn handle(&self, response: &mut ResponseEnvelope) -> Result<()>;
}

/// Routes errors through the registered interceptors.
#[derive(Clone, Default)]
pub struct ErrorHandler {
    interceptors: Vec<Arc<dyn ErrorInterceptor>>,
}

impl ErrorHandler {
    /// Creates a handler over the given interceptors.
    pub fn new(interceptors: Vec<Arc<dyn ErrorInterceptor>>) -> Self {
        Self { interceptors }
    }

    /// The number of registered interceptors.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Returns `true` if no interceptors are registered.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Decides which error to raise for a failed call.
    ///
    /// `status` is the status of the response being processed when the error
    /// happened, if there was one.
    pub async fn handle(&self, error: Error, status: Option<StatusCode>) -> Error {
        let mut failure = match error {
            Error::ResponseFailure(failure) => failure,
            other => {
                if !self.interceptors.is_empty() {
                    match status {
                        Some(status) => tracing::warn!(
                            status = status.as_u16(),
                            error = %other,
                            "The HTTP request was successful, but there was a problem processing the response on the client side. Error interceptors were skipped"
                        ),
                        None => tracing::warn!(
                            error = %other,
                            "The HTTP request failed before a response was received. Error interceptors were skipped"
                        ),
                    }
                }
                return other;
            }
        };

        for interceptor in &self.interceptors {
            if let Err(e) = failure.response_mut().reset_stream() {
                tracing::warn!(
                    error = %e,
                    status = failure.status().as_u16(),
                    "Could not reset the response stream before running an error interceptor"
                );
            }
            if let Err(raised) = interceptor.handle(failure.response_mut()).await {
                return raised;
            }
        }

        Error::ResponseFailure(failure)
    }

    /// Like [`handle`](Self::handle), but remembers the status of a classified
    /// failure even when an interceptor replaces it.
    pub(crate) async fn handle_call(&self, error: Error, status: Option<StatusCode>) -> CallFailure {
        let CallFailure { error, failed_status } = CallFailure::from(error);
        CallFailure {
            error: self.handle(error, status).await,
            failed_status,
        }
    }
}

impl std::fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResponseFailure;
    use crate::providers::ProviderRegistry;
    use crate::transport::testing::{raw, CountingStream};
    use parking_lot::Mutex;

    /// Records the body it sees and passes.
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ErrorInterceptor for Recorder {
        async fn handle(&self, response: &mut ResponseEnvelope) -> Result<()> {
            let body = response.text().await?;
            self.seen.lock().push(body);
            Ok(())
        }
    }

    struct Raise;

    #[async_trait]
    impl ErrorInterceptor for Raise {
        async fn handle(&self, response: &mut ResponseEnvelope) -> Result<()> {
            Err(Error::Usage(format!("raised for {}", response.status().as_u16())))
        }
    }

    fn failure_with(stream: CountingStream) -> Error {
        let envelope = ResponseEnvelope::new(raw(500, Some("text/plain"), stream), Arc::new(ProviderRegistry::new()));
        Error::ResponseFailure(Box::new(ResponseFailure::new("Error status 500 returned", envelope)))
    }

    #[tokio::test]
    async fn test_each_interceptor_sees_fresh_stream() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = ErrorHandler::new(vec![
            Arc::new(Recorder { seen: seen.clone() }),
            Arc::new(Recorder { seen: seen.clone() }),
        ]);

        let (stream, stats) = CountingStream::new("boom");
        let error = handler.handle(failure_with(stream), None).await;

        assert!(error.is_response_failure());
        assert_eq!(*seen.lock(), vec!["boom".to_string(), "boom".to_string()]);
        assert_eq!(stats.resets(), 2);
    }

    #[tokio::test]
    async fn test_reset_failure_does_not_abort_chain() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = ErrorHandler::new(vec![
            Arc::new(Recorder { seen: seen.clone() }),
            Arc::new(Recorder { seen: seen.clone() }),
        ]);

        let (stream, _) = CountingStream::new("boom");
        let error = handler.handle(failure_with(stream.failing_reset()), None).await;

        assert!(error.is_response_failure());
        // The second interceptor ran, even though the stream could not be rewound for it.
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_raising_interceptor_stops_chain() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = ErrorHandler::new(vec![Arc::new(Raise), Arc::new(Recorder { seen: seen.clone() })]);

        let (stream, _) = CountingStream::new("boom");
        match handler.handle(failure_with(stream), None).await {
            Error::Usage(message) => assert_eq!(message, "raised for 500"),
            other => panic!("Expected usage error, got {:?}", other),
        }
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_local_errors_bypass_interceptors() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = ErrorHandler::new(vec![Arc::new(Recorder { seen: seen.clone() })]);

        let error = handler
            .handle(Error::Extraction("bad body".to_string()), Some(StatusCode::OK))
            .await;

        assert!(matches!(error, Error::Extraction(_)));
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_transport_errors_bypass_interceptors() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = ErrorHandler::new(vec![Arc::new(Recorder { seen: seen.clone() })]);

        let failure = handler.handle_call(Error::Timeout, None).await;

        assert!(matches!(failure.error, Error::Timeout));
        assert_eq!(failure.failed_status, None);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_replaced_failure_keeps_failed_status() {
        let handler = ErrorHandler::new(vec![Arc::new(Raise)]);

        let (stream, _) = CountingStream::new("boom");
        let failure = handler.handle_call(failure_with(stream), None).await;

        assert!(matches!(failure.error, Error::Usage(_)));
        assert_eq!(failure.failed_status, Some(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
