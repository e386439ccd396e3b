//! Turning a response envelope into a method's declared return value.

use crate::client::Reply;
use crate::descriptor::ReturnKind;
use crate::entity::TypeInfo;
use crate::envelope::ResponseEnvelope;
use crate::error::CallFailure;
use crate::error_handler::ErrorHandler;
use crate::Error;

/// How one method turns its response into a [`Reply`].
#[derive(Debug, Clone, Copy)]
pub(crate) enum Extractor {
    /// Classify, release, return nothing.
    Unit,
    /// Classify, release, return the status.
    Status,
    /// Hand the live envelope to the caller without classifying it.
    Envelope(Option<TypeInfo>),
    /// Classify, then read the body as the given type.
    Body(TypeInfo),
}

impl Extractor {
    /// The extractor for an HTTP-bound return kind. Sub-resource factories have none.
    pub(crate) fn for_return(kind: &ReturnKind) -> Option<Self> {
        match kind {
            ReturnKind::Unit => Some(Extractor::Unit),
            ReturnKind::Status => Some(Extractor::Status),
            ReturnKind::Envelope(type_info) => Some(Extractor::Envelope(*type_info)),
            ReturnKind::Entity(type_info) => Some(Extractor::Body(*type_info)),
            ReturnKind::SubResource(_) => None,
        }
    }

    /// Failures are routed through `handler` and keep the status of the
    /// classified response they started from.
    pub(crate) async fn extract(
        &self,
        mut envelope: ResponseEnvelope,
        handler: &ErrorHandler,
    ) -> std::result::Result<Reply, CallFailure> {
        let status = envelope.status();
        match self {
            Extractor::Envelope(type_info) => {
                envelope.set_return_type(*type_info);
                Ok(Reply::Envelope(envelope))
            }
            Extractor::Unit | Extractor::Status => {
                if let Err(e) = envelope.check_failure_status().await {
                    return Err(handler.handle_call(e, Some(status)).await);
                }
                envelope.release();
                match self {
                    Extractor::Status => Ok(Reply::Status(status)),
                    _ => Ok(Reply::Unit),
                }
            }
            Extractor::Body(type_info) => {
                if let Err(e) = envelope.check_failure_status().await {
                    return Err(handler.handle_call(e, Some(status)).await);
                }
                let has_entity = match envelope.read_entity(*type_info).await {
                    Ok(entity) => entity.is_some(),
                    Err(e) => return Err(handler.handle_call(e, Some(status)).await),
                };
                if !has_entity {
                    return Ok(Reply::NoContent);
                }
                let entity = envelope.take_entity().ok_or_else(|| {
                    Error::Extraction(format!("The {} entity was not cached", type_info))
                })?;
                Ok(Reply::Entity(entity))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handler::ErrorInterceptor;
    use crate::providers::{JsonProvider, ProviderRegistry};
    use crate::transport::testing::{raw, CountingStream};
    use crate::transport::BodyStream;
    use crate::Result;
    use async_trait::async_trait;
    use http::StatusCode;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Frob {
        id: String,
    }

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ErrorInterceptor for Arc<Counting> {
        async fn handle(&self, _response: &mut ResponseEnvelope) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn respond(status: u16, content_type: Option<&str>, body: &'static str) -> (ResponseEnvelope, Arc<crate::transport::testing::StreamStats>) {
        let (stream, stats) = CountingStream::new(body);
        let mut registry = ProviderRegistry::new();
        registry.register(JsonProvider::<Frob>::new());
        (ResponseEnvelope::new(raw(status, content_type, stream), Arc::new(registry)), stats)
    }

    #[tokio::test]
    async fn test_body_extraction() {
        let (envelope, stats) = respond(200, Some("application/json"), r#"{"id":"abc"}"#);
        let reply = Extractor::Body(TypeInfo::of::<Frob>())
            .extract(envelope, &ErrorHandler::default())
            .await
            .unwrap();

        assert_eq!(reply.into_entity::<Frob>().unwrap(), Frob { id: "abc".into() });
        assert_eq!(stats.releases(), 1);
    }

    #[tokio::test]
    async fn test_status_is_classified_before_returning() {
        let (envelope, stats) = respond(503, Some("text/plain"), "down");
        let result = Extractor::Status.extract(envelope, &ErrorHandler::default()).await;

        let failure = result.unwrap_err();
        assert_eq!(failure.error.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(failure.failed_status, Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(stats.releases(), 1);

        let (envelope, _) = respond(202, None, "");
        let reply = Extractor::Status.extract(envelope, &ErrorHandler::default()).await.unwrap();
        assert_eq!(reply.into_status().unwrap(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_unit_releases_without_reading() {
        let (envelope, stats) = respond(200, Some("application/json"), r#"{"id":"abc"}"#);
        let reply = Extractor::Unit.extract(envelope, &ErrorHandler::default()).await.unwrap();

        assert!(matches!(reply, Reply::Unit));
        assert_eq!(stats.reads(), 0);
        assert_eq!(stats.releases(), 1);
    }

    #[tokio::test]
    async fn test_envelope_is_not_classified() {
        let (envelope, stats) = respond(500, Some("application/json"), r#"{"id":"abc"}"#);
        let reply = Extractor::Envelope(Some(TypeInfo::of::<Frob>()))
            .extract(envelope, &ErrorHandler::default())
            .await
            .unwrap();

        let mut envelope = reply.into_envelope().unwrap();
        assert_eq!(envelope.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(stats.releases(), 0);

        let entity = envelope.typed_entity().await.unwrap().unwrap();
        assert_eq!(entity.downcast_ref::<Frob>(), Some(&Frob { id: "abc".into() }));
    }

    #[tokio::test]
    async fn test_no_content() {
        let (envelope, _) = respond(204, None, "");
        let reply = Extractor::Body(TypeInfo::of::<Frob>())
            .extract(envelope, &ErrorHandler::default())
            .await
            .unwrap();
        assert!(matches!(reply, Reply::NoContent));
        assert_eq!(reply.into_optional::<Frob>().unwrap(), None);
    }

    #[tokio::test]
    async fn test_stream_entity_keeps_connection() {
        let (envelope, stats) = respond(200, Some("application/octet-stream"), "bytes");
        let reply = Extractor::Body(TypeInfo::of::<BodyStream>())
            .extract(envelope, &ErrorHandler::default())
            .await
            .unwrap();

        let stream = reply.into_entity::<BodyStream>().unwrap();
        assert_eq!(stats.releases(), 0);
        drop(stream);
        assert_eq!(stats.releases(), 1);
    }

    #[tokio::test]
    async fn test_failures_run_interceptors_but_local_errors_do_not() {
        let counting = Arc::new(Counting::default());
        let handler = ErrorHandler::new(vec![Arc::new(counting.clone())]);

        let (envelope, _) = respond(404, Some("application/json"), "{}");
        let failure = Extractor::Body(TypeInfo::of::<Frob>()).extract(envelope, &handler).await.unwrap_err();
        assert!(failure.error.is_response_failure());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);

        let (envelope, _) = respond(200, Some("application/json"), "not json");
        let failure = Extractor::Body(TypeInfo::of::<Frob>()).extract(envelope, &handler).await.unwrap_err();
        assert!(matches!(failure.error, Error::DeserializationFailed { .. }));
        assert_eq!(failure.failed_status, None);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    struct Translate;

    #[async_trait]
    impl ErrorInterceptor for Translate {
        async fn handle(&self, response: &mut ResponseEnvelope) -> Result<()> {
            Err(Error::Usage(format!("rejected: {}", response.text().await?)))
        }
    }

    #[tokio::test]
    async fn test_translated_failure_keeps_response_status() {
        let handler = ErrorHandler::new(vec![Arc::new(Translate)]);

        let (envelope, _) = respond(400, Some("text/plain"), "bad id");
        let failure = Extractor::Unit.extract(envelope, &handler).await.unwrap_err();

        assert!(matches!(&failure.error, Error::Usage(m) if m == "rejected: bad id"));
        assert_eq!(failure.error.status(), None);
        assert_eq!(failure.failed_status, Some(StatusCode::BAD_REQUEST));
    }
}
