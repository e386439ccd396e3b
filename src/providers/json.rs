//! JSON bodies via serde.

use super::{CodecError, MessageBodyReader, MessageBodyWriter};
use crate::entity::{Entity, TypeInfo};
use crate::media::MediaType;
use bytes::Bytes;
use http::HeaderMap;
use serde::{de::DeserializeOwned, Serialize};
use std::any::Any;
use std::marker::PhantomData;

/// Reads and writes one concrete type as JSON.
///
/// Handles `application/json` and any `application/*+json` type.
///
/// # Examples
///
/// ```
/// use restgen::{JsonProvider, ProviderRegistry};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Frob {
///     id: String,
/// }
///
/// let mut registry = ProviderRegistry::new();
/// registry.register(JsonProvider::<Frob>::new());
/// ```
pub struct JsonProvider<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonProvider<T> {
    /// Creates the provider.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonProvider<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsonProvider<{}>", std::any::type_name::<T>())
    }
}

fn json_types() -> Vec<MediaType> {
    let structured = MediaType::parse("application/*+json").unwrap_or(MediaType::APPLICATION_JSON);
    vec![MediaType::APPLICATION_JSON, structured]
}

fn is_json(media_type: &MediaType) -> bool {
    media_type.is_wildcard_type()
        || media_type.subtype().eq_ignore_ascii_case("json")
        || media_type
            .suffix()
            .is_some_and(|suffix| suffix.eq_ignore_ascii_case("json"))
        || (media_type.type_() == "application" && media_type.is_wildcard_subtype())
}

impl<T> MessageBodyReader for JsonProvider<T>
where
    T: DeserializeOwned + Any + Send + Sync,
{
    fn target(&self) -> Option<TypeInfo> {
        Some(TypeInfo::of::<T>())
    }

    fn consumes(&self) -> Vec<MediaType> {
        json_types()
    }

    fn is_readable(&self, type_info: TypeInfo, media_type: &MediaType) -> bool {
        type_info.is::<T>() && is_json(media_type)
    }

    fn read_from(
        &self,
        _type_info: TypeInfo,
        _media_type: &MediaType,
        _headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Entity, CodecError> {
        let value: T = serde_json::from_slice(&body)?;
        Ok(Entity::new(value))
    }
}

impl<T> MessageBodyWriter for JsonProvider<T>
where
    T: Serialize + Any + Send + Sync,
{
    fn target(&self) -> Option<TypeInfo> {
        Some(TypeInfo::of::<T>())
    }

    fn produces(&self) -> Vec<MediaType> {
        json_types()
    }

    fn is_writeable(&self, type_info: TypeInfo, media_type: &MediaType) -> bool {
        type_info.is::<T>() && is_json(media_type)
    }

    fn write_to(
        &self,
        entity: &Entity,
        _media_type: &MediaType,
        _headers: &mut HeaderMap,
    ) -> Result<Bytes, CodecError> {
        let value = entity.downcast_ref::<T>().ok_or_else(|| -> CodecError {
            format!("expected a {} entity, got {}", std::any::type_name::<T>(), entity.type_info()).into()
        })?;
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Frob {
        id: String,
    }

    #[test]
    fn test_accepts_structured_json_suffix() {
        let provider = JsonProvider::<Frob>::new();
        let problem: MediaType = "application/problem+json".parse().unwrap();
        assert!(provider.is_readable(TypeInfo::of::<Frob>(), &problem));
        assert!(!provider.is_readable(TypeInfo::of::<Frob>(), &MediaType::TEXT_PLAIN));
        assert!(!provider.is_readable(TypeInfo::of::<String>(), &MediaType::APPLICATION_JSON));
    }

    #[test]
    fn test_read_and_write() {
        let provider = JsonProvider::<Frob>::new();
        let entity = provider
            .read_from(
                TypeInfo::of::<Frob>(),
                &MediaType::APPLICATION_JSON,
                &HeaderMap::new(),
                Bytes::from_static(br#"{"id":"abc"}"#),
            )
            .unwrap();
        assert_eq!(entity.downcast_ref::<Frob>(), Some(&Frob { id: "abc".into() }));

        let bytes = provider
            .write_to(&entity, &MediaType::APPLICATION_JSON, &mut HeaderMap::new())
            .unwrap();
        assert_eq!(&bytes[..], br#"{"id":"abc"}"#);
    }

    #[test]
    fn test_malformed_body_is_an_error() {
        let provider = JsonProvider::<Frob>::new();
        let result = provider.read_from(
            TypeInfo::of::<Frob>(),
            &MediaType::APPLICATION_JSON,
            &HeaderMap::new(),
            Bytes::from_static(b"not json"),
        );
        assert!(result.is_err());
    }
}
