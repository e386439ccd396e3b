//! Providers registered in every [`ProviderRegistry`](super::ProviderRegistry).

use super::{CodecError, MessageBodyReader, MessageBodyWriter};
use crate::entity::{Entity, TypeInfo};
use crate::media::MediaType;
use crate::request::MultiValueMap;
use bytes::Bytes;
use http::HeaderMap;

/// Form fields, read from and written as `application/x-www-form-urlencoded`.
pub type Form = MultiValueMap;

fn mismatch(expected: &str, entity: &Entity) -> CodecError {
    format!("expected a {} entity, got {}", expected, entity.type_info()).into()
}

/// Reads and writes `String` bodies of any media type as UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringProvider;

impl MessageBodyReader for StringProvider {
    fn target(&self) -> Option<TypeInfo> {
        Some(TypeInfo::of::<String>())
    }

    fn is_readable(&self, type_info: TypeInfo, _media_type: &MediaType) -> bool {
        type_info.is::<String>()
    }

    fn read_from(
        &self,
        _type_info: TypeInfo,
        _media_type: &MediaType,
        _headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Entity, CodecError> {
        let text = String::from_utf8(body.to_vec())?;
        Ok(Entity::new(text))
    }
}

impl MessageBodyWriter for StringProvider {
    fn target(&self) -> Option<TypeInfo> {
        Some(TypeInfo::of::<String>())
    }

    fn is_writeable(&self, type_info: TypeInfo, _media_type: &MediaType) -> bool {
        type_info.is::<String>()
    }

    fn write_to(
        &self,
        entity: &Entity,
        _media_type: &MediaType,
        _headers: &mut HeaderMap,
    ) -> Result<Bytes, CodecError> {
        let text = entity
            .downcast_ref::<String>()
            .ok_or_else(|| mismatch("String", entity))?;
        Ok(Bytes::copy_from_slice(text.as_bytes()))
    }
}

/// Reads and writes raw `Vec<u8>` bodies of any media type.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteArrayProvider;

impl MessageBodyReader for ByteArrayProvider {
    fn target(&self) -> Option<TypeInfo> {
        Some(TypeInfo::of::<Vec<u8>>())
    }

    fn is_readable(&self, type_info: TypeInfo, _media_type: &MediaType) -> bool {
        type_info.is::<Vec<u8>>()
    }

    fn read_from(
        &self,
        _type_info: TypeInfo,
        _media_type: &MediaType,
        _headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Entity, CodecError> {
        Ok(Entity::new(body.to_vec()))
    }
}

impl MessageBodyWriter for ByteArrayProvider {
    fn target(&self) -> Option<TypeInfo> {
        Some(TypeInfo::of::<Vec<u8>>())
    }

    fn is_writeable(&self, type_info: TypeInfo, _media_type: &MediaType) -> bool {
        type_info.is::<Vec<u8>>()
    }

    fn write_to(
        &self,
        entity: &Entity,
        _media_type: &MediaType,
        _headers: &mut HeaderMap,
    ) -> Result<Bytes, CodecError> {
        let bytes = entity
            .downcast_ref::<Vec<u8>>()
            .ok_or_else(|| mismatch("Vec<u8>", entity))?;
        Ok(Bytes::copy_from_slice(bytes))
    }
}

/// Reads and writes [`Form`] bodies as `application/x-www-form-urlencoded`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormProvider;

impl MessageBodyReader for FormProvider {
    fn target(&self) -> Option<TypeInfo> {
        Some(TypeInfo::of::<Form>())
    }

    fn consumes(&self) -> Vec<MediaType> {
        vec![MediaType::FORM_URLENCODED]
    }

    fn is_readable(&self, type_info: TypeInfo, _media_type: &MediaType) -> bool {
        type_info.is::<Form>()
    }

    fn read_from(
        &self,
        _type_info: TypeInfo,
        _media_type: &MediaType,
        _headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Entity, CodecError> {
        let mut form = Form::new();
        for (name, value) in url::form_urlencoded::parse(&body) {
            form.add(name, value);
        }
        Ok(Entity::new(form))
    }
}

impl MessageBodyWriter for FormProvider {
    fn target(&self) -> Option<TypeInfo> {
        Some(TypeInfo::of::<Form>())
    }

    fn produces(&self) -> Vec<MediaType> {
        vec![MediaType::FORM_URLENCODED]
    }

    fn is_writeable(&self, type_info: TypeInfo, _media_type: &MediaType) -> bool {
        type_info.is::<Form>()
    }

    fn write_to(
        &self,
        entity: &Entity,
        _media_type: &MediaType,
        _headers: &mut HeaderMap,
    ) -> Result<Bytes, CodecError> {
        let form = entity.downcast_ref::<Form>().ok_or_else(|| mismatch("Form", entity))?;
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form.pairs())
            .finish();
        Ok(Bytes::from(encoded))
    }
}
