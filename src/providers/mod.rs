//! Body codecs and content negotiation.
//!
//! A provider reads bodies into entities ([`MessageBodyReader`]), writes
//! entities into bodies ([`MessageBodyWriter`]), or both. Providers declare the
//! media types they handle and whether they target one concrete type or any
//! type. The [`ProviderRegistry`] picks the best one for each request and
//! response.
//!
//! # Selection
//!
//! For a given (type, media type) pair the registry:
//!
//! 1. keeps the providers whose declared media types are compatible with the
//!    requested one (providers that declare none count as `*/*`);
//! 2. orders them so that providers for a concrete type come before generic
//!    ones, and user-registered providers come before builtin ones when that
//!    ties, then by how specific the matching media type is, then by
//!    registration order;
//! 3. returns the first one whose `is_readable` / `is_writeable` probe accepts.

mod builtin;
mod json;

pub use builtin::{ByteArrayProvider, Form, FormProvider, StringProvider};
pub use json::JsonProvider;

use crate::entity::{Entity, TypeInfo};
use crate::media::MediaType;
use bytes::Bytes;
use http::HeaderMap;
use std::cmp::Reverse;
use std::sync::Arc;

/// The error type codecs report failures with.
pub type CodecError = Box<dyn std::error::Error + Send + Sync>;

/// Reads response bodies into entities.
pub trait MessageBodyReader: Send + Sync {
    /// The concrete type this reader produces, or `None` if it is generic.
    fn target(&self) -> Option<TypeInfo>;

    /// The media types this reader consumes. Empty means `*/*`.
    fn consumes(&self) -> Vec<MediaType> {
        Vec::new()
    }

    /// Checks whether this reader can produce `type_info` from `media_type`.
    fn is_readable(&self, type_info: TypeInfo, media_type: &MediaType) -> bool;

    /// Decodes a body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is malformed.
    fn read_from(
        &self,
        type_info: TypeInfo,
        media_type: &MediaType,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Entity, CodecError>;
}

/// Writes entities into request bodies.
pub trait MessageBodyWriter: Send + Sync {
    /// The concrete type this writer accepts, or `None` if it is generic.
    fn target(&self) -> Option<TypeInfo>;

    /// The media types this writer produces. Empty means `*/*`.
    fn produces(&self) -> Vec<MediaType> {
        Vec::new()
    }

    /// Checks whether this writer can encode `type_info` as `media_type`.
    fn is_writeable(&self, type_info: TypeInfo, media_type: &MediaType) -> bool;

    /// Encodes an entity. Writers may add headers.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity cannot be encoded.
    fn write_to(
        &self,
        entity: &Entity,
        media_type: &MediaType,
        headers: &mut HeaderMap,
    ) -> Result<Bytes, CodecError>;
}

/// Whether a provider targets one concrete type or any type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Specificity {
    /// Targets one concrete type.
    Specific,
    /// Generic over every type.
    Generic,
}

/// Who registered a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Origin {
    /// Registered by the application.
    User,
    /// Shipped with the crate.
    Builtin,
}

struct Entry<P: ?Sized> {
    provider: Arc<P>,
    media_types: Vec<MediaType>,
    target: Option<TypeInfo>,
    origin: Origin,
}

impl<P: ?Sized> Entry<P> {
    fn new(provider: Arc<P>, declared: Vec<MediaType>, target: Option<TypeInfo>, origin: Origin) -> Self {
        let media_types = if declared.is_empty() {
            vec![MediaType::WILDCARD]
        } else {
            declared
        };
        Self {
            provider,
            media_types,
            target,
            origin,
        }
    }

    fn specificity(&self) -> Specificity {
        if self.target.is_some() {
            Specificity::Specific
        } else {
            Specificity::Generic
        }
    }

    /// The specificity of the most specific declared media type matching `requested`.
    fn media_match(&self, requested: &MediaType) -> Option<u8> {
        self.media_types
            .iter()
            .filter(|m| m.is_compatible(requested))
            .map(MediaType::specificity)
            .max()
    }
}

/// Returns compatible entries for `type_info`, best first.
fn candidates<'a, P: ?Sized>(
    entries: &'a [Entry<P>],
    type_info: TypeInfo,
    requested: &MediaType,
) -> Vec<&'a Entry<P>> {
    let mut matches: Vec<(usize, u8, &Entry<P>)> = entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.target.map_or(true, |target| target == type_info))
        .filter_map(|(index, entry)| entry.media_match(requested).map(|rank| (index, rank, entry)))
        .collect();

    matches.sort_by_key(|(index, rank, entry)| (entry.specificity(), entry.origin, Reverse(*rank), *index));
    matches.into_iter().map(|(_, _, entry)| entry).collect()
}

/// The set of readers and writers available to a client.
///
/// A registry is populated while a client is being built and is read-only
/// once the client exists.
///
/// # Examples
///
/// ```
/// use restgen::{JsonProvider, MediaType, ProviderRegistry, TypeInfo};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Frob {
///     name: String,
/// }
///
/// let mut registry = ProviderRegistry::new();
/// registry.register(JsonProvider::<Frob>::new());
///
/// assert!(registry.reader(TypeInfo::of::<Frob>(), &MediaType::APPLICATION_JSON).is_some());
/// assert!(registry.reader(TypeInfo::of::<Frob>(), &MediaType::TEXT_PLAIN).is_none());
/// ```
pub struct ProviderRegistry {
    readers: Vec<Entry<dyn MessageBodyReader>>,
    writers: Vec<Entry<dyn MessageBodyWriter>>,
}

impl ProviderRegistry {
    /// A registry holding the builtin providers.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        let string = Arc::new(StringProvider);
        let bytes = Arc::new(ByteArrayProvider);
        let form = Arc::new(FormProvider);

        registry.add_reader(string.clone(), Origin::Builtin);
        registry.add_writer(string, Origin::Builtin);
        registry.add_reader(bytes.clone(), Origin::Builtin);
        registry.add_writer(bytes, Origin::Builtin);
        registry.add_reader(form.clone(), Origin::Builtin);
        registry.add_writer(form, Origin::Builtin);
        registry
    }

    /// A registry with no providers at all.
    pub fn empty() -> Self {
        Self {
            readers: Vec::new(),
            writers: Vec::new(),
        }
    }

    /// Registers a user reader.
    pub fn register_reader(&mut self, reader: Arc<dyn MessageBodyReader>) -> &mut Self {
        self.add_reader(reader, Origin::User);
        self
    }

    /// Registers a user writer.
    pub fn register_writer(&mut self, writer: Arc<dyn MessageBodyWriter>) -> &mut Self {
        self.add_writer(writer, Origin::User);
        self
    }

    /// Registers a user provider that is both a reader and a writer.
    pub fn register<P>(&mut self, provider: P) -> &mut Self
    where
        P: MessageBodyReader + MessageBodyWriter + 'static,
    {
        let provider = Arc::new(provider);
        self.add_reader(provider.clone(), Origin::User);
        self.add_writer(provider, Origin::User);
        self
    }

    /// Registers a reader with an explicit origin.
    pub fn add_reader(&mut self, reader: Arc<dyn MessageBodyReader>, origin: Origin) {
        let declared = reader.consumes();
        let target = reader.target();
        self.readers.push(Entry::new(reader, declared, target, origin));
    }

    /// Registers a writer with an explicit origin.
    pub fn add_writer(&mut self, writer: Arc<dyn MessageBodyWriter>, origin: Origin) {
        let declared = writer.produces();
        let target = writer.target();
        self.writers.push(Entry::new(writer, declared, target, origin));
    }

    /// Selects the reader for `type_info` encoded as `media_type`.
    pub fn reader(&self, type_info: TypeInfo, media_type: &MediaType) -> Option<Arc<dyn MessageBodyReader>> {
        candidates(&self.readers, type_info, media_type)
            .into_iter()
            .find(|entry| entry.provider.is_readable(type_info, media_type))
            .map(|entry| entry.provider.clone())
    }

    /// Selects the writer for `type_info` encoded as `media_type`.
    pub fn writer(&self, type_info: TypeInfo, media_type: &MediaType) -> Option<Arc<dyn MessageBodyWriter>> {
        candidates(&self.writers, type_info, media_type)
            .into_iter()
            .find(|entry| entry.provider.is_writeable(type_info, media_type))
            .map(|entry| entry.provider.clone())
    }

    /// Returns `true` if at least one reader is registered.
    pub fn has_readers(&self) -> bool {
        !self.readers.is_empty()
    }

    /// Returns `true` if at least one writer is registered.
    pub fn has_writers(&self) -> bool {
        !self.writers.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("readers", &self.readers.len())
            .field("writers", &self.writers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A reader that tags every entity with its own name.
    struct Tagged {
        name: &'static str,
        target: Option<TypeInfo>,
        media: Vec<MediaType>,
        accepts: bool,
    }

    impl Tagged {
        fn generic(name: &'static str, media: &str) -> Self {
            Self {
                name,
                target: None,
                media: vec![media.parse().unwrap()],
                accepts: true,
            }
        }

        fn specific(name: &'static str, media: &str) -> Self {
            Self {
                target: Some(TypeInfo::of::<String>()),
                ..Self::generic(name, media)
            }
        }

        fn refusing(mut self) -> Self {
            self.accepts = false;
            self
        }
    }

    impl MessageBodyReader for Tagged {
        fn target(&self) -> Option<TypeInfo> {
            self.target
        }

        fn consumes(&self) -> Vec<MediaType> {
            self.media.clone()
        }

        fn is_readable(&self, _type_info: TypeInfo, _media_type: &MediaType) -> bool {
            self.accepts
        }

        fn read_from(
            &self,
            _type_info: TypeInfo,
            _media_type: &MediaType,
            _headers: &HeaderMap,
            _body: Bytes,
        ) -> Result<Entity, CodecError> {
            Ok(Entity::new(self.name.to_string()))
        }
    }

    fn selected(registry: &ProviderRegistry, media: &str) -> Option<String> {
        let media: MediaType = media.parse().unwrap();
        let reader = registry.reader(TypeInfo::of::<String>(), &media)?;
        let entity = reader
            .read_from(TypeInfo::of::<String>(), &media, &HeaderMap::new(), Bytes::new())
            .unwrap();
        entity.downcast::<String>().ok()
    }

    #[test]
    fn test_specific_beats_generic_in_any_order() {
        let mut registry = ProviderRegistry::empty();
        registry.register_reader(Arc::new(Tagged::generic("generic", "application/json")));
        registry.register_reader(Arc::new(Tagged::specific("specific", "application/json")));
        assert_eq!(selected(&registry, "application/json").as_deref(), Some("specific"));

        let mut registry = ProviderRegistry::empty();
        registry.register_reader(Arc::new(Tagged::specific("specific", "application/json")));
        registry.register_reader(Arc::new(Tagged::generic("generic", "application/json")));
        assert_eq!(selected(&registry, "application/json").as_deref(), Some("specific"));
    }

    #[test]
    fn test_user_beats_builtin() {
        let mut registry = ProviderRegistry::empty();
        registry.add_reader(Arc::new(Tagged::specific("builtin", "text/plain")), Origin::Builtin);
        registry.add_reader(Arc::new(Tagged::specific("user", "text/plain")), Origin::User);
        assert_eq!(selected(&registry, "text/plain").as_deref(), Some("user"));
    }

    #[test]
    fn test_user_string_reader_overrides_builtin_string_provider() {
        let mut registry = ProviderRegistry::new();
        registry.register_reader(Arc::new(Tagged::specific("user", "*/*")));
        assert_eq!(selected(&registry, "text/plain").as_deref(), Some("user"));
    }

    #[test]
    fn test_specificity_outranks_origin() {
        let mut registry = ProviderRegistry::empty();
        registry.add_reader(Arc::new(Tagged::generic("user-generic", "text/plain")), Origin::User);
        registry.add_reader(Arc::new(Tagged::specific("builtin-specific", "text/plain")), Origin::Builtin);
        assert_eq!(selected(&registry, "text/plain").as_deref(), Some("builtin-specific"));
    }

    #[test]
    fn test_incompatible_media_is_filtered() {
        let mut registry = ProviderRegistry::empty();
        registry.register_reader(Arc::new(Tagged::specific("xml", "application/*+xml")));
        assert_eq!(selected(&registry, "application/json"), None);
        assert_eq!(selected(&registry, "application/atom+xml").as_deref(), Some("xml"));
    }

    #[test]
    fn test_probe_skips_refusing_candidates() {
        let mut registry = ProviderRegistry::empty();
        registry.register_reader(Arc::new(Tagged::specific("refuses", "text/plain").refusing()));
        registry.register_reader(Arc::new(Tagged::generic("fallback", "text/*")));
        assert_eq!(selected(&registry, "text/plain").as_deref(), Some("fallback"));
    }

    #[test]
    fn test_more_specific_media_wins_a_tie() {
        let mut registry = ProviderRegistry::empty();
        registry.register_reader(Arc::new(Tagged::specific("wildcard", "*/*")));
        registry.register_reader(Arc::new(Tagged::specific("exact", "text/plain")));
        assert_eq!(selected(&registry, "text/plain").as_deref(), Some("exact"));
    }

    #[test]
    fn test_specific_provider_for_other_type_is_skipped() {
        let mut registry = ProviderRegistry::empty();
        registry.register_reader(Arc::new(Tagged {
            target: Some(TypeInfo::of::<u64>()),
            ..Tagged::generic("u64", "text/plain")
        }));
        assert_eq!(selected(&registry, "text/plain"), None);
    }
}
