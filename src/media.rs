//! Media types and the compatibility rules used during content negotiation.

use crate::{Error, Result};
use mime::Mime;
use std::fmt;
use std::str::FromStr;

/// An HTTP media type such as `application/json` or `text/*`.
///
/// Thin wrapper around [`mime::Mime`] adding the wildcard matching rules the
/// provider registry relies on.
///
/// # Examples
///
/// ```
/// use restgen::MediaType;
///
/// let atom: MediaType = "application/atom+xml".parse().unwrap();
/// let any_xml: MediaType = "application/*+xml".parse().unwrap();
///
/// assert!(any_xml.is_compatible(&atom));
/// assert!(MediaType::WILDCARD.is_compatible(&atom));
/// assert!(!MediaType::APPLICATION_JSON.is_compatible(&atom));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct MediaType(Mime);

impl MediaType {
    /// `*/*`
    pub const WILDCARD: MediaType = MediaType(mime::STAR_STAR);
    /// `application/json`
    pub const APPLICATION_JSON: MediaType = MediaType(mime::APPLICATION_JSON);
    /// `text/plain`
    pub const TEXT_PLAIN: MediaType = MediaType(mime::TEXT_PLAIN);
    /// `application/x-www-form-urlencoded`
    pub const FORM_URLENCODED: MediaType = MediaType(mime::APPLICATION_WWW_FORM_URLENCODED);
    /// `application/octet-stream`
    pub const OCTET_STREAM: MediaType = MediaType(mime::APPLICATION_OCTET_STREAM);

    /// Parses a media type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] if the text is not a valid media type.
    pub fn parse(text: &str) -> Result<Self> {
        text.trim()
            .parse::<Mime>()
            .map(MediaType)
            .map_err(|e| Error::Usage(format!("Invalid media type '{}': {}", text, e)))
    }

    /// The primary type, e.g. `application`.
    pub fn type_(&self) -> &str {
        self.0.type_().as_str()
    }

    /// The subtype without any structured suffix, e.g. `atom` for `application/atom+xml`.
    pub fn subtype(&self) -> &str {
        self.0.subtype().as_str()
    }

    /// The structured syntax suffix, e.g. `xml` for `application/atom+xml`.
    pub fn suffix(&self) -> Option<&str> {
        self.0.suffix().map(|s| s.as_str())
    }

    /// Looks up a parameter such as `charset`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.0.get_param(name).map(|v| v.as_str())
    }

    /// The media type without parameters.
    pub fn essence(&self) -> &str {
        self.0.essence_str()
    }

    /// Returns `true` for `*/*`.
    pub fn is_wildcard_type(&self) -> bool {
        self.type_() == "*"
    }

    /// Returns `true` for `type/*`. Composite wildcards such as `*+xml` are not plain wildcards.
    pub fn is_wildcard_subtype(&self) -> bool {
        self.subtype() == "*" && self.suffix().is_none()
    }

    /// Returns `true` for composite wildcards such as `application/*+xml`.
    pub fn is_composite_wildcard(&self) -> bool {
        self.subtype() == "*" && self.suffix().is_some()
    }

    /// Checks whether two media types can describe the same content.
    ///
    /// Parameters are ignored. Wildcards match in either direction.
    pub fn is_compatible(&self, other: &MediaType) -> bool {
        if self.is_wildcard_type() || other.is_wildcard_type() {
            return true;
        }
        if !self.type_().eq_ignore_ascii_case(other.type_()) {
            return false;
        }
        if self.is_wildcard_subtype() || other.is_wildcard_subtype() {
            return true;
        }
        if self.is_composite_wildcard() {
            return composite_matches(self, other);
        }
        if other.is_composite_wildcard() {
            return composite_matches(other, self);
        }
        self.subtype().eq_ignore_ascii_case(other.subtype())
            && self.suffix().map(str::to_ascii_lowercase)
                == other.suffix().map(str::to_ascii_lowercase)
    }

    /// Ranks how concrete this media type is.
    ///
    /// `*/*` is 0, `type/*` is 1, `type/*+suffix` is 2 and a concrete type is 3.
    pub fn specificity(&self) -> u8 {
        if self.is_wildcard_type() {
            0
        } else if self.is_wildcard_subtype() {
            1
        } else if self.is_composite_wildcard() {
            2
        } else {
            3
        }
    }

    /// Borrows the underlying [`Mime`].
    pub fn as_mime(&self) -> &Mime {
        &self.0
    }
}

fn composite_matches(wildcard: &MediaType, other: &MediaType) -> bool {
    let Some(suffix) = wildcard.suffix() else {
        return false;
    };
    match other.suffix() {
        Some(other_suffix) => other_suffix.eq_ignore_ascii_case(suffix),
        None => other.subtype().eq_ignore_ascii_case(suffix),
    }
}

impl FromStr for MediaType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MediaType::parse(s)
    }
}

impl From<Mime> for MediaType {
    fn from(mime: Mime) -> Self {
        MediaType(mime)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MediaType({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(text: &str) -> MediaType {
        text.parse().unwrap()
    }

    #[test]
    fn test_exact_and_wildcard_compatibility() {
        assert!(media("application/json").is_compatible(&media("application/json")));
        assert!(media("application/json").is_compatible(&media("*/*")));
        assert!(media("text/*").is_compatible(&media("text/plain")));
        assert!(media("text/plain").is_compatible(&media("text/*")));
        assert!(!media("text/*").is_compatible(&media("application/json")));
        assert!(!media("text/plain").is_compatible(&media("text/html")));
    }

    #[test]
    fn test_parameters_are_ignored() {
        assert!(media("text/plain; charset=utf-8").is_compatible(&media("text/plain")));
        assert_eq!(media("text/plain; charset=utf-8").param("charset"), Some("utf-8"));
    }

    #[test]
    fn test_composite_wildcards() {
        let any_xml = media("application/*+xml");
        assert!(any_xml.is_composite_wildcard());
        assert!(!any_xml.is_wildcard_subtype());
        assert!(any_xml.is_compatible(&media("application/atom+xml")));
        assert!(any_xml.is_compatible(&media("application/xml")));
        assert!(media("application/atom+xml").is_compatible(&any_xml));
        assert!(!any_xml.is_compatible(&media("application/json")));
        assert!(!any_xml.is_compatible(&media("text/xml")));
    }

    #[test]
    fn test_specificity_ordering() {
        assert!(media("*/*").specificity() < media("text/*").specificity());
        assert!(media("text/*").specificity() < media("application/*+xml").specificity());
        assert!(media("application/*+xml").specificity() < media("application/xml").specificity());
    }

    #[test]
    fn test_invalid_media_type() {
        assert!(matches!(MediaType::parse("not a media type"), Err(Error::Usage(_))));
    }
}
