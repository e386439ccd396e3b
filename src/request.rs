//! Outgoing request construction.
//!
//! A [`ClientRequest`] is built fresh for every call. Marshallers append
//! parameters to it, request filters may adjust it, and finally it is turned
//! into a [`WireRequest`] for the transport.

use crate::entity::Entity;
use crate::media::MediaType;
use crate::providers::ProviderRegistry;
use crate::transport::WireRequest;
use crate::{Error, Result};
use http::header::{ACCEPT, CONTENT_TYPE, COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::cell::OnceCell;
use url::Url;

/// Characters escaped in path template values. `/` and existing `%` escapes are kept.
const PATH_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b';')
    .add(b'[')
    .add(b']')
    .add(b'|')
    .add(b'\\')
    .add(b'^');

/// Characters escaped in matrix parameter names and values.
const MATRIX_VALUE: &AsciiSet = &PATH_VALUE.add(b'/').add(b'=').add(b'%');

/// An insertion-ordered map from names to one or more values.
///
/// # Examples
///
/// ```
/// use restgen::request::MultiValueMap;
///
/// let mut params = MultiValueMap::new();
/// params.add("tag", "red");
/// params.add("tag", "blue");
/// params.add("page", "2");
///
/// assert_eq!(params.get("tag"), Some(&["red".to_string(), "blue".to_string()][..]));
/// assert_eq!(params.first("page"), Some("2"));
/// assert_eq!(params.pairs().count(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiValueMap {
    entries: Vec<(String, Vec<String>)>,
}

impl MultiValueMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value under `name`.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// All values under `name`.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    /// The first value under `name`.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|values| values.first()).map(String::as_str)
    }

    /// Every `(name, value)` pair, in insertion order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    /// Returns `true` if no values have been added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The body of a request before serialization.
#[derive(Debug)]
pub struct RequestBody {
    /// The value to serialize.
    pub entity: Entity,
    /// The content type to serialize it as.
    pub content_type: MediaType,
}

/// A request under construction.
///
/// The URI template may contain `{name}` variables that are filled from path
/// parameters. The final URI is computed on first use and cached.
///
/// # Examples
///
/// ```
/// use restgen::request::ClientRequest;
/// use http::Method;
///
/// let mut request = ClientRequest::new(Method::GET, "http://localhost/frob/{id}");
/// request.path_param("id", "a b");
/// request.query_param("verbose", "true");
///
/// assert_eq!(
///     request.uri().unwrap().as_str(),
///     "http://localhost/frob/a%20b?verbose=true"
/// );
/// ```
#[derive(Debug)]
pub struct ClientRequest {
    method: Method,
    uri_template: String,
    headers: HeaderMap,
    query: MultiValueMap,
    form: MultiValueMap,
    path: MultiValueMap,
    matrix: MultiValueMap,
    cookies: Vec<(String, String)>,
    body: Option<RequestBody>,
    final_uri: OnceCell<Url>,
}

impl ClientRequest {
    /// Starts a request for the given verb and URI template.
    pub fn new(method: Method, uri_template: impl Into<String>) -> Self {
        Self {
            method,
            uri_template: uri_template.into(),
            headers: HeaderMap::new(),
            query: MultiValueMap::new(),
            form: MultiValueMap::new(),
            path: MultiValueMap::new(),
            matrix: MultiValueMap::new(),
            cookies: Vec::new(),
            body: None,
            final_uri: OnceCell::new(),
        }
    }

    /// The HTTP verb.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The unresolved URI template.
    pub fn uri_template(&self) -> &str {
        &self.uri_template
    }

    /// The headers set so far.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Query parameters.
    pub fn query_params(&self) -> &MultiValueMap {
        &self.query
    }

    /// Form parameters.
    pub fn form_params(&self) -> &MultiValueMap {
        &self.form
    }

    /// Path parameters.
    pub fn path_params(&self) -> &MultiValueMap {
        &self.path
    }

    /// Matrix parameters.
    pub fn matrix_params(&self) -> &MultiValueMap {
        &self.matrix
    }

    /// Cookies, in the order they were added.
    pub fn cookies(&self) -> &[(String, String)] {
        &self.cookies
    }

    /// The body, if one was set.
    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    /// Appends a header value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] if the name or value is not a valid header.
    pub fn header(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        let name = HeaderName::try_from(name)
            .map_err(|e| Error::Usage(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| Error::Usage(format!("Invalid header value: {}", e)))?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Appends a header value under an already validated name.
    pub(crate) fn typed_header(&mut self, name: &HeaderName, value: &str) -> Result<&mut Self> {
        let value = HeaderValue::try_from(value)
            .map_err(|e| Error::Usage(format!("Invalid value for header {}: {}", name, e)))?;
        self.headers.append(name.clone(), value);
        Ok(self)
    }

    /// Sets the `Accept` header.
    pub fn accept(&mut self, media_type: &MediaType) -> &mut Self {
        if let Ok(value) = HeaderValue::try_from(media_type.to_string()) {
            self.headers.insert(ACCEPT, value);
        }
        self
    }

    /// Appends a query parameter.
    pub fn query_param(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.invalidate();
        self.query.add(name, value);
        self
    }

    /// Appends a form parameter.
    pub fn form_param(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.form.add(name, value);
        self
    }

    /// Sets a path template variable. The first value set for a name wins.
    pub fn path_param(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.invalidate();
        self.path.add(name, value);
        self
    }

    /// Appends a matrix parameter to the last path segment.
    pub fn matrix_param(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.invalidate();
        self.matrix.add(name, value);
        self
    }

    /// Adds a cookie.
    pub fn cookie(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    /// Sets or clears the body.
    pub fn set_body(&mut self, body: Option<RequestBody>) -> &mut Self {
        self.body = body;
        self
    }

    /// Sets the body.
    pub fn body_entity(&mut self, content_type: MediaType, entity: Entity) -> &mut Self {
        self.set_body(Some(RequestBody {
            entity,
            content_type,
        }))
    }

    fn invalidate(&mut self) {
        self.final_uri.take();
    }

    /// The final URI.
    ///
    /// Matrix parameters are merged into the last path segment and the query
    /// string is appended before path template variables are substituted.
    /// The result is computed once and cached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] if a template variable has no value and
    /// [`Error::InvalidUrl`] if the result is not a valid URL.
    pub fn uri(&self) -> Result<&Url> {
        if let Some(uri) = self.final_uri.get() {
            return Ok(uri);
        }
        let uri = self.build_uri()?;
        Ok(self.final_uri.get_or_init(|| uri))
    }

    fn build_uri(&self) -> Result<Url> {
        let mut uri = self.uri_template.clone();

        for (name, value) in self.matrix.pairs() {
            uri.push(';');
            uri.push_str(&utf8_percent_encode(name, MATRIX_VALUE).to_string());
            uri.push('=');
            uri.push_str(&utf8_percent_encode(value, MATRIX_VALUE).to_string());
        }

        if !self.query.is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.query.pairs())
                .finish();
            uri.push(if uri.contains('?') { '&' } else { '?' });
            uri.push_str(&query);
        }

        let resolved = resolve_template(&uri, |name| {
            self.path
                .first(name)
                .map(|value| utf8_percent_encode(value, PATH_VALUE).to_string())
        })?;

        Ok(Url::parse(&resolved)?)
    }

    /// Produces the wire form of this request.
    ///
    /// Form parameters are encoded as `application/x-www-form-urlencoded`;
    /// a body is encoded by the writer the registry selects for its type and
    /// content type. Cookies are folded into a single `Cookie` header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] when both form parameters and a body are set or
    /// when a `GET` request carries a body, [`Error::NoWriter`] when no writer
    /// accepts the body, and any error from [`uri`](Self::uri).
    pub fn to_wire(&self, providers: &ProviderRegistry) -> Result<WireRequest> {
        if self.body.is_some() && !self.form.is_empty() {
            return Err(Error::Usage(
                "You cannot send both form parameters and an entity body".to_string(),
            ));
        }
        if self.body.is_some() && self.method == Method::GET {
            return Err(Error::Usage("A GET request cannot have a body.".to_string()));
        }

        let url = self.uri()?.clone();
        let mut headers = self.headers.clone();

        if !self.cookies.is_empty() {
            let cookie = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; ");
            let value = HeaderValue::try_from(cookie)
                .map_err(|e| Error::Usage(format!("Invalid cookie value: {}", e)))?;
            headers.append(COOKIE, value);
        }

        let body = if let Some(body) = &self.body {
            let writer = providers
                .writer(body.entity.type_info(), &body.content_type)
                .ok_or_else(|| Error::NoWriter {
                    media_type: body.content_type.to_string(),
                    type_name: body.entity.type_info().name(),
                })?;
            let bytes = writer
                .write_to(&body.entity, &body.content_type, &mut headers)
                .map_err(|e| Error::SerializationFailed(e.to_string()))?;
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, header_value(&body.content_type)?);
            }
            Some(bytes)
        } else if !self.form.is_empty() {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.form.pairs())
                .finish();
            headers.insert(CONTENT_TYPE, header_value(&MediaType::FORM_URLENCODED)?);
            Some(encoded.into())
        } else {
            None
        };

        Ok(WireRequest {
            method: self.method.clone(),
            url,
            headers,
            body,
        })
    }
}

fn header_value(media_type: &MediaType) -> Result<HeaderValue> {
    HeaderValue::try_from(media_type.to_string())
        .map_err(|e| Error::Usage(format!("Invalid media type header: {}", e)))
}

/// Replaces every `{name}` (or `{name: regex}`) in `template` with the value
/// `lookup` returns for it.
pub(crate) fn resolve_template<F>(template: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut resolved = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        resolved.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = closing_brace(after)
            .ok_or_else(|| Error::Usage(format!("Unterminated template variable in {}", template)))?;
        let variable = &after[..end];
        let name = variable.split(':').next().unwrap_or(variable).trim();
        let value = lookup(name).ok_or_else(|| {
            Error::Usage(format!("No value supplied for path parameter {{{}}} in {}", name, template))
        })?;
        resolved.push_str(&value);
        rest = &after[end + 1..];
    }
    resolved.push_str(rest);
    Ok(resolved)
}

/// The index of the `}` closing a variable whose body starts at `text`.
/// Braces nested inside a regex, as in `{id: [0-9]{3}}`, are skipped.
fn closing_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Percent-encodes a value for use inside a path template.
pub(crate) fn encode_path_value(value: &str) -> String {
    utf8_percent_encode(value, PATH_VALUE).to_string()
}

/// Joins path fragments with exactly one `/` between them.
pub(crate) fn join_path(base: &str, segment: &str) -> String {
    let segment = segment.trim_start_matches('/');
    if segment.is_empty() {
        return base.to_string();
    }
    if base.ends_with('/') {
        format!("{}{}", base, segment)
    } else {
        format!("{}/{}", base, segment)
    }
}

/// A hook that may inspect or adjust every request before it is dispatched.
///
/// Filters run in registration order, after marshalling.
///
/// # Examples
///
/// ```
/// use restgen::request::{ClientRequest, RequestFilter};
///
/// struct Tracing;
///
/// impl RequestFilter for Tracing {
///     fn filter(&self, request: &mut ClientRequest) -> restgen::Result<()> {
///         request.header("X-Trace-Id", "abc123")?;
///         Ok(())
///     }
/// }
/// ```
pub trait RequestFilter: Send + Sync {
    /// Adjusts the request.
    ///
    /// # Errors
    ///
    /// An error aborts the call before anything is sent.
    fn filter(&self, request: &mut ClientRequest) -> Result<()>;
}

impl<F> RequestFilter for F
where
    F: Fn(&mut ClientRequest) -> Result<()> + Send + Sync,
{
    fn filter(&self, request: &mut ClientRequest) -> Result<()> {
        self(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;

    #[test]
    fn test_query_values_accumulate() {
        let mut request = ClientRequest::new(Method::GET, "http://localhost/frob");
        request.query_param("tag", "red");
        request.query_param("tag", "blue");
        request.query_param("q", "a&b");

        assert_eq!(
            request.uri().unwrap().as_str(),
            "http://localhost/frob?tag=red&tag=blue&q=a%26b"
        );
    }

    #[test]
    fn test_matrix_then_query_then_path() {
        let mut request = ClientRequest::new(Method::GET, "http://localhost/frob/{id}");
        request.matrix_param("color", "red");
        request.query_param("page", "1");
        request.path_param("id", "abc");

        assert_eq!(
            request.uri().unwrap().as_str(),
            "http://localhost/frob/abc;color=red?page=1"
        );
    }

    #[test]
    fn test_path_values_keep_slashes() {
        let mut request = ClientRequest::new(Method::GET, "http://localhost/files/{path: .+}");
        request.path_param("path", "a/b c");
        assert_eq!(request.uri().unwrap().as_str(), "http://localhost/files/a/b%20c");
    }

    #[test]
    fn test_regex_variable_with_quantifier_braces() {
        let mut request = ClientRequest::new(Method::GET, "http://localhost/frob/{id: [0-9]{3}}/parts");
        request.path_param("id", "123");
        assert_eq!(request.uri().unwrap().as_str(), "http://localhost/frob/123/parts");

        let unterminated = ClientRequest::new(Method::GET, "http://localhost/frob/{id: [0-9]{3}");
        assert!(matches!(unterminated.uri(), Err(Error::Usage(_))));
    }

    #[test]
    fn test_unresolved_template_is_usage_error() {
        let request = ClientRequest::new(Method::GET, "http://localhost/frob/{id}");
        assert!(matches!(request.uri(), Err(Error::Usage(_))));
    }

    #[test]
    fn test_uri_is_memoized_until_changed() {
        let mut request = ClientRequest::new(Method::GET, "http://localhost/frob");
        let first = request.uri().unwrap() as *const Url;
        let second = request.uri().unwrap() as *const Url;
        assert_eq!(first, second);

        request.query_param("page", "2");
        assert_eq!(request.uri().unwrap().query(), Some("page=2"));
    }

    #[test]
    fn test_form_and_body_conflict() {
        let providers = ProviderRegistry::new();
        let mut request = ClientRequest::new(Method::POST, "http://localhost/frob");
        request.form_param("name", "frob");
        request.body_entity(MediaType::TEXT_PLAIN, Entity::new(String::from("body")));

        match request.to_wire(&providers) {
            Err(Error::Usage(message)) => assert!(message.contains("form parameters")),
            other => panic!("Expected usage error, got {:?}", other),
        }
    }

    #[test]
    fn test_get_with_body_is_rejected() {
        let providers = ProviderRegistry::new();
        let mut request = ClientRequest::new(Method::GET, "http://localhost/frob");
        request.body_entity(MediaType::TEXT_PLAIN, Entity::new(String::from("body")));
        assert!(matches!(request.to_wire(&providers), Err(Error::Usage(_))));
    }

    #[test]
    fn test_form_body_and_cookies() {
        let providers = ProviderRegistry::new();
        let mut request = ClientRequest::new(Method::POST, "http://localhost/frob");
        request.form_param("name", "big frob");
        request.form_param("size", "2");
        request.cookie("session", "s1");
        request.cookie("theme", "dark");

        let wire = request.to_wire(&providers).unwrap();
        assert_eq!(wire.body.as_deref(), Some(&b"name=big+frob&size=2"[..]));
        assert_eq!(
            wire.headers.get(CONTENT_TYPE).unwrap(),
            "application/x-www-form-urlencoded"
        );
        assert_eq!(wire.headers.get(COOKIE).unwrap(), "session=s1; theme=dark");
    }

    #[test]
    fn test_body_is_written_by_negotiated_writer() {
        let providers = ProviderRegistry::new();
        let mut request = ClientRequest::new(Method::PUT, "http://localhost/frob");
        request.body_entity(MediaType::TEXT_PLAIN, Entity::new(String::from("hello")));

        let wire = request.to_wire(&providers).unwrap();
        assert_eq!(wire.body.as_deref(), Some(&b"hello"[..]));
        assert_eq!(wire.headers.get(CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[test]
    fn test_missing_writer() {
        struct Unknown;
        let providers = ProviderRegistry::new();
        let mut request = ClientRequest::new(Method::PUT, "http://localhost/frob");
        request.body_entity(MediaType::APPLICATION_JSON, Entity::new(Unknown));
        assert!(matches!(request.to_wire(&providers), Err(Error::NoWriter { .. })));
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("http://h/api", "/frob"), "http://h/api/frob");
        assert_eq!(join_path("http://h/api/", "frob"), "http://h/api/frob");
        assert_eq!(join_path("http://h/api", ""), "http://h/api");
    }
}
