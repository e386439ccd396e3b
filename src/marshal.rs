//! Parameter marshalling.
//!
//! Every declared parameter is compiled into a [`Marshaller`] once, when the
//! client is built. At call time the marshaller copies its argument into the
//! request under construction.

use crate::args::Arg;
use crate::descriptor::ParamRole;
use crate::entity::Entity;
use crate::media::MediaType;
use crate::request::ClientRequest;
use crate::{Error, Result};
use http::HeaderName;

/// Writes one argument into a [`ClientRequest`].
#[derive(Debug, Clone)]
pub(crate) enum Marshaller {
    Query(String),
    Header(HeaderName),
    Cookie(String),
    Path(String),
    Matrix(String),
    Form(String),
    Body { content_type: MediaType },
}

impl Marshaller {
    /// Compiles the marshaller for a parameter role.
    ///
    /// `consumes` is the content type a body is sent as.
    pub(crate) fn compile(role: &ParamRole, consumes: &MediaType) -> Result<Self> {
        Ok(match role {
            ParamRole::Query(name) => Marshaller::Query(name.clone()),
            ParamRole::Header(name) => {
                let header = HeaderName::try_from(name.as_str())
                    .map_err(|e| Error::Usage(format!("Invalid header parameter {}: {}", name, e)))?;
                Marshaller::Header(header)
            }
            ParamRole::Cookie(name) => Marshaller::Cookie(name.clone()),
            ParamRole::Path(name) => Marshaller::Path(name.clone()),
            ParamRole::Matrix(name) => Marshaller::Matrix(name.clone()),
            ParamRole::Form(name) => Marshaller::Form(name.clone()),
            ParamRole::Body => Marshaller::Body {
                content_type: consumes.clone(),
            },
        })
    }

    /// Returns `true` for the body marshaller.
    pub(crate) fn is_body(&self) -> bool {
        matches!(self, Marshaller::Body { .. })
    }

    /// Returns `true` for form marshallers.
    pub(crate) fn is_form(&self) -> bool {
        matches!(self, Marshaller::Form(_))
    }

    fn name(&self) -> String {
        match self {
            Marshaller::Query(name)
            | Marshaller::Cookie(name)
            | Marshaller::Path(name)
            | Marshaller::Matrix(name)
            | Marshaller::Form(name) => name.clone(),
            Marshaller::Header(name) => name.to_string(),
            Marshaller::Body { .. } => "body".to_string(),
        }
    }

    /// Appends `arg` to `request`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] if a body value is passed for a non-body role
    /// or a header value is invalid.
    pub(crate) fn build(&self, request: &mut ClientRequest, arg: Arg) -> Result<()> {
        if let Marshaller::Body { content_type } = self {
            match arg {
                Arg::Null => {
                    request.set_body(None);
                }
                Arg::Entity(entity) => {
                    request.body_entity(content_type.clone(), entity);
                }
                Arg::Text(text) => {
                    request.body_entity(content_type.clone(), Entity::new(text));
                }
                Arg::List(_) => {
                    return Err(Error::Usage(
                        "A list argument cannot be sent as a request body".to_string(),
                    ));
                }
            }
            return Ok(());
        }

        let values = match arg {
            Arg::Null => return Ok(()),
            Arg::Entity(entity) => {
                return Err(Error::Usage(format!(
                    "Parameter {} cannot take a {} value",
                    self.name(),
                    entity.type_info()
                )));
            }
            Arg::Text(value) => vec![value],
            Arg::List(values) => values,
        };

        match self {
            Marshaller::Query(name) => {
                for value in values {
                    request.query_param(name.as_str(), value);
                }
            }
            Marshaller::Header(name) => {
                for value in values {
                    request.typed_header(name, &value)?;
                }
            }
            Marshaller::Cookie(name) => {
                for value in values {
                    request.cookie(name.as_str(), value);
                }
            }
            Marshaller::Path(name) => {
                if let Some(value) = values.into_iter().next() {
                    request.path_param(name.as_str(), value);
                }
            }
            Marshaller::Matrix(name) => {
                for value in values {
                    request.matrix_param(name.as_str(), value);
                }
            }
            Marshaller::Form(name) => {
                for value in values {
                    request.form_param(name.as_str(), value);
                }
            }
            Marshaller::Body { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn request() -> ClientRequest {
        ClientRequest::new(Method::POST, "http://localhost/frob/{id}")
    }

    #[test]
    fn test_lists_expand_per_element() {
        let mut request = request();
        let marshaller = Marshaller::compile(&ParamRole::query("tag"), &MediaType::APPLICATION_JSON).unwrap();
        marshaller.build(&mut request, vec!["red", "blue"].into()).unwrap();
        marshaller.build(&mut request, "green".into()).unwrap();

        assert_eq!(
            request.query_params().get("tag").unwrap(),
            &["red".to_string(), "blue".to_string(), "green".to_string()][..]
        );
    }

    #[test]
    fn test_null_is_skipped() {
        let mut request = request();
        for role in [
            ParamRole::query("q"),
            ParamRole::header("X-Frob"),
            ParamRole::cookie("c"),
            ParamRole::matrix("m"),
            ParamRole::form("f"),
        ] {
            let marshaller = Marshaller::compile(&role, &MediaType::APPLICATION_JSON).unwrap();
            marshaller.build(&mut request, Arg::Null).unwrap();
        }
        assert!(request.query_params().is_empty());
        assert!(request.headers().is_empty());
        assert!(request.cookies().is_empty());
        assert!(request.matrix_params().is_empty());
        assert!(request.form_params().is_empty());
    }

    #[test]
    fn test_null_body_clears_body() {
        let mut request = request();
        let marshaller = Marshaller::compile(&ParamRole::Body, &MediaType::TEXT_PLAIN).unwrap();

        marshaller.build(&mut request, Arg::entity(String::from("frob"))).unwrap();
        assert_eq!(request.body().unwrap().content_type, MediaType::TEXT_PLAIN);

        marshaller.build(&mut request, Arg::Null).unwrap();
        assert!(request.body().is_none());
    }

    #[test]
    fn test_entity_in_scalar_role_is_usage_error() {
        let mut request = request();
        let marshaller = Marshaller::compile(&ParamRole::query("q"), &MediaType::APPLICATION_JSON).unwrap();
        let result = marshaller.build(&mut request, Arg::Entity(Entity::new(42u8)));
        assert!(matches!(result, Err(Error::Usage(_))));
    }

    #[test]
    fn test_invalid_header_name_fails_to_compile() {
        let result = Marshaller::compile(&ParamRole::header("bad header"), &MediaType::APPLICATION_JSON);
        assert!(matches!(result, Err(Error::Usage(_))));
    }

    #[test]
    fn test_header_values_append() {
        let mut request = request();
        let marshaller = Marshaller::compile(&ParamRole::header("X-Tag"), &MediaType::APPLICATION_JSON).unwrap();
        marshaller.build(&mut request, vec!["a", "b"].into()).unwrap();
        let values: Vec<_> = request.headers().get_all("x-tag").iter().collect();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_path_takes_first_value() {
        let mut request = request();
        let marshaller = Marshaller::compile(&ParamRole::path("id"), &MediaType::APPLICATION_JSON).unwrap();
        marshaller.build(&mut request, "abc".into()).unwrap();
        assert_eq!(request.uri().unwrap().as_str(), "http://localhost/frob/abc");
    }
}
