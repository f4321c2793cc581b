use std::time::Duration;

use serde::Deserialize;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    /// Non-success HTTP status with the structured error payload.
    #[error(transparent)]
    Api(ApiError),
    /// Response body of a non-204 response was not a JSON object.
    #[error("decode error: {0}")]
    Decode(String),
    /// Request body could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
    /// Target URL could not be parsed.
    #[error("invalid url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    /// A header value could not be encoded.
    #[error("invalid value for header {name}: {source}")]
    InvalidHeader {
        name: String,
        #[source]
        source: reqwest::header::InvalidHeaderValue,
    },
    /// No attempt had finished when the retry deadline passed.
    #[error("attempt still in flight after {elapsed:?}")]
    AttemptStalled { elapsed: Duration },
    /// Retry sequence ran out of time; carries the last observed error.
    #[error("timeout after {timeout:?}, last error: {last}")]
    DeadlineExceeded {
        timeout: Duration,
        last: Box<TransportError>,
    },
    /// Terminal error of one request, tagged with its method and URL.
    #[error("{method} {url}: {source}")]
    Request {
        method: reqwest::Method,
        url: String,
        #[source]
        source: Box<TransportError>,
    },
    /// Terminal error tagged with the resource the caller was operating on.
    #[error("error when reading or editing {resource}: {source}")]
    Resource {
        resource: String,
        #[source]
        source: Box<TransportError>,
    },
    /// A data source lookup hit a 404.
    #[error("{url} not found")]
    NotFound { url: String },
}

impl TransportError {
    /// Returns the API error at the root of this error, looking through
    /// request/resource context and deadline wrappers.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(err) => Some(err),
            Self::DeadlineExceeded { last, .. } => last.api_error(),
            Self::Request { source, .. } | Self::Resource { source, .. } => source.api_error(),
            Self::Transport(_)
            | Self::Decode(_)
            | Self::Encode(_)
            | Self::InvalidUrl { .. }
            | Self::InvalidHeader { .. }
            | Self::AttemptStalled { .. }
            | Self::NotFound { .. } => None,
        }
    }

    /// Returns the transport error at the root of this error, if any.
    pub fn transport_error(&self) -> Option<&reqwest::Error> {
        match self {
            Self::Transport(err) => Some(err),
            Self::DeadlineExceeded { last, .. } => last.transport_error(),
            Self::Request { source, .. } | Self::Resource { source, .. } => {
                source.transport_error()
            }
            _ => None,
        }
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        match self {
            Self::DeadlineExceeded { .. } => true,
            Self::Request { source, .. } | Self::Resource { source, .. } => {
                source.is_deadline_exceeded()
            }
            _ => false,
        }
    }
}

/// Structured error returned by the API for a non-2xx response.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("api error {code}: {message}")]
pub struct ApiError {
    /// HTTP status code.
    pub code: u16,
    pub message: String,
    /// Canonical status name such as `PERMISSION_DENIED`, when present.
    pub status: Option<String>,
    pub errors: Vec<ErrorItem>,
    /// Raw response body.
    pub body: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorItem {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

impl ApiError {
    /// Builds an API error from a status code and raw response body.
    ///
    /// Bodies that are not the `{"error": {...}}` envelope keep the raw
    /// text as the message.
    pub fn from_response(status: u16, body: String) -> Self {
        match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => Self {
                code: envelope.error.code.filter(|code| *code != 0).unwrap_or(status),
                message: envelope.error.message,
                status: envelope.error.status,
                errors: envelope.error.errors,
                body,
            },
            Err(_) => Self {
                code: status,
                message: body.trim().to_owned(),
                status: None,
                errors: Vec::new(),
                body,
            },
        }
    }

    pub fn has_reason(&self, reason: &str) -> bool {
        self.errors.iter().any(|item| item.reason == reason)
    }
}

/// Reports whether `err` carries an API error with status `code`.
pub fn is_error_with_code(err: &TransportError, code: u16) -> bool {
    err.api_error().is_some_and(|api| api.code == code)
}

/// Reports whether `err` is a 403 caused by the service API not being
/// enabled for the project.
pub fn is_api_not_enabled_error(err: &TransportError) -> bool {
    err.api_error()
        .is_some_and(|api| api.code == 403 && api.has_reason("accessNotConfigured"))
}

/// Persisted identifier of the resource a caller is operating on.
pub trait ResourceState {
    fn id(&self) -> &str;
    fn clear_id(&mut self);
}

/// Treats a 404 as "the resource is gone": clears the persisted identifier
/// and returns `Ok(())`. Any other error is wrapped with `resource` and the
/// state is left untouched.
pub fn handle_not_found_error<S>(
    err: TransportError,
    state: &mut S,
    resource: &str,
) -> crate::Result<()>
where
    S: ResourceState + ?Sized,
{
    if is_error_with_code(&err, 404) {
        #[cfg(feature = "tracing")]
        tracing::warn!(resource, id = state.id(), "removing resource because it's gone");
        state.clear_id();
        return Ok(());
    }

    Err(TransportError::Resource {
        resource: resource.to_owned(),
        source: Box::new(err),
    })
}

/// Read-only counterpart of [`handle_not_found_error`] for data sources: a
/// 404 becomes [`TransportError::NotFound`] for `url`.
pub fn handle_data_source_not_found_error(
    err: TransportError,
    resource: &str,
    url: &str,
) -> TransportError {
    if is_error_with_code(&err, 404) {
        return TransportError::NotFound {
            url: url.to_owned(),
        };
    }

    TransportError::Resource {
        resource: resource.to_owned(),
        source: Box::new(err),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    struct FakeState {
        id: String,
    }

    impl ResourceState for FakeState {
        fn id(&self) -> &str {
            &self.id
        }

        fn clear_id(&mut self) {
            self.id.clear();
        }
    }

    fn api(code: u16, reason: &str) -> TransportError {
        let body = serde_json::json!({
            "error": {
                "code": code,
                "message": "denied",
                "status": "PERMISSION_DENIED",
                "errors": [{ "reason": reason, "domain": "usageLimits", "message": "denied" }]
            }
        })
        .to_string();
        TransportError::Api(ApiError::from_response(code, body))
    }

    #[test]
    fn from_response_parses_error_envelope() {
        let err = ApiError::from_response(
            403,
            r#"{"error":{"code":403,"message":"nope","errors":[{"reason":"forbidden"}]}}"#
                .to_owned(),
        );
        assert_eq!(err.code, 403);
        assert_eq!(err.message, "nope");
        assert!(err.has_reason("forbidden"));
    }

    #[test]
    fn zero_envelope_code_falls_back_to_http_status() {
        let err = ApiError::from_response(
            503,
            r#"{"error":{"code":0,"message":"unavailable"}}"#.to_owned(),
        );
        assert_eq!(err.code, 503);
        assert_eq!(err.message, "unavailable");
    }

    #[test]
    fn from_response_keeps_raw_text_for_unstructured_body() {
        let err = ApiError::from_response(502, "bad gateway\n".to_owned());
        assert_eq!(err.code, 502);
        assert_eq!(err.message, "bad gateway");
        assert!(err.errors.is_empty());
    }

    #[test]
    fn api_not_enabled_requires_403_and_reason() {
        assert!(is_api_not_enabled_error(&api(403, "accessNotConfigured")));
        assert!(!is_api_not_enabled_error(&api(403, "forbidden")));
        assert!(!is_api_not_enabled_error(&api(400, "accessNotConfigured")));
        assert!(!is_api_not_enabled_error(&TransportError::Decode("x".into())));
    }

    #[test]
    fn error_code_is_found_through_wrappers() {
        let err = TransportError::Request {
            method: reqwest::Method::GET,
            url: "https://api.test/v1/x".to_owned(),
            source: Box::new(TransportError::DeadlineExceeded {
                timeout: Duration::from_secs(1),
                last: Box::new(api(429, "rateLimitExceeded")),
            }),
        };
        assert!(is_error_with_code(&err, 429));
        assert!(!is_error_with_code(&err, 404));
        assert!(err.is_deadline_exceeded());
    }

    #[test]
    fn not_found_clears_id_and_succeeds() {
        let mut state = FakeState {
            id: "projects/p/keys/k".to_owned(),
        };
        handle_not_found_error(api(404, "notFound"), &mut state, "CryptoKey")
            .expect("404 must be treated as absence");
        assert_eq!(state.id(), "");
    }

    #[test]
    fn other_errors_keep_id_and_are_wrapped() {
        let mut state = FakeState {
            id: "projects/p/keys/k".to_owned(),
        };
        let err = handle_not_found_error(api(500, "backendError"), &mut state, "CryptoKey")
            .expect_err("500 must surface");
        assert_eq!(state.id(), "projects/p/keys/k");
        assert!(err.to_string().starts_with("error when reading or editing CryptoKey"));
        assert!(is_error_with_code(&err, 500));
    }

    #[test]
    fn data_source_not_found_names_url() {
        let err = handle_data_source_not_found_error(
            api(404, "notFound"),
            "CryptoKeys",
            "https://api.test/v1/keys",
        );
        assert_eq!(err.to_string(), "https://api.test/v1/keys not found");

        let err = handle_data_source_not_found_error(
            api(403, "forbidden"),
            "CryptoKeys",
            "https://api.test/v1/keys",
        );
        assert!(matches!(err, TransportError::Resource { .. }));
    }
}
