use std::{fmt, time::Duration};

use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Method, Response, StatusCode,
};
use serde_json::{Map, Value};

use crate::{
    backoff::BackoffState,
    query::add_query_params,
    retry::run_with_retry,
    ApiError, BillingProject, Outcome, RequestDescription, Result, TransportError,
    TransportOptions,
};

/// Header naming the project billed for a call.
pub const USER_PROJECT_HEADER: &str = "x-goog-user-project";

#[derive(Clone)]
/// Sends API requests with retry, backoff and error classification.
///
/// Cheap to clone; clones share the underlying connection pool.
pub struct Transport {
    http: reqwest::Client,
    options: TransportOptions,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("options", &self.options)
            .finish()
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    /// Creates a transport with an unauthenticated client.
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Creates a transport around a prepared (usually authenticated) client.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            options: TransportOptions::default(),
        }
    }

    /// Creates a transport configured from environment variables.
    ///
    /// Reads:
    /// - `CLOUDAPI_USER_AGENT` — default `User-Agent` (optional)
    /// - `CLOUDAPI_USER_PROJECT_OVERRIDE` — `true`/`1` to send billing project headers
    /// - `CLOUDAPI_REQUEST_TIMEOUT_SECS` — retry sequence timeout in seconds
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> std::result::Result<Self, String> {
        let options = options_from_vars(|name| std::env::var(name).ok())?;
        Ok(Self::new().with_options(options))
    }

    /// Applies transport options such as timeouts and retry backoff.
    pub fn with_options(mut self, opts: TransportOptions) -> Self {
        self.options = opts;
        self
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Performs `request` and returns its decoded outcome.
    ///
    /// Retryable failures are retried until the request timeout (5 minutes
    /// unless set) runs out. A 204 yields [`Outcome::NoContent`] without
    /// reading the body. Terminal errors are wrapped in
    /// [`TransportError::Request`] with the method and URL.
    pub async fn send_request(&self, request: &RequestDescription) -> Result<Outcome> {
        self.send(request)
            .await
            .map_err(|source| TransportError::Request {
                method: request.method.clone(),
                url: request.url.clone(),
                source: Box::new(source),
            })
    }

    async fn send(&self, request: &RequestDescription) -> Result<Outcome> {
        let headers = self.request_headers(request)?;
        let body = request
            .body
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(TransportError::Encode)?;
        let url = add_query_params(&request.url, [("alt", "json")])?;
        let timeout = request.timeout.unwrap_or(self.options.request_timeout);

        let mut classifier = request.classifier().with_standard_backoff(BackoffState::new(
            Duration::from_millis(self.options.retry_backoff_ms),
            Duration::from_millis(self.options.max_retry_backoff_ms),
        ));

        let method = &request.method;
        let url = url.as_str();
        let headers = &headers;
        let body = body.as_deref();
        let response = run_with_retry(timeout, &mut classifier, move || {
            self.attempt(method, url, headers, body)
        })
        .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Outcome::NoContent);
        }

        let bytes = response.bytes().await.map_err(TransportError::Transport)?;
        serde_json::from_slice::<Map<String, Value>>(&bytes)
            .map(Outcome::Json)
            .map_err(|err| {
                TransportError::Decode(format!(
                    "invalid response JSON: {err}; body: {}",
                    String::from_utf8_lossy(&bytes)
                ))
            })
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<Response> {
        let mut builder = self
            .http
            .request(method.clone(), url)
            .headers(headers.clone());
        if let Some(timeout_ms) = self.options.attempt_timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(body) = body {
            builder = builder.body(body.to_vec());
        }

        let response = builder.send().await.map_err(TransportError::Transport)?;
        check_response(response).await
    }

    fn request_headers(&self, request: &RequestDescription) -> Result<HeaderMap> {
        let mut headers = request.headers.clone();

        let user_agent = request
            .user_agent
            .as_deref()
            .unwrap_or(&self.options.user_agent);
        headers.insert(header::USER_AGENT, header_value(header::USER_AGENT, user_agent)?);
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        if self.options.user_project_override {
            match &request.project {
                BillingProject::Project(project) if !project.is_empty() => {
                    let name = HeaderName::from_static(USER_PROJECT_HEADER);
                    let value = header_value(name.clone(), project)?;
                    headers.insert(name, value);
                }
                BillingProject::NoOverride => {
                    headers.insert(
                        HeaderName::from_static(USER_PROJECT_HEADER),
                        HeaderValue::from_static(""),
                    );
                }
                BillingProject::Project(_) | BillingProject::Unset => {}
            }
        }

        Ok(headers)
    }
}

/// Turns a non-2xx response into an [`ApiError`]. The body is consumed
/// either way the error goes, so the connection is released.
async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.map_err(TransportError::Transport)?;
    Err(TransportError::Api(ApiError::from_response(
        status.as_u16(),
        body,
    )))
}

fn header_value(name: HeaderName, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|source| TransportError::InvalidHeader {
        name: name.to_string(),
        source,
    })
}

fn options_from_vars<F>(get: F) -> std::result::Result<TransportOptions, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut options = TransportOptions::default();

    if let Some(user_agent) = get("CLOUDAPI_USER_AGENT").filter(|v| !v.trim().is_empty()) {
        options.user_agent = user_agent.trim().to_owned();
    }

    if let Some(flag) = get("CLOUDAPI_USER_PROJECT_OVERRIDE") {
        options.user_project_override = match flag.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "" | "0" | "false" | "no" => false,
            other => {
                return Err(format!(
                    "CLOUDAPI_USER_PROJECT_OVERRIDE must be a boolean, got '{other}'"
                ))
            }
        };
    }

    if let Some(secs) = get("CLOUDAPI_REQUEST_TIMEOUT_SECS") {
        let secs = secs.trim().parse::<u64>().map_err(|err| {
            format!("CLOUDAPI_REQUEST_TIMEOUT_SECS must be a whole number of seconds: {err}")
        })?;
        options.request_timeout = Duration::from_secs(secs);
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use reqwest::header::{self, HeaderMap, HeaderValue};

    use super::{options_from_vars, Transport, USER_PROJECT_HEADER};
    use crate::{BillingProject, RequestDescription, TransportOptions, DEFAULT_REQUEST_TIMEOUT};

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn transport(user_project_override: bool) -> Transport {
        Transport::new().with_options(TransportOptions {
            user_agent: "provider/1.0".to_owned(),
            user_project_override,
            ..TransportOptions::default()
        })
    }

    #[test]
    fn headers_carry_user_agent_and_content_type() {
        let mut custom = HeaderMap::new();
        custom.insert("x-custom", HeaderValue::from_static("1"));
        let request = RequestDescription::get("https://api.test").with_headers(custom);

        let headers = transport(false).request_headers(&request).expect("valid headers");
        assert_eq!(headers[header::USER_AGENT], "provider/1.0");
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(headers["x-custom"], "1");
    }

    #[test]
    fn request_user_agent_overrides_default() {
        let request = RequestDescription::get("https://api.test").with_user_agent("custom/2");
        let headers = transport(false).request_headers(&request).expect("valid headers");
        assert_eq!(headers[header::USER_AGENT], "custom/2");
    }

    #[test]
    fn project_header_follows_override_setting() {
        let request = RequestDescription::get("https://api.test").with_project("billing-proj");

        let headers = transport(false).request_headers(&request).expect("valid headers");
        assert!(!headers.contains_key(USER_PROJECT_HEADER));

        let headers = transport(true).request_headers(&request).expect("valid headers");
        assert_eq!(headers[USER_PROJECT_HEADER], "billing-proj");
    }

    #[test]
    fn no_override_sends_empty_project_header() {
        let request =
            RequestDescription::get("https://api.test").with_project(BillingProject::NoOverride);
        let headers = transport(true).request_headers(&request).expect("valid headers");
        assert_eq!(headers[USER_PROJECT_HEADER], "");
    }

    #[test]
    fn empty_or_unset_project_sends_nothing() {
        for project in [BillingProject::Unset, BillingProject::Project(String::new())] {
            let request = RequestDescription::get("https://api.test").with_project(project);
            let headers = transport(true).request_headers(&request).expect("valid headers");
            assert!(!headers.contains_key(USER_PROJECT_HEADER));
        }
    }

    #[test]
    fn invalid_user_agent_is_rejected() {
        let request = RequestDescription::get("https://api.test").with_user_agent("bad\nagent");
        assert!(transport(false).request_headers(&request).is_err());
    }

    #[test]
    fn options_from_vars_reads_all_settings() {
        let options = options_from_vars(vars(&[
            ("CLOUDAPI_USER_AGENT", "provider/9"),
            ("CLOUDAPI_USER_PROJECT_OVERRIDE", "TRUE"),
            ("CLOUDAPI_REQUEST_TIMEOUT_SECS", "90"),
        ]))
        .expect("valid vars");
        assert_eq!(options.user_agent, "provider/9");
        assert!(options.user_project_override);
        assert_eq!(options.request_timeout, Duration::from_secs(90));
    }

    #[test]
    fn options_from_vars_defaults_when_unset() {
        let options = options_from_vars(vars(&[])).expect("defaults");
        assert_eq!(options, TransportOptions::default());
        assert_eq!(options.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn options_from_vars_rejects_garbage() {
        assert!(options_from_vars(vars(&[("CLOUDAPI_REQUEST_TIMEOUT_SECS", "soon")])).is_err());
        assert!(options_from_vars(vars(&[("CLOUDAPI_USER_PROJECT_OVERRIDE", "maybe")])).is_err());
    }

    #[test]
    fn user_project_header_name_is_valid() {
        let name = reqwest::header::HeaderName::from_static(USER_PROJECT_HEADER);
        assert_eq!(name.as_str(), "x-goog-user-project");
    }

    #[test]
    fn debug_shows_options() {
        let debug = format!("{:?}", transport(true));
        assert!(debug.contains("user_project_override: true"));
    }
}
