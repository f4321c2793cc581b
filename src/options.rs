use std::time::Duration;

/// Sequence-wide timeout applied when a request does not set its own.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Configures headers, timeouts and retry behavior of a [`crate::Transport`].
///
/// Read-only once the transport is built; shared by every request it sends.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransportOptions {
    /// Default `User-Agent` header value.
    pub user_agent: String,
    /// Send the billing project header on requests that name a project.
    pub user_project_override: bool,
    /// Retry sequence timeout for requests that do not set one.
    pub request_timeout: Duration,
    /// Per-attempt HTTP timeout in milliseconds; `None` leaves it to the client.
    pub attempt_timeout_ms: Option<u64>,
    /// Minimum delay between plain retries in milliseconds.
    pub retry_backoff_ms: u64,
    /// Maximum delay between plain retries in milliseconds.
    pub max_retry_backoff_ms: u64,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            user_agent: concat!("cloudapi-http/", env!("CARGO_PKG_VERSION")).to_owned(),
            user_project_override: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            attempt_timeout_ms: None,
            retry_backoff_ms: 500,
            max_retry_backoff_ms: 10_000,
        }
    }
}
