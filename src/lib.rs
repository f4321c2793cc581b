//! `cloudapi-http` is the request transport of a cloud provider REST client.
//!
//! Every API call goes through [`Transport::send_request`], which:
//! - sets `User-Agent`, `Content-Type` and the billing project header,
//! - appends `alt=json` and sends the JSON body,
//! - retries failures selected by the request's predicates with
//!   exponential backoff and full jitter until the request timeout,
//! - returns the decoded JSON object, [`Outcome::NoContent`] for a 204,
//!   or a [`TransportError`] tagged with the method and URL.
//!
//! Lower-level pieces ([`BackoffState`], [`Classifier`], [`run_with_retry`])
//! are public for callers that drive their own work through the same policy.

mod backoff;
mod classify;
mod error;
mod options;
mod query;
mod request;
mod retry;
mod transport;

pub use backoff::BackoffState;
pub use classify::{predicates, Classification, Classifier, Decision, ErrorPredicate, Predicate};
pub use error::{
    handle_data_source_not_found_error, handle_not_found_error, is_api_not_enabled_error,
    is_error_with_code, ApiError, ErrorItem, ResourceState, TransportError,
};
pub use options::{TransportOptions, DEFAULT_REQUEST_TIMEOUT};
pub use query::{add_array_query_params, add_query_params};
pub use request::{BillingProject, Outcome, RequestDescription};
pub use retry::run_with_retry;
pub use transport::{Transport, USER_PROJECT_HEADER};

pub type Result<T> = std::result::Result<T, TransportError>;
