use std::{fmt, time::Duration};

use reqwest::{header::HeaderMap, Method};
use serde_json::{Map, Value};

use crate::classify::{predicates, Classifier, Predicate};

/// Billing project attached to a request when user project override is on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BillingProject {
    /// No project header.
    #[default]
    Unset,
    /// Bill the named project for the call.
    Project(String),
    /// Send the project header with an empty value, which tells the API not
    /// to apply any override even though overrides are enabled.
    NoOverride,
}

impl From<&str> for BillingProject {
    fn from(value: &str) -> Self {
        Self::Project(value.to_owned())
    }
}

impl From<String> for BillingProject {
    fn from(value: String) -> Self {
        Self::Project(value)
    }
}

/// One outbound API call.
///
/// The retry list starts with [`predicates::defaults`]; use
/// [`RequestDescription::clear_retry_predicates`] to opt out.
#[derive(Clone)]
pub struct RequestDescription {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) body: Option<Value>,
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: Option<Duration>,
    pub(crate) project: BillingProject,
    pub(crate) user_agent: Option<String>,
    pub(crate) retry_predicates: Vec<Predicate>,
    pub(crate) abort_predicates: Vec<Predicate>,
    pub(crate) backoff_predicates: Vec<Predicate>,
}

impl fmt::Debug for RequestDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescription")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("body", &self.body.is_some())
            .field("timeout", &self.timeout)
            .field("project", &self.project)
            .field("retry_predicates", &self.retry_predicates.len())
            .field("abort_predicates", &self.abort_predicates.len())
            .field("backoff_predicates", &self.backoff_predicates.len())
            .finish()
    }
}

impl RequestDescription {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: HeaderMap::new(),
            timeout: None,
            project: BillingProject::Unset,
            user_agent: None,
            retry_predicates: predicates::defaults(),
            abort_predicates: Vec::new(),
            backoff_predicates: Vec::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the retry sequence timeout, measured from the first attempt.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_project(mut self, project: impl Into<BillingProject>) -> Self {
        self.project = project.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn retry_on(mut self, predicate: Predicate) -> Self {
        self.retry_predicates.push(predicate);
        self
    }

    pub fn abort_on(mut self, predicate: Predicate) -> Self {
        self.abort_predicates.push(predicate);
        self
    }

    pub fn retry_with_backoff_on(mut self, predicate: Predicate) -> Self {
        self.backoff_predicates.push(predicate);
        self
    }

    pub fn clear_retry_predicates(mut self) -> Self {
        self.retry_predicates.clear();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn project(&self) -> &BillingProject {
        &self.project
    }

    /// Builds the classifier of one retry sequence for this request.
    pub(crate) fn classifier(&self) -> Classifier {
        Classifier::new(
            self.retry_predicates.clone(),
            self.abort_predicates.clone(),
            self.backoff_predicates.clone(),
        )
    }
}

/// Terminal result of a successful request.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Decoded JSON object body.
    Json(Map<String, Value>),
    /// HTTP 204; the body was not read.
    NoContent,
}

impl Outcome {
    pub fn is_no_content(&self) -> bool {
        matches!(self, Self::NoContent)
    }

    pub fn into_json(self) -> Option<Map<String, Value>> {
        match self {
            Self::Json(map) => Some(map),
            Self::NoContent => None,
        }
    }
}
