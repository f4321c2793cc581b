use std::{fmt, sync::Arc, time::Duration};

use crate::{backoff::BackoffState, TransportError};

/// Examines an error and returns a reason when it matches.
pub trait ErrorPredicate: Send + Sync {
    fn check(&self, err: &TransportError) -> Option<String>;
}

impl<F> ErrorPredicate for F
where
    F: Fn(&TransportError) -> Option<String> + Send + Sync,
{
    fn check(&self, err: &TransportError) -> Option<String> {
        self(err)
    }
}

pub type Predicate = Arc<dyn ErrorPredicate>;

/// What the retry loop should do with a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Surface the error now.
    Abort,
    /// Attempt again after the delay.
    RetryAfter(Duration),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub decision: Decision,
    pub reason: Option<String>,
}

impl Classification {
    fn abort(reason: Option<String>) -> Self {
        Self {
            decision: Decision::Abort,
            reason,
        }
    }

    fn retry(delay: Duration, reason: String) -> Self {
        Self {
            decision: Decision::RetryAfter(delay),
            reason: Some(reason),
        }
    }

    pub fn is_abort(&self) -> bool {
        self.decision == Decision::Abort
    }
}

/// Ordered predicate lists of one retry sequence.
///
/// Every backoff predicate owns a private [`BackoffState`], so repeated
/// matches through the same predicate grow its delay while other predicates
/// start fresh.
pub struct Classifier {
    retry: Vec<Predicate>,
    abort: Vec<Predicate>,
    backoff: Vec<(Predicate, BackoffState)>,
    standard: BackoffState,
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("retry", &self.retry.len())
            .field("abort", &self.abort.len())
            .field(
                "backoff",
                &self.backoff.iter().map(|(_, state)| state).collect::<Vec<_>>(),
            )
            .field("standard", &self.standard)
            .finish()
    }
}

impl Classifier {
    pub fn new(retry: Vec<Predicate>, abort: Vec<Predicate>, backoff: Vec<Predicate>) -> Self {
        Self {
            retry,
            abort,
            backoff: backoff
                .into_iter()
                .map(|predicate| (predicate, BackoffState::for_predicate()))
                .collect(),
            standard: BackoffState::standard(),
        }
    }

    /// Replaces the state used for plain retries.
    pub fn with_standard_backoff(mut self, state: BackoffState) -> Self {
        self.standard = state;
        self
    }

    /// Replaces the initial state of every backoff predicate.
    pub fn with_predicate_backoff(mut self, state: BackoffState) -> Self {
        for (_, own) in &mut self.backoff {
            *own = state.clone();
        }
        self
    }

    pub fn standard_state(&self) -> &BackoffState {
        &self.standard
    }

    pub fn predicate_states(&self) -> impl Iterator<Item = &BackoffState> {
        self.backoff.iter().map(|(_, state)| state)
    }

    /// Decides the fate of a failed attempt. Abort predicates win over retry
    /// predicates, which win over backoff predicates; an error nobody claims
    /// is terminal.
    pub fn classify(&mut self, err: &TransportError) -> Classification {
        if let Some(reason) = first_match(&self.abort, err) {
            return Classification::abort(Some(reason));
        }

        if let Some(reason) = first_match(&self.retry, err) {
            let delay = self.standard.next_delay();
            return Classification::retry(delay, reason);
        }

        for (predicate, state) in &mut self.backoff {
            if let Some(reason) = predicate.check(err) {
                let delay = state.next_delay();
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    attempts = state.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "retryable error with backoff"
                );
                return Classification::retry(delay, reason);
            }
        }

        Classification::abort(None)
    }
}

fn first_match(predicates: &[Predicate], err: &TransportError) -> Option<String> {
    predicates.iter().find_map(|predicate| predicate.check(err))
}

/// Predicates callers compose into their retry, abort and backoff lists.
pub mod predicates {
    use std::sync::Arc;

    use super::Predicate;
    use crate::TransportError;

    const RATE_LIMIT_REASONS: [&str; 3] =
        ["rateLimitExceeded", "userRateLimitExceeded", "quotaExceeded"];

    /// Retry predicates every request starts with.
    pub fn defaults() -> Vec<Predicate> {
        vec![transport_failure(), rate_limited(), server_error()]
    }

    pub fn rate_limited() -> Predicate {
        Arc::new(|err: &TransportError| {
            let api = err.api_error()?;
            if api.code == 429 {
                return Some("429 too many requests".to_owned());
            }
            if api.code == 403 {
                let reason = RATE_LIMIT_REASONS
                    .iter()
                    .find(|reason| api.has_reason(reason))?;
                return Some(format!("403 with reason {reason}"));
            }
            None
        })
    }

    pub fn server_error() -> Predicate {
        Arc::new(|err: &TransportError| {
            let api = err.api_error()?;
            matches!(api.code, 500 | 502 | 503 | 504)
                .then(|| format!("{} server error: {}", api.code, api.message))
        })
    }

    /// Failures below HTTP: connect errors, timeouts, broken requests.
    pub fn transport_failure() -> Predicate {
        Arc::new(|err: &TransportError| {
            let inner = err.transport_error()?;
            (inner.is_timeout() || inner.is_connect() || inner.is_request() || inner.is_body())
                .then(|| format!("transport failure: {inner}"))
        })
    }

    pub fn api_error_with_code(code: u16) -> Predicate {
        Arc::new(move |err: &TransportError| {
            let api = err.api_error()?;
            (api.code == code).then(|| format!("api error {code}: {}", api.message))
        })
    }

    /// Matches an API-defined error by status and reason, e.g. a resource
    /// that is not ready yet.
    pub fn api_error_reason(code: u16, reason: impl Into<String>) -> Predicate {
        let reason = reason.into();
        Arc::new(move |err: &TransportError| {
            let api = err.api_error()?;
            (api.code == code && api.has_reason(&reason))
                .then(|| format!("api error {code} with reason {reason}"))
        })
    }
}
