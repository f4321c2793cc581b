use std::{future::Future, time::Duration};

use tokio::time::{self, Instant};

use crate::{
    classify::{Classifier, Decision},
    Result, TransportError,
};

/// Runs `work` until it succeeds, the classifier aborts, or `timeout` has
/// elapsed since the first attempt.
///
/// Attempts are strictly sequential. Each attempt only gets the time left
/// in the sequence; one still running at the deadline is dropped. Between
/// retryable failures the loop sleeps for the delay chosen by the
/// classifier, cut short at the deadline. Running out of time yields
/// [`TransportError::DeadlineExceeded`] wrapping the last failure, or
/// [`TransportError::AttemptStalled`] when no attempt finished at all.
#[cfg_attr(not(feature = "tracing"), allow(unused_assignments, unused_variables))]
pub async fn run_with_retry<T, F, Fut>(
    timeout: Duration,
    classifier: &mut Classifier,
    mut work: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    let mut last: Option<TransportError> = None;

    loop {
        attempt += 1;
        let remaining = timeout.saturating_sub(started.elapsed());
        let err = match time::timeout(remaining, work()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(_) => {
                let last = last.take().unwrap_or_else(|| TransportError::AttemptStalled {
                    elapsed: started.elapsed(),
                });
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    attempt,
                    timeout_ms = timeout.as_millis() as u64,
                    error = %last,
                    "retry deadline exceeded while an attempt was in flight"
                );
                return Err(TransportError::DeadlineExceeded {
                    timeout,
                    last: Box::new(last),
                });
            }
        };

        let classification = classifier.classify(&err);
        let delay = match classification.decision {
            Decision::Abort => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    attempt,
                    reason = classification.reason.as_deref().unwrap_or("not retryable"),
                    error = %err,
                    "giving up on request"
                );
                return Err(err);
            }
            Decision::RetryAfter(delay) => delay,
        };

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                attempt,
                timeout_ms = timeout.as_millis() as u64,
                error = %err,
                "retry deadline exceeded"
            );
            return Err(TransportError::DeadlineExceeded {
                timeout,
                last: Box::new(err),
            });
        }

        let delay = delay.min(timeout - elapsed);
        #[cfg(feature = "tracing")]
        tracing::debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            reason = classification.reason.as_deref().unwrap_or_default(),
            error = %err,
            "retrying request"
        );
        time::sleep(delay).await;
        last = Some(err);
    }
}
