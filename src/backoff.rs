//! Exponential backoff with full jitter.
//!
//! Each delay is drawn uniformly from `[minimum, min(maximum, minimum * 2^attempts)]`.

use std::time::Duration;

use rand::Rng;

/// Delay bounds for plain retries.
pub const STANDARD_MINIMUM: Duration = Duration::from_millis(500);
pub const STANDARD_MAXIMUM: Duration = Duration::from_secs(10);

/// Delay bounds for the private state of each backoff predicate.
pub const PREDICATE_MINIMUM: Duration = Duration::from_millis(200);
pub const PREDICATE_MAXIMUM: Duration = Duration::from_secs(60);

/// Attempt counter of one retry sequence.
///
/// Owned by exactly one sequence (or one predicate within it); never shared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffState {
    attempts: u32,
    last_sleep: Duration,
    minimum: Duration,
    maximum: Duration,
}

impl BackoffState {
    pub fn new(minimum: Duration, maximum: Duration) -> Self {
        Self {
            attempts: 0,
            last_sleep: Duration::ZERO,
            minimum,
            maximum: maximum.max(minimum),
        }
    }

    pub fn standard() -> Self {
        Self::new(STANDARD_MINIMUM, STANDARD_MAXIMUM)
    }

    pub fn for_predicate() -> Self {
        Self::new(PREDICATE_MINIMUM, PREDICATE_MAXIMUM)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_sleep(&self) -> Duration {
        self.last_sleep
    }

    pub fn minimum(&self) -> Duration {
        self.minimum
    }

    pub fn maximum(&self) -> Duration {
        self.maximum
    }

    /// Upper bound of the jitter interval for the next delay.
    pub fn upper_bound(&self) -> Duration {
        let minimum = duration_nanos(self.minimum);
        let maximum = duration_nanos(self.maximum);
        let exp = self.attempts.min(63);
        let grown = minimum.saturating_mul(1u64 << exp);
        Duration::from_nanos(grown.min(maximum).max(minimum))
    }

    /// Picks the delay for the next retry and records it.
    ///
    /// Must be called once per retryable failure.
    pub fn next_delay(&mut self) -> Duration {
        let lower = duration_nanos(self.minimum);
        let upper = duration_nanos(self.upper_bound());
        let nanos = if upper > lower {
            rand::rng().random_range(lower..=upper)
        } else {
            lower
        };

        let delay = Duration::from_nanos(nanos);
        self.attempts = self.attempts.saturating_add(1);
        self.last_sleep = delay;
        delay
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
