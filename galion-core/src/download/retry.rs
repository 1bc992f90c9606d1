//! Backoff policy for transport-level retries within a single download
//! attempt (distinct from the queue's job-level retry/requeue policy).

use std::time::Duration;

use rand::Rng;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const MAX_JITTER_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    Transient,
    Permanent,
    NeedsAuth,
    RateLimited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration, attempt: u32 },
    DoNotRetry { reason: &'static str },
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether attempt `attempt` (0-indexed, the attempt that just
    /// failed) should be followed by another try, and after how long.
    /// Permanent and auth failures never retry; transient and rate-limited
    /// failures retry until `max_attempts` is exhausted.
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => RetryDecision::DoNotRetry {
                reason: "permanent failure",
            },
            FailureType::NeedsAuth => RetryDecision::DoNotRetry {
                reason: "authentication required",
            },
            FailureType::Transient | FailureType::RateLimited => {
                if attempt + 1 >= self.max_attempts {
                    return RetryDecision::DoNotRetry {
                        reason: "max attempts exhausted",
                    };
                }
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let scaled = self.base_delay.as_secs_f64()
                    * self.backoff_multiplier.powi(exponent);
                let capped = scaled.min(self.max_delay.as_secs_f64());
                let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER_MS);
                let delay = Duration::from_secs_f64(capped) + Duration::from_millis(jitter_ms);
                RetryDecision::Retry {
                    delay,
                    attempt: attempt + 1,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_failure_never_retries() {
        let policy = RetryPolicy::new();
        let decision = policy.should_retry(FailureType::Permanent, 0);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn needs_auth_never_retries() {
        let policy = RetryPolicy::new();
        let decision = policy.should_retry(FailureType::NeedsAuth, 0);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn transient_retries_until_exhausted() {
        let policy = RetryPolicy::with_max_attempts(2);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 0),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn backoff_delay_grows_with_attempt() {
        let policy = RetryPolicy::with_max_attempts(5);
        let RetryDecision::Retry { delay: first, .. } =
            policy.should_retry(FailureType::Transient, 0)
        else {
            panic!("expected retry");
        };
        let RetryDecision::Retry { delay: second, .. } =
            policy.should_retry(FailureType::Transient, 1)
        else {
            panic!("expected retry");
        };
        assert!(second >= first);
    }
}
