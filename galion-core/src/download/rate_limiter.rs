//! Per-key (domain or platform id) request spacing.
//!
//! `DomainState` is wrapped in `Arc` so the `DashMap` shard lock is never
//! held across an `.await` — only the per-key `Mutex` is, matching the
//! teacher's rationale in `download/rate_limiter.rs`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;

const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

struct KeyState {
    last_request: Mutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
}

impl KeyState {
    fn new() -> Self {
        Self {
            last_request: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }
}

fn delay_for_rpm(requests_per_minute: u32) -> Duration {
    if requests_per_minute == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(60.0 / f64::from(requests_per_minute))
    }
}

/// Spaces out requests to the same key (domain, or platform id for
/// handler-level rate limiting) by a minimum delay, and can be told to
/// honour a server-supplied `Retry-After` for subsequent requests.
pub struct RateLimiter {
    default_delay: Duration,
    disabled: bool,
    keys: DashMap<String, Arc<KeyState>>,
    overrides: DashMap<String, Duration>,
}

impl RateLimiter {
    pub fn new(default_delay: Duration) -> Self {
        Self {
            default_delay,
            disabled: false,
            keys: DashMap::new(),
            overrides: DashMap::new(),
        }
    }

    /// Builds a limiter enforcing `requests_per_minute` requests per
    /// minute per key, for platform rate-limit budgets (spec §3).
    pub fn from_rpm(requests_per_minute: u32) -> Self {
        Self::new(delay_for_rpm(requests_per_minute))
    }

    pub fn disabled() -> Self {
        Self {
            default_delay: Duration::ZERO,
            disabled: true,
            keys: DashMap::new(),
            overrides: DashMap::new(),
        }
    }

    /// Overrides the requests-per-minute budget for a specific key (a
    /// platform id), taking precedence over `default_delay` for that key
    /// only. Mirrors `rate_limit_overrides` in [`crate::config::Config`]
    /// (spec §6 / §9 open question: the rate-limiter gate lives in the
    /// engine the handler's `download` prologue calls into, keyed per
    /// platform rather than per domain when a handler opts in).
    pub fn set_override(&self, key: impl Into<String>, requests_per_minute: u32) {
        self.overrides.insert(key.into(), delay_for_rpm(requests_per_minute));
    }

    fn delay_for(&self, key: &str) -> Duration {
        self.overrides.get(key).map(|d| *d).unwrap_or(self.default_delay)
    }

    fn state_for(&self, key: &str) -> Arc<KeyState> {
        self.keys
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(KeyState::new()))
            .clone()
    }

    /// Waits, if necessary, so that requests to `key` are spaced by at
    /// least the configured delay.
    pub async fn acquire(&self, key: &str) {
        if self.disabled {
            return;
        }
        let state = self.state_for(key);
        let delay = self.delay_for(key);
        let mut last = state.last_request.lock().await;

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < delay {
                let wait = delay - elapsed;
                state
                    .cumulative_delay_ms
                    .fetch_add(wait.as_millis() as u64, Ordering::SeqCst);
                let cumulative = Duration::from_millis(
                    state.cumulative_delay_ms.load(Ordering::SeqCst),
                );
                if cumulative > CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(key, cumulative_ms = cumulative.as_millis() as u64, "rate limiter accumulating significant delay");
                }
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Records a server-requested `Retry-After` delay for `key`, capped at
    /// an hour, so the next `acquire` for that key waits at least that
    /// long.
    pub async fn note_retry_after(&self, key: &str, retry_after: Duration) {
        if self.disabled {
            return;
        }
        let capped = retry_after.min(MAX_RETRY_AFTER);
        let state = self.state_for(key);
        let delay = self.delay_for(key);
        let mut last = state.last_request.lock().await;
        *last = Some(Instant::now() + capped - delay.min(capped));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_limiter_never_waits() {
        let limiter = RateLimiter::disabled();
        let start = Instant::now();
        limiter.acquire("example.com").await;
        limiter.acquire("example.com").await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn second_acquire_waits_out_default_delay() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        limiter.acquire("example.com").await;
        let start = Instant::now();
        limiter.acquire("example.com").await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn different_keys_do_not_share_state() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        limiter.acquire("a.com").await;
        let start = Instant::now();
        limiter.acquire("b.com").await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn from_rpm_computes_per_request_delay() {
        let limiter = RateLimiter::from_rpm(60);
        assert_eq!(limiter.default_delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn override_applies_only_to_its_own_key() {
        let limiter = RateLimiter::new(Duration::from_millis(200));
        limiter.set_override("fast-platform", 3000); // ~20ms per request

        limiter.acquire("fast-platform").await;
        let start = Instant::now();
        limiter.acquire("fast-platform").await;
        assert!(start.elapsed() < Duration::from_millis(100));

        limiter.acquire("generic").await;
        let start = Instant::now();
        limiter.acquire("generic").await;
        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
