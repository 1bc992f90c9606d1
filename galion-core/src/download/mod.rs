pub mod client;
pub mod engine;
pub mod error;
pub mod rate_limiter;
pub mod retry;

pub use client::{HttpClient, ProbeInfo, StreamResult, BROWSER_USER_AGENT};
pub use engine::{DownloadEngine, DownloadOutcome, EngineError};
pub use error::DownloadError;
pub use rate_limiter::RateLimiter;
pub use retry::{FailureType, RetryDecision, RetryPolicy, DEFAULT_MAX_RETRIES};
