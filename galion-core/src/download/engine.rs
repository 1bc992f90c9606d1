//! The Download Engine: `probe` / `fetch` / `verify`, wired together with
//! retry/backoff and per-key rate limiting.
//!
//! Grounded on the teacher's `DownloadEngine` (`download/engine.rs`):
//! `download_with_retry`'s per-attempt rate-limiter acquisition, error
//! classification, and Retry-After extraction are generalised here from
//! "process one queue item" into a standalone `fetch` operation that a
//! platform handler calls directly.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{info, instrument, warn};

use super::client::{HttpClient, ProbeInfo, ProgressCallback};
use super::error::DownloadError;
use super::rate_limiter::RateLimiter;
use super::retry::{FailureType, RetryDecision, RetryPolicy};

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 100;
pub const DEFAULT_CONCURRENCY: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid concurrency {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}")]
    InvalidConcurrency { value: usize },

    #[error(transparent)]
    Download(#[from] DownloadError),
}

/// Result of a successful `fetch` + `verify` pair, handed back to a
/// platform handler for it to report via [`crate::progress::ProgressSink`].
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub path: std::path::PathBuf,
    pub bytes: u64,
    pub sha256: String,
    pub duration: Duration,
    pub resumed: bool,
}

/// Classifies a [`DownloadError`] into a [`FailureType`] the retry policy
/// can act on.
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::AuthRequired { .. } => FailureType::NeedsAuth,
        DownloadError::HttpStatus { status, .. } => match *status {
            429 => FailureType::RateLimited,
            500..=599 => FailureType::Transient,
            400..=499 => FailureType::Permanent,
            _ => FailureType::Transient,
        },
        DownloadError::Network { .. } | DownloadError::Timeout { .. } => FailureType::Transient,
        DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::Integrity { .. }
        | DownloadError::DigestMismatch { .. } => FailureType::Permanent,
    }
}

fn extract_retry_after_delay(error: &DownloadError) -> Option<Duration> {
    let DownloadError::HttpStatus { retry_after, .. } = error else {
        return None;
    };
    let raw = retry_after.as_ref()?;
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    httpdate::parse_http_date(raw)
        .ok()
        .and_then(|when| when.duration_since(std::time::SystemTime::now()).ok())
}

/// Orchestrates HTTP downloads: rate limiting, transport-level retry with
/// backoff, and post-download SHA-256 verification.
#[derive(Clone)]
pub struct DownloadEngine {
    client: HttpClient,
    retry_policy: RetryPolicy,
    rate_limiter: Arc<RateLimiter>,
}

impl DownloadEngine {
    pub fn new(retry_policy: RetryPolicy, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            client: HttpClient::new(),
            retry_policy,
            rate_limiter,
        }
    }

    pub fn with_client(client: HttpClient, retry_policy: RetryPolicy, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            retry_policy,
            rate_limiter,
        }
    }

    /// `probe`: a HEAD request over the shared client, used both by
    /// handlers that need to resolve metadata before enqueuing a fetch and
    /// internally by [`Self::fetch`] to decide whether a resume is
    /// possible.
    #[instrument(skip(self))]
    pub async fn probe(&self, url: &str) -> Result<ProbeInfo, DownloadError> {
        self.client.probe(url).await
    }

    /// Fetches and deserialises a JSON resource over the shared client, for
    /// resolver-style handlers that need a metadata lookup before they know
    /// which URL to hand to [`Self::fetch`].
    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, DownloadError> {
        self.client.get_json(url).await
    }

    /// Fetches a text resource over the shared client.
    pub async fn get_text(&self, url: &str) -> Result<String, DownloadError> {
        self.client.get_text(url).await
    }

    /// `fetch`: downloads `url` into `output_dir`, retrying transient and
    /// rate-limited failures with exponential backoff, honouring any
    /// `Retry-After` header, and reporting incremental progress through
    /// `on_progress`. Rate-limits itself per `rate_limit_key` (the domain,
    /// or a platform id when a handler wants a coarser budget). `auth_header`
    /// is forwarded verbatim as an `Authorization` header when the calling
    /// handler resolved a credential for this platform.
    #[instrument(skip(self, on_progress))]
    pub async fn fetch(
        &self,
        url: &str,
        output_dir: &Path,
        preferred_filename: Option<&str>,
        auth_header: Option<&str>,
        rate_limit_key: &str,
        on_progress: Option<&ProgressCallback<'_>>,
    ) -> Result<DownloadOutcome, DownloadError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| DownloadError::io(output_dir, source))?;

        let start = Instant::now();
        let mut attempt = 0u32;

        // Best-effort probe: fills in size/accepts-ranges/filename hints
        // when the server supports HEAD. A failed probe degrades to a
        // fresh, non-resumable download rather than aborting `fetch`.
        let probe = self.client.probe(url).await.ok();
        let filename = HttpClient::resolve_filename(
            preferred_filename,
            probe.as_ref().and_then(|p| p.filename.as_deref()),
        );
        let destination = output_dir.join(&filename);

        if let Some(probe) = &probe {
            let existing = tokio::fs::metadata(&destination)
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            if probe.accepts_ranges && probe.size > 0 && existing == probe.size {
                let sha256 = self.verify(&destination).await?;
                info!(url, bytes = existing, "download already complete on disk");
                return Ok(DownloadOutcome {
                    path: destination,
                    bytes: existing,
                    sha256,
                    duration: start.elapsed(),
                    resumed: true,
                });
            }
        }

        loop {
            self.rate_limiter.acquire(rate_limit_key).await;

            let result = self
                .client
                .download_to_file(url, &destination, auth_header, on_progress)
                .await;

            match result {
                Ok(stream_result) => {
                    let sha256 = self.verify(&stream_result.path).await?;
                    info!(url, bytes = stream_result.bytes_downloaded, "download complete");
                    return Ok(DownloadOutcome {
                        path: stream_result.path,
                        bytes: stream_result.bytes_downloaded,
                        sha256,
                        duration: start.elapsed(),
                        resumed: stream_result.resumed,
                    });
                }
                Err(error) => {
                    let failure_type = classify_error(&error);
                    if let Some(retry_after) = extract_retry_after_delay(&error) {
                        self.rate_limiter
                            .note_retry_after(rate_limit_key, retry_after)
                            .await;
                    }
                    match self.retry_policy.should_retry(failure_type, attempt) {
                        RetryDecision::Retry { delay, attempt: next } => {
                            warn!(url, %error, delay_ms = delay.as_millis() as u64, "retrying download");
                            tokio::time::sleep(delay).await;
                            attempt = next;
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            warn!(url, %error, reason, "giving up on download");
                            return Err(error);
                        }
                    }
                }
            }
        }
    }

    /// `verify`: computes the SHA-256 hex digest of the file at `path`,
    /// streaming it in chunks rather than loading it into memory.
    #[instrument(skip(self))]
    pub async fn verify(&self, path: &Path) -> Result<String, DownloadError> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|source| DownloadError::io(path, source))?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let read = file
                .read(&mut buffer)
                .await
                .map_err(|source| DownloadError::io(path, source))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Verifies the digest at `path` matches `expected` (a lowercase hex
    /// SHA-256), returning [`DownloadError::DigestMismatch`] on mismatch.
    /// The file is kept on disk either way (spec §7: digest-mismatch does
    /// not delete the result).
    pub async fn verify_matches(&self, path: &Path, expected: &str) -> Result<(), DownloadError> {
        let actual = self.verify(path).await?;
        if actual.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(DownloadError::digest_mismatch(path, expected.to_string(), actual))
        }
    }
}
