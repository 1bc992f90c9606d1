//! Job identity, status, and the URL fingerprint used for dedup.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Terminal and non-terminal states a [`Job`] moves through.
///
/// `Pending` -> `Processing` -> `Completed` | `RetryPending` | `FailedPermanent`.
/// `RetryPending` always returns to `Pending` once its backoff elapses; it is
/// not itself a storage status, only an internal waypoint (see
/// [`crate::queue::Queue::fail`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    FailedPermanent,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::FailedPermanent => "failed_permanent",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::FailedPermanent | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed_permanent" => Ok(Self::FailedPermanent),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown job status {other:?}")),
        }
    }
}

/// A unit of work submitted to the [`crate::queue::Queue`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub url: String,
    pub fingerprint: String,
    pub platform_id: String,
    pub options: HashMap<String, String>,
    pub priority: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: JobStatus,
    pub cancelled: bool,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub last_error: Option<String>,
    pub result_path: Option<String>,
    pub result_sha256: Option<String>,
    pub result_bytes: Option<u64>,
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
}

/// Upper bound accepted for [`Job::priority`]; higher means more urgent.
pub const MAX_PRIORITY: u8 = 10;

impl Job {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        url: impl Into<String>,
        platform_id: impl Into<String>,
        options: HashMap<String, String>,
        priority: u8,
        max_retries: u32,
        now: i64,
    ) -> Self {
        let url = url.into();
        let fingerprint = fingerprint_url(&url);
        Self {
            id: Uuid::new_v4(),
            url,
            fingerprint,
            platform_id: platform_id.into(),
            options,
            priority: priority.min(MAX_PRIORITY),
            retry_count: 0,
            max_retries,
            status: JobStatus::Pending,
            cancelled: false,
            created_at: now,
            started_at: None,
            completed_at: None,
            last_error: None,
            result_path: None,
            result_sha256: None,
            result_bytes: None,
            bytes_downloaded: 0,
            total_bytes: None,
        }
    }

    /// `(10 - priority) * 10^12 + created_at`, ascending order yields
    /// highest-priority-first, oldest-first-within-class dequeue order.
    pub fn score(&self) -> i64 {
        (i64::from(MAX_PRIORITY - self.priority.min(MAX_PRIORITY))) * 1_000_000_000_000 + self.created_at
    }

    /// The progress snapshot's `percent` field (spec §3): `None` until the
    /// total size is known.
    pub fn progress_percent(&self) -> Option<f64> {
        self.total_bytes.filter(|t| *t > 0).map(|total| {
            (self.bytes_downloaded as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
        })
    }
}

/// Normalises a URL (lowercase scheme/host, strip default port, drop a bare
/// trailing slash, sort query parameters) and returns the first 16 hex
/// characters of its SHA-256 digest.
///
/// Normalisation avoids treating `http://Example.com/a?b=1&a=2` and
/// `http://example.com/a?a=2&b=1` as distinct resources for dedup purposes.
pub fn fingerprint_url(raw: &str) -> String {
    let normalised = normalise_url(raw).unwrap_or_else(|| raw.to_string());
    let digest = Sha256::digest(normalised.as_bytes());
    let hex = format!("{digest:x}");
    hex[..16].to_string()
}

fn normalise_url(raw: &str) -> Option<String> {
    let mut parsed = url::Url::parse(raw).ok()?;
    let scheme = parsed.scheme().to_ascii_lowercase();
    parsed.set_scheme(&scheme).ok()?;

    let default_port = match scheme.as_str() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    if parsed.port() == default_port {
        let _ = parsed.set_port(None);
    }

    if parsed.path().len() > 1 && parsed.path().ends_with('/') {
        let trimmed = parsed.path().trim_end_matches('/').to_string();
        parsed.set_path(&trimmed);
    }

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        let query = pairs
            .into_iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(&k), urlencoding::encode(&v)))
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }

    Some(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_length() {
        let fp = fingerprint_url("https://example.com/a.zip");
        assert_eq!(fp.len(), 16);
    }

    #[test]
    fn fingerprint_ignores_default_port_and_query_order() {
        let a = fingerprint_url("https://example.com:443/a?x=1&y=2");
        let b = fingerprint_url("https://example.com/a?y=2&x=1");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_ignores_trailing_slash() {
        let a = fingerprint_url("https://example.com/a/");
        let b = fingerprint_url("https://example.com/a");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_distinguishes_different_paths() {
        let a = fingerprint_url("https://example.com/a");
        let b = fingerprint_url("https://example.com/b");
        assert_ne!(a, b);
    }

    #[test]
    fn job_score_orders_by_priority_then_age() {
        let high = Job::new("https://x/1", "generic", HashMap::new(), 9, 3, 100);
        let low = Job::new("https://x/2", "generic", HashMap::new(), 1, 3, 50);
        assert!(high.score() < low.score());
    }

    #[test]
    fn job_status_roundtrips_through_str() {
        for s in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::FailedPermanent,
            JobStatus::Cancelled,
        ] {
            let parsed: JobStatus = s.as_str().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }
}
