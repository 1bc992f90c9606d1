//! Error types for the download engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while probing, fetching, or verifying a download.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error downloading {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("timeout downloading {url}")]
    Timeout { url: String },

    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        url: String,
        status: u16,
        retry_after: Option<String>,
    },

    #[error("IO error writing to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error(
        "integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        path: PathBuf,
        expected_bytes: u64,
        actual_bytes: u64,
    },

    #[error(
        "digest mismatch for {path}: expected {expected}, computed {actual}"
    )]
    DigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error(
        "[AUTH] authentication required for {domain} (HTTP {status}) downloading {url}\n  Suggestion: {suggestion}"
    )]
    AuthRequired {
        url: String,
        status: u16,
        domain: String,
        suggestion: &'static str,
    },
}

impl DownloadError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    pub fn digest_mismatch(path: impl Into<PathBuf>, expected: String, actual: String) -> Self {
        Self::DigestMismatch {
            path: path.into(),
            expected,
            actual,
        }
    }

    /// 407 suggests proxy configuration; everything else suggests the
    /// credential-store capture flow.
    pub fn auth_required(url: impl Into<String>, status: u16, domain: impl Into<String>) -> Self {
        let suggestion = if status == 407 {
            "Configure your HTTP proxy settings or check proxy credentials."
        } else {
            "Run `galion auth capture <platform>` to authenticate."
        };
        Self::AuthRequired {
            url: url.into(),
            status,
            domain: domain.into(),
            suggestion,
        }
    }
}

// We intentionally do not implement `From<reqwest::Error>` or
// `From<std::io::Error>`: the variants above need a url/path for context
// that the source errors don't carry, so callers go through the
// constructor helpers instead.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_contains_url() {
        let error = DownloadError::timeout("https://example.com/f.zip");
        assert!(error.to_string().contains("https://example.com/f.zip"));
    }

    #[test]
    fn auth_required_has_auth_prefix_and_suggestion() {
        let error = DownloadError::auth_required("https://example.com/f.zip", 401, "example.com");
        let msg = error.to_string();
        assert!(msg.starts_with("[AUTH]"));
        assert!(msg.contains("auth capture"));
    }

    #[test]
    fn auth_required_407_suggests_proxy() {
        let error = DownloadError::auth_required("https://example.com/f.zip", 407, "proxy.local");
        let msg = error.to_string();
        assert!(msg.contains("proxy"));
        assert!(!msg.contains("auth capture"));
    }

    #[test]
    fn digest_mismatch_message_contains_both_hashes() {
        let error =
            DownloadError::digest_mismatch("/tmp/f.zip", "aaaa".to_string(), "bbbb".to_string());
        let msg = error.to_string();
        assert!(msg.contains("aaaa") && msg.contains("bbbb"));
    }
}
