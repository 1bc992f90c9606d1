//! Low-level HTTP mechanics: request dispatch, byte-range resume detection,
//! chunked streaming to disk, and filename resolution.
//!
//! Grounded on the teacher's `download/client.rs`. One behavioural
//! departure: a ranged request that comes back `200 OK` (rather than `206
//! Partial Content`) is treated as "server ignored the range, full body
//! follows" and the engine overwrites the destination from byte zero,
//! never appends — appending onto a full-body response would silently
//! corrupt the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use super::error::DownloadError;

pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const DEFAULT_USER_AGENT: &str = concat!("galion/", env!("CARGO_PKG_VERSION"));
const STREAM_CHUNK_HINT: usize = 1024 * 1024;

/// Connection policy (spec §4.1): keep-alive, a 10-connection idle pool per
/// host, and a 300s ceiling so a stalled server doesn't wedge a worker
/// forever. HTTP/2 is negotiated automatically via ALPN when the server
/// supports it; reqwest does not expose a hard concurrent-connection cap
/// independent of the idle pool, so the per-key [`super::rate_limiter::RateLimiter`]
/// is what actually bounds concurrent requests to a given host.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const POOL_MAX_IDLE_PER_HOST: usize = 10;

/// Outcome of a successful byte stream to disk.
#[derive(Debug, Clone)]
pub struct StreamResult {
    pub path: PathBuf,
    pub bytes_downloaded: u64,
    pub content_length: Option<u64>,
    pub resumed: bool,
}

/// Invoked with `(bytes_downloaded, total_bytes)` as chunks arrive. The
/// caller (the download engine's progress broadcaster) is responsible for
/// throttling how often this is actually persisted/emitted.
pub type ProgressCallback<'a> = dyn Fn(u64, Option<u64>) + Send + Sync + 'a;

/// Metadata gathered by [`HttpClient::probe`]'s HEAD request: spec §4.1's
/// `{size, content_type, accepts_ranges, filename, etag, last_modified}`.
#[derive(Debug, Clone, Default)]
pub struct ProbeInfo {
    pub size: u64,
    pub content_type: Option<String>,
    pub accepts_ranges: bool,
    pub filename: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    pub fn with_cookie_jar(jar: std::sync::Arc<reqwest::cookie::Jar>) -> Self {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .cookie_provider(jar)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    /// Issues a `GET` over the shared client and deserialises the body as
    /// JSON. Used by resolver-style handlers (CivitAI, GitHub Releases,
    /// archive.org metadata) that need a side lookup before they know the
    /// concrete file URL to hand to [`Self::download_to_file`].
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, DownloadError> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|source| DownloadError::network(url, source))?
            .error_for_status()
            .map_err(|source| DownloadError::network(url, source))?
            .json::<T>()
            .await
            .map_err(|source| DownloadError::network(url, source))
    }

    /// Issues a `GET` over the shared client and returns the body as text.
    /// Used by the news handler to fetch an article page ahead of its own
    /// HTML-to-Markdown pass.
    pub async fn get_text(&self, url: &str) -> Result<String, DownloadError> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|source| DownloadError::network(url, source))?
            .error_for_status()
            .map_err(|source| DownloadError::network(url, source))?
            .text()
            .await
            .map_err(|source| DownloadError::network(url, source))
    }

    /// `probe`: a HEAD request with redirects followed, filling in size,
    /// content type, range support, a filename (from `Content-Disposition`
    /// or the URL path), and cache-validation headers. Missing fields are
    /// left at their zero value rather than failing the whole probe — a
    /// server that rejects HEAD entirely still lets `fetch` proceed as a
    /// fresh, non-resumable download.
    pub async fn probe(&self, url: &str) -> Result<ProbeInfo, DownloadError> {
        let parsed = url::Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        let response = self
            .client
            .head(parsed.clone())
            .send()
            .await
            .map_err(|source| DownloadError::network(url, source))?;

        if !response.status().is_success() {
            return Err(DownloadError::http_status(url, response.status().as_u16()));
        }

        let headers = response.headers();
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let accepts_ranges = headers
            .get(reqwest::header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
        let filename = headers
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_content_disposition)
            .or_else(|| filename_from_url(&parsed));
        let etag = headers
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let last_modified = headers
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(ProbeInfo {
            size: response.content_length().unwrap_or(0),
            content_type,
            accepts_ranges,
            filename,
            etag,
            last_modified,
        })
    }

    /// Resolves the on-disk filename per spec §4.1's priority chain:
    /// explicit option, then a probed `Content-Disposition`/URL-derived
    /// name, then a timestamp fallback when neither yields anything
    /// (an extensionless URL with no disposition header, e.g. a bare API
    /// redirect target).
    pub fn resolve_filename(preferred_filename: Option<&str>, probed_filename: Option<&str>) -> String {
        if let Some(name) = preferred_filename {
            return sanitize_filename(name);
        }
        if let Some(name) = probed_filename {
            return sanitize_filename(name);
        }
        format!(
            "download_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        )
    }

    /// Downloads `url` to the already-resolved `destination` path, resuming
    /// a partial file when the server advertises range support. Falls back
    /// once to [`BROWSER_USER_AGENT`] on a 403, the way sites that
    /// bot-detect on User-Agent but otherwise serve freely do. `auth_header`
    /// is sent verbatim as `Authorization` when a handler has a credential
    /// configured for the platform (spec §4.3: "injecting credentials into
    /// request headers when configured").
    pub async fn download_to_file(
        &self,
        url: &str,
        destination: &Path,
        auth_header: Option<&str>,
        on_progress: Option<&ProgressCallback<'_>>,
    ) -> Result<StreamResult, DownloadError> {
        match self
            .download_to_file_with_user_agent(url, destination, None, auth_header, on_progress)
            .await
        {
            Err(DownloadError::HttpStatus { status: 403, .. }) => {
                self.download_to_file_with_user_agent(
                    url,
                    destination,
                    Some(BROWSER_USER_AGENT),
                    auth_header,
                    on_progress,
                )
                .await
            }
            other => other,
        }
    }

    async fn download_to_file_with_user_agent(
        &self,
        url: &str,
        destination: &Path,
        user_agent_override: Option<&str>,
        auth_header: Option<&str>,
        on_progress: Option<&ProgressCallback<'_>>,
    ) -> Result<StreamResult, DownloadError> {
        let parsed = url::Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        let existing_bytes = tokio::fs::metadata(destination)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        let mut request = self.client.get(url);
        if let Some(ua) = user_agent_override {
            request = request.header(reqwest::header::USER_AGENT, ua);
        }
        if let Some(auth) = auth_header {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }
        if existing_bytes > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={existing_bytes}-"));
        }

        let response = request
            .send()
            .await
            .map_err(|source| DownloadError::network(url, source))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || status == StatusCode::PROXY_AUTHENTICATION_REQUIRED
        {
            let domain = parsed.host_str().unwrap_or("unknown").to_string();
            return Err(DownloadError::auth_required(url, status.as_u16(), domain));
        }
        if !status.is_success() && status != StatusCode::PARTIAL_CONTENT {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        let content_length = response.content_length();
        // A ranged request answered with 200 instead of 206 means the
        // server ignored the Range header; the full body follows and the
        // destination must be overwritten, never appended to (spec §4.1
        // resume precondition / §9 redesign flag).
        let resumed = existing_bytes > 0 && status == StatusCode::PARTIAL_CONTENT;

        let bytes_downloaded = self
            .stream_to_file(response, destination, resumed, content_length, on_progress)
            .await?;

        Ok(StreamResult {
            path: destination.to_path_buf(),
            bytes_downloaded,
            content_length,
            resumed,
        })
    }

    async fn stream_to_file(
        &self,
        response: reqwest::Response,
        destination: &Path,
        append: bool,
        content_length: Option<u64>,
        on_progress: Option<&ProgressCallback<'_>>,
    ) -> Result<u64, DownloadError> {
        let mut file = if append {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(destination)
                .await
                .map_err(|source| DownloadError::io(destination, source))?
        } else {
            File::create(destination)
                .await
                .map_err(|source| DownloadError::io(destination, source))?
        };

        let starting_bytes = if append {
            file.metadata()
                .await
                .map(|m| m.len())
                .map_err(|source| DownloadError::io(destination, source))?
        } else {
            0
        };

        let mut writer = BufWriter::with_capacity(STREAM_CHUNK_HINT, &mut file);
        let mut stream = response.bytes_stream();
        let mut written = starting_bytes;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| {
                DownloadError::network(destination.display().to_string(), source)
            })?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|source| DownloadError::io(destination, source))?;
            written += chunk.len() as u64;
            if let Some(callback) = on_progress {
                callback(written, content_length);
            }
        }
        writer
            .flush()
            .await
            .map_err(|source| DownloadError::io(destination, source))?;

        Ok(written)
    }
}

fn filename_from_url(url: &url::Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(sanitize_filename)
}

/// Parses a `filename*=UTF-8''...` or `filename="..."` parameter out of a
/// `Content-Disposition` header value.
fn filename_from_content_disposition(value: &str) -> Option<String> {
    for part in value.split(';') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("filename*=") {
            let rest = rest
                .trim_start_matches("UTF-8''")
                .trim_start_matches("utf-8''");
            let decoded = urlencoding::decode(rest).ok()?;
            return Some(sanitize_filename(&decoded));
        }
        if let Some(rest) = part.strip_prefix("filename=") {
            return Some(sanitize_filename(rest.trim_matches('"')));
        }
    }
    None
}

fn sanitize_filename(raw: &str) -> String {
    let decoded = urlencoding::decode(raw)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    decoded
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
