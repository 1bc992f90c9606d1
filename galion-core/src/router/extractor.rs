//! Subprocess control for extractor-delegating handlers.
//!
//! Centralises argv assembly, piped-stdout line parsing, and progress
//! extraction for handlers that shell out to an external media extractor
//! (spec §9 "External subprocess control" design note: one module owns
//! this so every such handler behaves identically). Grounded on the
//! teacher's pattern of an async line-oriented reader loop over a spawned
//! child's stdout (`auth/capture.rs`), generalised here from cookie-capture
//! parsing to download-progress parsing.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::download::error::DownloadError;
use crate::progress::ProgressBroadcaster;
use uuid::Uuid;

/// A quality preset exposed to callers, mapped to a concrete format
/// expression per extractor invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Best,
    UltraHd8k,
    UltraHd4k,
    Hd1080,
    Hd720,
    Sd480,
    Sd360,
    AudioOnly,
}

impl Quality {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "best" => Some(Self::Best),
            "8k" => Some(Self::UltraHd8k),
            "4k" => Some(Self::UltraHd4k),
            "1080p" => Some(Self::Hd1080),
            "720p" => Some(Self::Hd720),
            "480p" => Some(Self::Sd480),
            "360p" => Some(Self::Sd360),
            "audio" => Some(Self::AudioOnly),
            _ => None,
        }
    }

    /// yt-dlp-style format-selector expression for this preset, matching
    /// spec.md §4.3's quality-to-format table exactly.
    pub fn format_expression(self) -> &'static str {
        match self {
            Self::Best => "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best",
            Self::UltraHd8k => "bestvideo[height<=4320]+bestaudio/best",
            Self::UltraHd4k => "bestvideo[height<=2160]+bestaudio/best",
            Self::Hd1080 => "bestvideo[height<=1080]+bestaudio/best",
            Self::Hd720 => "bestvideo[height<=720]+bestaudio/best",
            Self::Sd480 => "bestvideo[height<=480]+bestaudio/best",
            Self::Sd360 => "bestvideo[height<=360]+bestaudio/best",
            Self::AudioOnly => "bestaudio/best",
        }
    }
}

/// Parameters an extractor-delegating handler assembles before invoking
/// the external binary.
pub struct ExtractorRequest<'a> {
    pub url: &'a str,
    pub output_dir: &'a Path,
    pub quality: Quality,
    pub subtitles: bool,
    pub playlist: bool,
    pub cookie_header: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct ExtractorOutcome {
    pub path: PathBuf,
}

/// Spawns `binary` against `request`, parses its progress lines, and
/// returns the final output path reported by the extractor.
#[instrument(skip(broadcaster, request), fields(url = %request.url))]
pub async fn run_extractor(
    binary: &str,
    request: &ExtractorRequest<'_>,
    job_id: Uuid,
    broadcaster: &ProgressBroadcaster,
) -> Result<ExtractorOutcome, DownloadError> {
    tokio::fs::create_dir_all(request.output_dir)
        .await
        .map_err(|source| DownloadError::io(request.output_dir, source))?;

    let mut command = Command::new(binary);
    command
        .arg(request.url)
        .arg("-f")
        .arg(request.quality.format_expression())
        .arg("-o")
        .arg(request.output_dir.join("%(title)s.%(ext)s"))
        .arg("--newline")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    if request.quality == Quality::AudioOnly {
        command.arg("--extract-audio");
    }
    if request.subtitles {
        command.arg("--write-subs").arg("--write-auto-subs");
    }
    if !request.playlist {
        command.arg("--no-playlist");
    }
    if let Some(cookies) = request.cookie_header {
        command.arg("--add-header").arg(format!("Cookie: {cookies}"));
    }

    let mut child = command.spawn().map_err(|source| {
        DownloadError::io(PathBuf::from(binary), source)
    })?;

    let stdout = child.stdout.take().ok_or_else(|| {
        DownloadError::io(
            PathBuf::from(binary),
            std::io::Error::other("extractor produced no stdout handle"),
        )
    })?;

    let mut reader = BufReader::new(stdout).lines();
    let mut destination: Option<PathBuf> = None;
    let mut total_bytes: Option<u64> = None;

    while let Ok(Some(line)) = reader.next_line().await {
        debug!(line, "extractor output");
        if let Some(path) = parse_destination_line(&line) {
            destination = Some(path);
        }
        if let Some((downloaded, total)) = parse_progress_line(&line) {
            total_bytes = total.or(total_bytes);
            broadcaster.report(job_id, downloaded, total_bytes);
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|source| DownloadError::io(PathBuf::from(binary), source))?;

    if !status.success() {
        return Err(DownloadError::http_status(request.url, 502));
    }

    let path = destination.ok_or_else(|| {
        DownloadError::io(
            request.output_dir,
            std::io::Error::other("extractor did not report a destination path"),
        )
    })?;

    Ok(ExtractorOutcome { path })
}

fn parse_destination_line(line: &str) -> Option<PathBuf> {
    if let Some(rest) = line.strip_prefix("[download] Destination: ") {
        return Some(PathBuf::from(rest.trim()));
    }
    if let Some(rest) = line.strip_prefix("[Merger] Merging formats into ") {
        let trimmed = rest.trim().trim_matches('"');
        return Some(PathBuf::from(trimmed));
    }
    None
}

fn parse_progress_line(line: &str) -> Option<(u64, Option<u64>)> {
    let rest = line.strip_prefix("[download] ")?;
    let percent_str = rest.split('%').next()?.trim();
    let percent: f64 = percent_str.parse().ok()?;

    let total = rest
        .split("of ")
        .nth(1)
        .and_then(|s| s.split_whitespace().next())
        .and_then(parse_size_token);

    let downloaded = total.map(|t| ((percent / 100.0) * t as f64) as u64).unwrap_or(0);
    Some((downloaded, total))
}

fn parse_size_token(token: &str) -> Option<u64> {
    let token = token.trim_end_matches(&['i', 'B'][..]);
    let (number, unit) = token.split_at(token.len().saturating_sub(1));
    let value: f64 = number.parse().ok().or_else(|| token.parse().ok())?;
    let multiplier = match unit {
        "K" => 1024.0,
        "M" => 1024.0 * 1024.0,
        "G" => 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    };
    Some((value * multiplier) as u64)
}
