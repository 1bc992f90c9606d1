//! Internet Archive handler: distinguishes an `archive.org` item, a
//! `web.archive.org` wayback snapshot, and an `archive.today` capture by
//! pattern. Items resolve to the largest non-metadata file via the
//! archive.org metadata API; snapshots and `archive.today` captures are
//! themselves the fetchable resource, so the handler hands their URL
//! straight to the Download Engine.
//!
//! Grounded on the teacher's resolver pattern of a specialised handler
//! resolving an indirect reference (an arXiv id, in the teacher's
//! `resolver/arxiv.rs`) to a concrete fetchable URL before delegating to
//! the shared HTTP client.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::download::engine::DownloadOutcome;
use crate::download::error::DownloadError;
use crate::router::{compile, HandlerContext, HandlerPriority, PlatformDescriptor, PlatformHandler, RouteMatch};

#[derive(Debug, Deserialize)]
struct ArchiveMetadata {
    files: Vec<ArchiveFile>,
}

#[derive(Debug, Deserialize)]
struct ArchiveFile {
    name: String,
    source: Option<String>,
    #[serde(default)]
    size: Option<String>,
}

enum ArchiveKind {
    Item(String),
    Wayback(String),
    ArchiveToday(String),
}

pub struct ArchiveHandler {
    descriptor: PlatformDescriptor,
    item_pattern: regex::Regex,
    wayback_pattern: regex::Regex,
    archive_today_pattern: regex::Regex,
}

impl ArchiveHandler {
    pub fn new() -> Self {
        Self {
            descriptor: PlatformDescriptor {
                id: "archive",
                display_name: "Internet Archive",
                category: "archive",
                requires_credential: false,
                supports_quality: false,
                supports_subtitles: false,
                supports_playlists: false,
                supports_channels: false,
                requests_per_minute: 60,
            },
            item_pattern: compile(r"(?:^|[^.])archive\.org/(?:details|download)/(?P<id>[^/?#]+)"),
            wayback_pattern: compile(r"web\.archive\.org/web/(?P<snapshot>[^/]+/.+)"),
            archive_today_pattern: compile(r"archive\.(?:today|ph|is|md)/(?P<id>[^/?#]+)"),
        }
    }

    fn extract_item_id(&self, url: &str) -> Option<String> {
        self.classify_kind(url).and_then(|kind| match kind {
            ArchiveKind::Item(id) => Some(id),
            _ => None,
        })
    }

    fn classify_kind(&self, url: &str) -> Option<ArchiveKind> {
        if let Some(caps) = self.wayback_pattern.captures(url) {
            return Some(ArchiveKind::Wayback(caps.name("snapshot")?.as_str().to_string()));
        }
        if let Some(caps) = self.item_pattern.captures(url) {
            return Some(ArchiveKind::Item(caps.name("id")?.as_str().to_string()));
        }
        if let Some(caps) = self.archive_today_pattern.captures(url) {
            return Some(ArchiveKind::ArchiveToday(caps.name("id")?.as_str().to_string()));
        }
        None
    }

    async fn resolve_file_url(
        &self,
        item_id: &str,
        engine: &crate::download::engine::DownloadEngine,
    ) -> Result<String, DownloadError> {
        let metadata_url = format!("https://archive.org/metadata/{item_id}");
        let metadata: ArchiveMetadata = engine.get_json(&metadata_url).await?;

        let best = metadata
            .files
            .into_iter()
            .filter(|f| f.source.as_deref() != Some("metadata"))
            .max_by_key(|f| f.size.as_deref().and_then(|s| s.parse::<u64>().ok()).unwrap_or(0))
            .ok_or_else(|| DownloadError::http_status(&metadata_url, 404))?;

        Ok(format!("https://archive.org/download/{item_id}/{}", best.name))
    }
}

impl Default for ArchiveHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformHandler for ArchiveHandler {
    fn descriptor(&self) -> &PlatformDescriptor {
        &self.descriptor
    }

    fn priority(&self) -> HandlerPriority {
        HandlerPriority::Specific
    }

    fn can_handle(&self, url: &str) -> bool {
        self.classify_kind(url).is_some()
    }

    fn classify(&self, url: &str) -> Option<RouteMatch> {
        match self.classify_kind(url)? {
            ArchiveKind::Item(id) => {
                Some(RouteMatch::new(self.descriptor.id, "item").with_metadata("item_id", id))
            }
            ArchiveKind::Wayback(snapshot) => {
                Some(RouteMatch::new(self.descriptor.id, "wayback").with_metadata("snapshot", snapshot))
            }
            ArchiveKind::ArchiveToday(id) => {
                Some(RouteMatch::new(self.descriptor.id, "archive_today").with_metadata("id", id))
            }
        }
    }

    async fn download(
        &self,
        job_id: Uuid,
        url: &str,
        _options: &HashMap<String, String>,
        ctx: &HandlerContext<'_>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let kind = self
            .classify_kind(url)
            .ok_or_else(|| DownloadError::invalid_url(url))?;

        let (file_url, subdir, filename): (String, &'static str, Option<String>) = match kind {
            ArchiveKind::Item(item_id) => {
                let resolved = self.resolve_file_url(&item_id, ctx.engine).await?;
                (resolved, "item", None)
            }
            ArchiveKind::Wayback(_) => (url.to_string(), "wayback", None),
            ArchiveKind::ArchiveToday(id) => (url.to_string(), "archive_today", Some(format!("{id}.html"))),
        };
        let output_dir = ctx.output_root.join("archive").join(subdir);

        let broadcaster = ctx.progress;
        let outcome = ctx
            .engine
            .fetch(
                &file_url,
                &output_dir,
                filename.as_deref(),
                None,
                self.descriptor.id,
                Some(&|downloaded, total| {
                    broadcaster.report(job_id, downloaded, total);
                }),
            )
            .await?;
        ctx.progress
            .force(job_id, outcome.bytes, Some(outcome.bytes), "completed");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_item_id_from_details_url() {
        let handler = ArchiveHandler::new();
        assert_eq!(
            handler.extract_item_id("https://archive.org/details/my_item_123"),
            Some("my_item_123".to_string())
        );
    }

    #[test]
    fn extracts_item_id_from_download_url() {
        let handler = ArchiveHandler::new();
        assert_eq!(
            handler.extract_item_id("https://archive.org/download/another-item"),
            Some("another-item".to_string())
        );
    }

    #[test]
    fn does_not_match_unrelated_url() {
        let handler = ArchiveHandler::new();
        assert!(!handler.can_handle("https://example.com/a"));
    }

    #[test]
    fn priority_is_specific() {
        assert_eq!(ArchiveHandler::new().priority(), HandlerPriority::Specific);
    }

    #[test]
    fn classifies_wayback_snapshots_separately_from_items() {
        let handler = ArchiveHandler::new();
        let route = handler
            .classify("https://web.archive.org/web/20230101000000/https://example.com")
            .unwrap();
        assert_eq!(route.url_type, "wayback");

        let item_route = handler.classify("https://archive.org/details/my_item_123").unwrap();
        assert_eq!(item_route.url_type, "item");
    }

    #[test]
    fn classifies_archive_today_captures() {
        let handler = ArchiveHandler::new();
        let route = handler.classify("https://archive.today/abcde").unwrap();
        assert_eq!(route.url_type, "archive_today");
        assert_eq!(route.metadata.get("id"), Some(&"abcde".to_string()));
    }
}
