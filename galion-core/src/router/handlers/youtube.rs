//! YouTube handler: quality-preset selection and subtitle/playlist option
//! wiring over the shared [`crate::router::extractor`] subprocess path.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::download::engine::DownloadOutcome;
use crate::download::error::DownloadError;
use crate::router::extractor::{run_extractor, ExtractorRequest, Quality};
use crate::router::{compile, HandlerContext, HandlerPriority, PlatformDescriptor, PlatformHandler, RouteMatch};

pub struct YouTubeHandler {
    descriptor: PlatformDescriptor,
    pattern: regex::Regex,
    shorts_pattern: regex::Regex,
    playlist_pattern: regex::Regex,
    live_pattern: regex::Regex,
    channel_pattern: regex::Regex,
    extractor_bin: String,
}

impl YouTubeHandler {
    pub fn new(extractor_bin: String) -> Self {
        Self {
            descriptor: PlatformDescriptor {
                id: "youtube",
                display_name: "YouTube",
                category: "video",
                requires_credential: false,
                supports_quality: true,
                supports_subtitles: true,
                supports_playlists: true,
                supports_channels: true,
                requests_per_minute: 20,
            },
            pattern: compile(
                r"(?:youtube\.com/(?:watch|shorts|playlist|live|@|c/|channel/)|youtu\.be/)",
            ),
            shorts_pattern: compile(r"youtube\.com/shorts/"),
            playlist_pattern: compile(r"youtube\.com/playlist"),
            live_pattern: compile(r"youtube\.com/live/"),
            channel_pattern: compile(r"youtube\.com/(?:@|c/|channel/)"),
            extractor_bin,
        }
    }

    fn url_kind(&self, url: &str) -> &'static str {
        if self.shorts_pattern.is_match(url) {
            "short"
        } else if self.playlist_pattern.is_match(url) {
            "playlist"
        } else if self.live_pattern.is_match(url) {
            "live"
        } else if self.channel_pattern.is_match(url) {
            "channel"
        } else {
            "video"
        }
    }
}

#[async_trait]
impl PlatformHandler for YouTubeHandler {
    fn descriptor(&self) -> &PlatformDescriptor {
        &self.descriptor
    }

    fn priority(&self) -> HandlerPriority {
        HandlerPriority::Specific
    }

    fn can_handle(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }

    fn classify(&self, url: &str) -> Option<RouteMatch> {
        if !self.can_handle(url) {
            return None;
        }
        Some(RouteMatch::new(self.descriptor.id, self.url_kind(url)))
    }

    async fn download(
        &self,
        job_id: Uuid,
        url: &str,
        options: &HashMap<String, String>,
        ctx: &HandlerContext<'_>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let quality = options
            .get("quality")
            .and_then(|q| Quality::parse(q))
            .unwrap_or(Quality::Best);
        let subtitles = options.get("subtitles").is_some_and(|v| v == "true");
        let playlist =
            self.playlist_pattern.is_match(url) || options.get("playlist").is_some_and(|v| v == "true");
        let cookie_header = options.get("cookie_header").map(String::as_str);

        let output_dir = ctx.output_root.join("youtube");
        let request = ExtractorRequest {
            url,
            output_dir: &output_dir,
            quality,
            subtitles,
            playlist,
            cookie_header,
        };

        let result = run_extractor(&self.extractor_bin, &request, job_id, ctx.progress).await?;
        let sha256 = ctx.engine.verify(&result.path).await?;
        let bytes = tokio::fs::metadata(&result.path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        ctx.progress.force(job_id, bytes, Some(bytes), "completed");

        Ok(DownloadOutcome {
            path: result.path,
            bytes,
            sha256,
            duration: std::time::Duration::ZERO,
            resumed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> YouTubeHandler {
        YouTubeHandler::new("yt-dlp".to_string())
    }

    #[test]
    fn matches_watch_urls() {
        assert!(handler().can_handle("https://www.youtube.com/watch?v=abc123"));
    }

    #[test]
    fn matches_short_urls() {
        assert!(handler().can_handle("https://youtu.be/abc123"));
    }

    #[test]
    fn does_not_match_unrelated_url() {
        assert!(!handler().can_handle("https://example.com/watch?v=abc123"));
    }

    #[test]
    fn supports_quality_and_subtitles() {
        let descriptor = handler().descriptor;
        assert!(descriptor.supports_quality);
        assert!(descriptor.supports_subtitles);
    }

    #[test]
    fn classify_distinguishes_url_kinds() {
        let h = handler();
        assert_eq!(
            h.classify("https://www.youtube.com/watch?v=abc").unwrap().url_type,
            "video"
        );
        assert_eq!(
            h.classify("https://www.youtube.com/shorts/abc").unwrap().url_type,
            "short"
        );
        assert_eq!(
            h.classify("https://www.youtube.com/playlist?list=abc").unwrap().url_type,
            "playlist"
        );
        assert_eq!(
            h.classify("https://www.youtube.com/channel/abc").unwrap().url_type,
            "channel"
        );
    }
}
