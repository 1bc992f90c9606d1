//! Catch-all extractor-delegating handler for stream/social platforms that
//! don't have a bespoke handler in this implementation (Instagram, TikTok,
//! Twitter/X, Reddit, Telegram). Keeps the registry total over every
//! platform the specification names while reusing the same subprocess
//! machinery as [`super::youtube::YouTubeHandler`].

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::download::engine::DownloadOutcome;
use crate::download::error::DownloadError;
use crate::router::extractor::{run_extractor, ExtractorRequest, Quality};
use crate::router::{compile, HandlerContext, HandlerPriority, PlatformDescriptor, PlatformHandler, RouteMatch};

pub struct GenericStreamHandler {
    descriptor: PlatformDescriptor,
    pattern: regex::Regex,
    extractor_bin: String,
}

impl GenericStreamHandler {
    pub fn new(extractor_bin: String) -> Self {
        Self {
            descriptor: PlatformDescriptor {
                id: "generic-stream",
                display_name: "Social/stream platform",
                category: "video",
                requires_credential: true,
                supports_quality: true,
                supports_subtitles: false,
                supports_playlists: false,
                supports_channels: false,
                requests_per_minute: 20,
            },
            pattern: compile(
                r"(?:instagram\.com|tiktok\.com|(?:twitter|x)\.com|reddit\.com|t\.me)",
            ),
            extractor_bin,
        }
    }

    fn platform_tag(&self, url: &str) -> &'static str {
        if url.contains("instagram.com") {
            "instagram"
        } else if url.contains("tiktok.com") {
            "tiktok"
        } else if url.contains("twitter.com") || url.contains("x.com") {
            "twitter"
        } else if url.contains("reddit.com") {
            "reddit"
        } else if url.contains("t.me") {
            "telegram"
        } else {
            "stream"
        }
    }
}

#[async_trait]
impl PlatformHandler for GenericStreamHandler {
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
        Some(RouteMatch::new(self.descriptor.id, self.platform_tag(url)))
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
        let stored_credential = match options.get("cookie_header") {
            Some(_) => None,
            None => ctx.credentials.get(self.descriptor.id).await.ok(),
        };
        let cookie_header = options
            .get("cookie_header")
            .map(String::as_str)
            .or(stored_credential.as_deref());
        let tag = self.platform_tag(url);
        let output_dir = ctx.output_root.join(tag);

        let request = ExtractorRequest {
            url,
            output_dir: &output_dir,
            quality,
            subtitles: false,
            playlist: false,
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

    fn handler() -> GenericStreamHandler {
        GenericStreamHandler::new("yt-dlp".to_string())
    }

    #[test]
    fn matches_instagram_and_tiktok() {
        let h = handler();
        assert!(h.can_handle("https://www.instagram.com/p/abc"));
        assert!(h.can_handle("https://www.tiktok.com/@x/video/1"));
    }

    #[test]
    fn platform_tag_distinguishes_sources() {
        let h = handler();
        assert_eq!(h.platform_tag("https://reddit.com/r/rust"), "reddit");
        assert_eq!(h.platform_tag("https://t.me/channel"), "telegram");
    }

    #[test]
    fn does_not_match_youtube() {
        assert!(!handler().can_handle("https://youtube.com/watch?v=1"));
    }
}
