//! Catch-all direct handler: streams any `http(s)://` URL straight to the
//! Download Engine with no platform-specific resolution step.
//!
//! Grounded on the teacher's base `HttpClient::download_to_file` path used
//! with no resolver layer in front of it — the common case in the teacher
//! repo for a URL that none of the academic-publisher resolvers claim.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::download::engine::DownloadOutcome;
use crate::download::error::DownloadError;
use crate::router::{compile, HandlerContext, HandlerPriority, PlatformDescriptor, PlatformHandler, RouteMatch};

pub struct GenericHandler {
    descriptor: PlatformDescriptor,
    pattern: regex::Regex,
}

impl GenericHandler {
    pub fn new() -> Self {
        Self {
            descriptor: PlatformDescriptor {
                id: "generic",
                display_name: "Generic file",
                category: "file",
                requires_credential: false,
                supports_quality: false,
                supports_subtitles: false,
                supports_playlists: false,
                supports_channels: false,
                requests_per_minute: 120,
            },
            pattern: compile(r"^https?://"),
        }
    }
}

impl Default for GenericHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformHandler for GenericHandler {
    fn descriptor(&self) -> &PlatformDescriptor {
        &self.descriptor
    }

    fn priority(&self) -> HandlerPriority {
        HandlerPriority::Fallback
    }

    fn can_handle(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }

    fn classify(&self, url: &str) -> Option<RouteMatch> {
        if !self.can_handle(url) {
            return None;
        }
        Some(RouteMatch::new(self.descriptor.id, "direct"))
    }

    async fn download(
        &self,
        job_id: Uuid,
        url: &str,
        options: &HashMap<String, String>,
        ctx: &HandlerContext<'_>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "generic".to_string());
        let output_dir = ctx.output_root.join("generic").join(&host);
        let preferred = options.get("filename").map(String::as_str);

        let broadcaster = ctx.progress;
        let outcome = ctx
            .engine
            .fetch(url, &output_dir, preferred, None, &host, Some(&|downloaded, total| {
                broadcaster.report(job_id, downloaded, total);
            }))
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
    fn matches_any_http_url() {
        let handler = GenericHandler::new();
        assert!(handler.can_handle("https://example.com/a.zip"));
        assert!(handler.can_handle("http://example.com/a.zip"));
    }

    #[test]
    fn rejects_non_http_scheme() {
        let handler = GenericHandler::new();
        assert!(!handler.can_handle("ftp://example.com/a.zip"));
    }

    #[test]
    fn priority_is_fallback() {
        assert_eq!(GenericHandler::new().priority(), HandlerPriority::Fallback);
    }
}
