//! Hugging Face Hub handler: resolves a file within a repo via the
//! `resolve/main` raw-content endpoint.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::download::engine::DownloadOutcome;
use crate::download::error::DownloadError;
use crate::router::{compile, HandlerContext, HandlerPriority, PlatformDescriptor, PlatformHandler, RouteMatch};

pub struct HuggingFaceHandler {
    descriptor: PlatformDescriptor,
    pattern: regex::Regex,
}

impl HuggingFaceHandler {
    pub fn new() -> Self {
        Self {
            descriptor: PlatformDescriptor {
                id: "huggingface",
                display_name: "Hugging Face Hub",
                category: "model",
                requires_credential: true,
                supports_quality: false,
                supports_subtitles: false,
                supports_playlists: false,
                supports_channels: false,
                requests_per_minute: 60,
            },
            pattern: compile(r"huggingface\.co/(?P<owner>[^/]+)/(?P<repo>[^/]+)"),
        }
    }

    fn extract_repo(&self, url: &str) -> Option<(String, String)> {
        let caps = self.pattern.captures(url)?;
        Some((
            caps.name("owner")?.as_str().to_string(),
            caps.name("repo")?.as_str().to_string(),
        ))
    }
}

impl Default for HuggingFaceHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformHandler for HuggingFaceHandler {
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
        let (owner, repo) = self.extract_repo(url)?;
        Some(
            RouteMatch::new(self.descriptor.id, "repo")
                .with_metadata("owner", owner)
                .with_metadata("repo", repo),
        )
    }

    async fn download(
        &self,
        job_id: Uuid,
        url: &str,
        options: &HashMap<String, String>,
        ctx: &HandlerContext<'_>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let (owner, repo) = self.extract_repo(url).ok_or_else(|| DownloadError::invalid_url(url))?;
        let file = options
            .get("file")
            .cloned()
            .unwrap_or_else(|| "pytorch_model.bin".to_string());
        let resolve_url = format!("https://huggingface.co/{owner}/{repo}/resolve/main/{file}");
        let output_dir = ctx
            .output_root
            .join("huggingface")
            .join(format!("{owner}_{repo}"));

        let credential = ctx.credentials.get(self.descriptor.id).await.ok();
        let broadcaster = ctx.progress;
        let outcome = ctx
            .engine
            .fetch(
                &resolve_url,
                &output_dir,
                Some(&file),
                credential.as_deref(),
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
