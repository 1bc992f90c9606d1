//! GitHub releases handler: resolves the primary release asset for a
//! `github.com/<owner>/<repo>` URL via the Releases API.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::download::engine::DownloadOutcome;
use crate::download::error::DownloadError;
use crate::router::{compile, HandlerContext, HandlerPriority, PlatformDescriptor, PlatformHandler, RouteMatch};

#[derive(Debug, Deserialize)]
struct Release {
    assets: Vec<Asset>,
    tarball_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    name: String,
    browser_download_url: String,
}

pub struct GitHubHandler {
    descriptor: PlatformDescriptor,
    pattern: regex::Regex,
}

impl GitHubHandler {
    pub fn new() -> Self {
        Self {
            descriptor: PlatformDescriptor {
                id: "github",
                display_name: "GitHub Releases",
                category: "code",
                requires_credential: false,
                supports_quality: false,
                supports_subtitles: false,
                supports_playlists: false,
                supports_channels: false,
                requests_per_minute: 60,
            },
            pattern: compile(r"github\.com/(?P<owner>[^/]+)/(?P<repo>[^/]+)"),
        }
    }

    fn extract_repo(&self, url: &str) -> Option<(String, String)> {
        let caps = self.pattern.captures(url)?;
        Some((
            caps.name("owner")?.as_str().to_string(),
            caps.name("repo")?.as_str().trim_end_matches(".git").to_string(),
        ))
    }

    async fn resolve_asset_url(
        &self,
        owner: &str,
        repo: &str,
        engine: &crate::download::engine::DownloadEngine,
    ) -> Result<(String, String), DownloadError> {
        let api_url = format!("https://api.github.com/repos/{owner}/{repo}/releases/latest");
        let release: Release = engine.get_json(&api_url).await?;

        if let Some(asset) = release
            .assets
            .into_iter()
            .find(|a| !a.name.ends_with(".sha256") && !a.name.ends_with(".asc"))
        {
            return Ok((asset.browser_download_url, asset.name));
        }

        let tarball = release
            .tarball_url
            .ok_or_else(|| DownloadError::http_status(&api_url, 404))?;
        Ok((tarball, format!("{repo}.tar.gz")))
    }
}

impl Default for GitHubHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformHandler for GitHubHandler {
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
            RouteMatch::new(self.descriptor.id, "release")
                .with_metadata("owner", owner)
                .with_metadata("repo", repo),
        )
    }

    async fn download(
        &self,
        job_id: Uuid,
        url: &str,
        _options: &HashMap<String, String>,
        ctx: &HandlerContext<'_>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let (owner, repo) = self.extract_repo(url).ok_or_else(|| DownloadError::invalid_url(url))?;
        let (asset_url, filename) = self.resolve_asset_url(&owner, &repo, ctx.engine).await?;
        let output_dir = ctx.output_root.join("github").join(format!("{owner}_{repo}"));

        let broadcaster = ctx.progress;
        let outcome = ctx
            .engine
            .fetch(&asset_url, &output_dir, Some(&filename), None, self.descriptor.id, Some(&|downloaded, total| {
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
    fn extracts_owner_and_repo() {
        let handler = GitHubHandler::new();
        assert_eq!(
            handler.extract_repo("https://github.com/rust-lang/rust"),
            Some(("rust-lang".to_string(), "rust".to_string()))
        );
    }

    #[test]
    fn strips_dot_git_suffix() {
        let handler = GitHubHandler::new();
        assert_eq!(
            handler.extract_repo("https://github.com/rust-lang/rust.git"),
            Some(("rust-lang".to_string(), "rust".to_string()))
        );
    }
}
