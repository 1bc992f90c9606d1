//! CivitAI model handler: resolves the first eligible model-version file
//! for a `civitai.com/models/<id>` URL via the CivitAI model API.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::download::engine::DownloadOutcome;
use crate::download::error::DownloadError;
use crate::router::{compile, HandlerContext, HandlerPriority, PlatformDescriptor, PlatformHandler, RouteMatch};

#[derive(Debug, Deserialize)]
struct ModelResponse {
    #[serde(rename = "type")]
    model_type: Option<String>,
    #[serde(rename = "modelVersions")]
    model_versions: Vec<ModelVersion>,
}

#[derive(Debug, Deserialize)]
struct ModelVersion {
    id: Option<u64>,
    files: Vec<ModelFile>,
}

#[derive(Debug, Deserialize)]
struct ModelFile {
    name: String,
    #[serde(rename = "downloadUrl")]
    download_url: String,
}

pub struct CivitaiHandler {
    descriptor: PlatformDescriptor,
    pattern: regex::Regex,
}

impl CivitaiHandler {
    pub fn new() -> Self {
        Self {
            descriptor: PlatformDescriptor {
                id: "civitai",
                display_name: "CivitAI",
                category: "model",
                requires_credential: true,
                supports_quality: false,
                supports_subtitles: false,
                supports_playlists: false,
                supports_channels: false,
                requests_per_minute: 30,
            },
            pattern: compile(r"civitai\.com/models/(?P<id>\d+)"),
        }
    }

    fn extract_model_id(&self, url: &str) -> Option<String> {
        self.pattern
            .captures(url)
            .and_then(|c| c.name("id"))
            .map(|m| m.as_str().to_string())
    }

    /// The specific model version requested via `?modelVersionId=`, if any.
    /// Absent this, [`Self::resolve_file`] falls back to the first version
    /// the API returns.
    fn extract_version_id(&self, url: &str) -> Option<String> {
        url::Url::parse(url).ok().and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "modelVersionId")
                .map(|(_, v)| v.into_owned())
        })
    }

    async fn resolve_file(
        &self,
        model_id: &str,
        version_id: Option<&str>,
        engine: &crate::download::engine::DownloadEngine,
    ) -> Result<(String, String, String), DownloadError> {
        let api_url = format!("https://civitai.com/api/v1/models/{model_id}");
        let model: ModelResponse = engine.get_json(&api_url).await?;

        let model_type = model.model_type.unwrap_or_else(|| "Other".to_string());
        let mut versions = model.model_versions.into_iter();
        let version = match version_id {
            Some(wanted) => versions
                .find(|v| v.id.map(|id| id.to_string()).as_deref() == Some(wanted))
                .ok_or_else(|| DownloadError::http_status(&api_url, 404))?,
            None => versions
                .next()
                .ok_or_else(|| DownloadError::http_status(&api_url, 404))?,
        };
        let file = version
            .files
            .into_iter()
            .next()
            .ok_or_else(|| DownloadError::http_status(&api_url, 404))?;

        Ok((file.download_url, file.name, model_type))
    }
}

impl Default for CivitaiHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformHandler for CivitaiHandler {
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
        let model_id = self.extract_model_id(url)?;
        let mut route = RouteMatch::new(self.descriptor.id, "model").with_metadata("model_id", model_id);
        if let Some(version_id) = self.extract_version_id(url) {
            route = route.with_metadata("version_id", version_id);
        }
        Some(route)
    }

    async fn download(
        &self,
        job_id: Uuid,
        url: &str,
        _options: &HashMap<String, String>,
        ctx: &HandlerContext<'_>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let model_id = self
            .extract_model_id(url)
            .ok_or_else(|| DownloadError::invalid_url(url))?;
        let version_id = self.extract_version_id(url);
        let (download_url, filename, model_type) =
            self.resolve_file(&model_id, version_id.as_deref(), ctx.engine).await?;
        let output_dir = ctx.output_root.join("civitai").join(&model_type);

        let credential = ctx.credentials.get(self.descriptor.id).await.ok();
        let broadcaster = ctx.progress;
        let outcome = ctx
            .engine
            .fetch(
                &download_url,
                &output_dir,
                Some(&filename),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_model_id() {
        let handler = CivitaiHandler::new();
        assert_eq!(
            handler.extract_model_id("https://civitai.com/models/12345/some-name"),
            Some("12345".to_string())
        );
    }

    #[test]
    fn requires_credential() {
        assert!(CivitaiHandler::new().descriptor().requires_credential);
    }

    #[test]
    fn extracts_version_id_from_query_string() {
        let handler = CivitaiHandler::new();
        assert_eq!(
            handler.extract_version_id("https://civitai.com/models/123?modelVersionId=456"),
            Some("456".to_string())
        );
        assert_eq!(handler.extract_version_id("https://civitai.com/models/123"), None);
    }

    #[test]
    fn classify_reports_model_id_and_version_id() {
        let handler = CivitaiHandler::new();
        let route = handler
            .classify("https://civitai.com/models/123?modelVersionId=456")
            .unwrap();
        assert_eq!(route.platform_id, "civitai");
        assert_eq!(route.url_type, "model");
        assert_eq!(route.metadata.get("model_id"), Some(&"123".to_string()));
        assert_eq!(route.metadata.get("version_id"), Some(&"456".to_string()));
    }
}
