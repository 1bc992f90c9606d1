//! News-article handler: fetches an allow-listed article URL, selects its
//! main content subtree, strips boilerplate tags down to readable text, and
//! writes it out as Markdown with a frontmatter header carrying the title
//! and source URL.

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;
use uuid::Uuid;

use crate::download::engine::DownloadOutcome;
use crate::download::error::DownloadError;
use crate::router::{HandlerContext, HandlerPriority, PlatformDescriptor, PlatformHandler, RouteMatch};

/// Several dozen major outlets, per spec.md's domain-whitelist requirement.
/// Far from exhaustive, but representative of wire services, major
/// broadcasters, and national papers across regions.
const ALLOWED_DOMAINS: &[&str] = &[
    "apnews.com",
    "reuters.com",
    "bbc.com",
    "bbc.co.uk",
    "npr.org",
    "nytimes.com",
    "washingtonpost.com",
    "theguardian.com",
    "wsj.com",
    "bloomberg.com",
    "cnn.com",
    "cbsnews.com",
    "nbcnews.com",
    "abcnews.go.com",
    "usatoday.com",
    "latimes.com",
    "ft.com",
    "economist.com",
    "aljazeera.com",
    "dw.com",
    "france24.com",
    "cbc.ca",
    "smh.com.au",
    "abc.net.au",
    "straitstimes.com",
    "scmp.com",
    "japantimes.co.jp",
    "thehindu.com",
    "timesofindia.indiatimes.com",
    "politico.com",
    "axios.com",
    "theatlantic.com",
    "time.com",
    "newsweek.com",
    "propublica.org",
];

/// Content-subtree selectors, tried in order, per spec.md §4.3 "News
/// handler" — the first present tag/attribute wins.
const SUBTREE_PATTERNS: &[&str] = &[
    r"(?is)<article\b[^>]*>(.*?)</article>",
    r"(?is)<main\b[^>]*>(.*?)</main>",
    r#"(?is)<[a-z0-9]+\b[^>]*\brole\s*=\s*["']main["'][^>]*>(.*)"#,
    r#"(?is)<[a-z0-9]+\b[^>]*\bclass\s*=\s*["'][^"']*\barticle-body\b[^"']*["'][^>]*>(.*)"#,
    r#"(?is)<[a-z0-9]+\b[^>]*\bclass\s*=\s*["'][^"']*\bpost-content\b[^"']*["'][^>]*>(.*)"#,
    r"(?is)<body\b[^>]*>(.*?)</body>",
];

pub struct NewsHandler {
    descriptor: PlatformDescriptor,
    title_pattern: Regex,
    subtree_patterns: Vec<Regex>,
    tag_pattern: Regex,
    whitespace_pattern: Regex,
}

impl NewsHandler {
    pub fn new() -> Self {
        Self {
            descriptor: PlatformDescriptor {
                id: "news",
                display_name: "News article",
                category: "article",
                requires_credential: false,
                supports_quality: false,
                supports_subtitles: false,
                supports_playlists: false,
                supports_channels: false,
                requests_per_minute: 30,
            },
            title_pattern: Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("static title regex compiles"),
            subtree_patterns: SUBTREE_PATTERNS
                .iter()
                .map(|p| Regex::new(p).expect("static news subtree regex compiles"))
                .collect(),
            tag_pattern: Regex::new(
                r"(?is)<(script|style|nav|header|footer|aside|iframe)[^>]*>.*?</\1>|<[^>]+>",
            )
            .expect("static news tag regex compiles"),
            whitespace_pattern: Regex::new(r"\n{3,}").expect("static whitespace regex compiles"),
        }
    }

    fn matches_allowed_domain(&self, url: &str) -> bool {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .map(|host| ALLOWED_DOMAINS.iter().any(|d| host.ends_with(d)))
            .unwrap_or(false)
    }

    fn extract_title(&self, html: &str) -> Option<String> {
        let raw = self.title_pattern.captures(html)?.get(1)?.as_str();
        let decoded = raw
            .replace("&amp;", "&")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'");
        let trimmed = decoded.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// First matching selector from `article | main | [role=main] |
    /// .article-body | .post-content | body` wins; if none match (malformed
    /// or unusually-structured HTML), the whole document is used as-is.
    fn select_subtree<'a>(&self, html: &'a str) -> &'a str {
        for pattern in &self.subtree_patterns {
            if let Some(caps) = pattern.captures(html) {
                if let Some(m) = caps.get(1) {
                    return m.as_str();
                }
            }
        }
        html
    }

    fn html_to_markdown(&self, html: &str) -> String {
        let subtree = self.select_subtree(html);
        let stripped = self.tag_pattern.replace_all(subtree, "\n");
        let collapsed = self.whitespace_pattern.replace_all(&stripped, "\n\n");
        collapsed.trim().to_string()
    }
}

impl Default for NewsHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformHandler for NewsHandler {
    fn descriptor(&self) -> &PlatformDescriptor {
        &self.descriptor
    }

    fn priority(&self) -> HandlerPriority {
        HandlerPriority::Specific
    }

    fn can_handle(&self, url: &str) -> bool {
        self.matches_allowed_domain(url)
    }

    fn classify(&self, url: &str) -> Option<RouteMatch> {
        if !self.can_handle(url) {
            return None;
        }
        Some(RouteMatch::new(self.descriptor.id, "article"))
    }

    async fn download(
        &self,
        job_id: Uuid,
        url: &str,
        _options: &HashMap<String, String>,
        ctx: &HandlerContext<'_>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let html = ctx.engine.get_text(url).await?;

        let title = self.extract_title(&html).unwrap_or_else(|| "untitled".to_string());
        let body = self.html_to_markdown(&html);
        let escaped_title = title.replace('"', "'");
        let document = format!("---\ntitle: \"{escaped_title}\"\nsource_url: {url}\n---\n\n{body}\n");

        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "news".to_string());
        let output_dir = ctx.output_root.join("news").join(&host);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|source| DownloadError::io(&output_dir, source))?;

        let filename = format!("{job_id}.md");
        let path = output_dir.join(&filename);
        tokio::fs::write(&path, document.as_bytes())
            .await
            .map_err(|source| DownloadError::io(&path, source))?;

        let sha256 = ctx.engine.verify(&path).await?;
        ctx.progress
            .force(job_id, document.len() as u64, Some(document.len() as u64), "completed");

        Ok(DownloadOutcome {
            path,
            bytes: document.len() as u64,
            sha256,
            duration: std::time::Duration::ZERO,
            resumed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_known_domain() {
        let handler = NewsHandler::new();
        assert!(handler.can_handle("https://apnews.com/article/abc"));
    }

    #[test]
    fn rejects_unknown_domain() {
        let handler = NewsHandler::new();
        assert!(!handler.can_handle("https://random-blog.example/post"));
    }

    #[test]
    fn strips_script_and_tags() {
        let handler = NewsHandler::new();
        let html = "<html><head><script>evil()</script></head><body><p>Hello <b>world</b></p></body></html>";
        let markdown = handler.html_to_markdown(html);
        assert!(!markdown.contains("evil()"));
        assert!(markdown.contains("Hello"));
        assert!(markdown.contains("world"));
    }

    #[test]
    fn extracts_title_from_head() {
        let handler = NewsHandler::new();
        let html = "<html><head><title>Breaking News &amp; Updates</title></head><body></body></html>";
        assert_eq!(handler.extract_title(html), Some("Breaking News & Updates".to_string()));
    }

    #[test]
    fn selects_article_subtree_over_surrounding_chrome() {
        let handler = NewsHandler::new();
        let html = "<html><body><nav>Menu</nav><article><p>Story text</p></article><footer>Copyright</footer></body></html>";
        let markdown = handler.html_to_markdown(html);
        assert!(markdown.contains("Story text"));
        assert!(!markdown.contains("Menu"));
        assert!(!markdown.contains("Copyright"));
    }

    #[test]
    fn falls_back_to_post_content_class_when_no_article_tag() {
        let handler = NewsHandler::new();
        let html = r#"<html><body><div class="post-content"><p>Body text</p></div></body></html>"#;
        let markdown = handler.html_to_markdown(html);
        assert!(markdown.contains("Body text"));
    }
}
