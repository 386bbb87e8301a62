//! Browser rendering adapter. The actual rendering engine is an opaque
//! collaborator reached over HTTP; this module is the client of that
//! service plus the distillation and block-detection logic layered on top.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::security::validate_outbound_url;
use crate::types::ExtractOptions;

const BLOCK_PATTERNS: &[&str] = &[
    "captcha",
    "verify you are human",
    "access denied",
    "unusual traffic",
    "temporarily unavailable",
    "robot check",
];

/// Raw page content returned by the render service before distillation.
#[derive(Debug, Clone, Deserialize)]
struct RenderResponse {
    html: String,
    title: Option<String>,
    description: Option<String>,
    #[serde(default)]
    screenshot_base64: Option<String>,
}

/// The distilled, LLM-ready view of a rendered page.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResult {
    pub content: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub blocked: bool,
    pub screenshot: Option<Vec<u8>>,
    pub screenshot_type: Option<&'static str>,
}

#[async_trait]
pub trait BrowserAdapter: Send + Sync {
    async fn render(&self, url: &str, options: &ExtractOptions, max_content_chars: usize) -> Result<ScrapeResult>;
}

pub struct HttpBrowserAdapter {
    client: reqwest::Client,
    render_endpoint: String,
    default_timeout_ms: u64,
}

impl HttpBrowserAdapter {
    pub fn new(render_endpoint: impl Into<String>, default_timeout_ms: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            render_endpoint: render_endpoint.into(),
            default_timeout_ms,
        }
    }
}

#[async_trait]
impl BrowserAdapter for HttpBrowserAdapter {
    async fn render(&self, url: &str, options: &ExtractOptions, max_content_chars: usize) -> Result<ScrapeResult> {
        validate_outbound_url(url, false).await?;

        let timeout_ms = options.timeout_ms.unwrap_or(self.default_timeout_ms).clamp(1_000, 60_000);
        let wait_until = options.wait_until.as_deref().unwrap_or("domcontentloaded");

        let response = self
            .client
            .post(&self.render_endpoint)
            .timeout(Duration::from_millis(timeout_ms + 5_000))
            .json(&serde_json::json!({
                "url": url,
                "waitUntil": wait_until,
                "timeoutMs": timeout_ms,
                "screenshot": options.screenshot,
                "blockResourceTypes": ["image", "media", "font"],
            }))
            .send()
            .await
            .map_err(|e| Error::Browser(format!("render request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Browser(format!(
                "render service responded with {}",
                response.status()
            )));
        }

        let body: RenderResponse = response
            .json()
            .await
            .map_err(|e| Error::Browser(format!("invalid render response: {e}")))?;

        Ok(distill(body, max_content_chars))
    }
}

fn distill(raw: RenderResponse, max_content_chars: usize) -> ScrapeResult {
    let blocked = is_blocked(&raw.html, raw.title.as_deref());
    let content = distill_content(&raw.html, raw.title.as_deref(), raw.description.as_deref(), max_content_chars);
    let screenshot = raw
        .screenshot_base64
        .as_deref()
        .and_then(|b64| base64_decode(b64).ok());

    ScrapeResult {
        content,
        title: raw.title,
        description: raw.description,
        blocked,
        screenshot_type: screenshot.as_ref().map(|_| "png"),
        screenshot,
    }
}

fn is_blocked(html: &str, title: Option<&str>) -> bool {
    let haystack = format!("{} {}", html, title.unwrap_or_default()).to_ascii_lowercase();
    BLOCK_PATTERNS.iter().any(|pattern| haystack.contains(pattern))
}

const EXCLUDED_TAGS: &[&str] = &["script", "style", "svg", "noscript", "iframe", "canvas"];
const CONTAINER_SELECTORS: &[&str] = &["main", "article", "[role=main]", "#content", "#main", ".content"];

/// Produce a lightly-structured, text-only rendering: title as an H1,
/// description, up to 20 headings, up to 40 list items, and up to 3 tables
/// of up to 10 rows, then the raw main text, capped at `max_chars`.
fn distill_content(html: &str, title: Option<&str>, description: Option<&str>, max_chars: usize) -> String {
    let stripped = strip_excluded_tags(html);
    let main = extract_container(&stripped).unwrap_or(stripped.clone());

    let mut out = String::new();
    if let Some(t) = title {
        out.push_str("# ");
        out.push_str(t.trim());
        out.push('\n');
    }
    if let Some(d) = description {
        out.push_str(d.trim());
        out.push_str("\n\n");
    }

    for heading in extract_tag_text(&main, "h1").iter().chain(extract_tag_text(&main, "h2").iter()).take(20) {
        out.push_str("## ");
        out.push_str(heading);
        out.push('\n');
    }

    for item in extract_tag_text(&main, "li").into_iter().take(40) {
        out.push_str("- ");
        out.push_str(&item);
        out.push('\n');
    }

    for table in extract_tables(&main).into_iter().take(3) {
        for row in table.into_iter().take(10) {
            out.push_str(&row.join(" | "));
            out.push('\n');
        }
        out.push('\n');
    }

    out.push_str(&plain_text(&main));

    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }
    out
}

fn strip_excluded_tags(html: &str) -> String {
    let mut result = html.to_string();
    for tag in EXCLUDED_TAGS {
        let open = format!("<{tag}");
        while let Some(start) = result.to_ascii_lowercase().find(&open) {
            let close_tag = format!("</{tag}>");
            if let Some(end_rel) = result[start..].to_ascii_lowercase().find(&close_tag) {
                let end = start + end_rel + close_tag.len();
                result.replace_range(start..end, "");
            } else {
                break;
            }
        }
    }
    result
}

fn extract_container(html: &str) -> Option<String> {
    for selector in CONTAINER_SELECTORS {
        let found = match *selector {
            "main" => extract_first_tag_inner(html, "main"),
            "article" => extract_first_tag_inner(html, "article"),
            "[role=main]" => extract_first_by_attr(html, |attrs| attr_equals(attrs, "role", "main")),
            "#content" => extract_first_by_attr(html, |attrs| attr_equals(attrs, "id", "content")),
            "#main" => extract_first_by_attr(html, |attrs| attr_equals(attrs, "id", "main")),
            ".content" => extract_first_by_attr(html, |attrs| attr_has_class(attrs, "content")),
            _ => None,
        };
        if found.is_some() {
            return found;
        }
    }
    None
}

fn extract_first_tag_inner(html: &str, tag: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = format!("<{tag}");
    let start = lower.find(&open)?;
    let content_start = lower[start..].find('>')? + start + 1;
    let close = format!("</{tag}>");
    let end = lower[content_start..].find(&close)? + content_start;
    Some(html[content_start..end].to_string())
}

/// Scan every opening tag regardless of name and return the inner HTML of
/// the first one whose attribute string satisfies `attr_matches`. Used for
/// the attribute/id/class container selectors, which (unlike `main`/
/// `article`) aren't tied to a single tag name.
fn extract_first_by_attr(html: &str, attr_matches: impl Fn(&str) -> bool) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let mut pos = 0;
    while let Some(rel_lt) = lower[pos..].find('<') {
        let start = pos + rel_lt;
        if lower[start..].starts_with("</") {
            pos = start + 2;
            continue;
        }
        let Some(gt_rel) = lower[start..].find('>') else { break };
        let tag_end = start + gt_rel;
        let tag_src = html[start + 1..tag_end].trim_end_matches('/').trim_end();
        let tag_name = tag_src.split_whitespace().next().unwrap_or("").to_ascii_lowercase();
        if tag_name.is_empty() {
            pos = tag_end + 1;
            continue;
        }
        let attrs = &tag_src[tag_name.len()..];
        if attr_matches(attrs) {
            let content_start = tag_end + 1;
            let close_tag = format!("</{tag_name}>");
            if let Some(rel_end) = lower[content_start..].find(&close_tag) {
                return Some(html[content_start..content_start + rel_end].to_string());
            }
        }
        pos = tag_end + 1;
    }
    None
}

fn attr_equals(attrs: &str, name: &str, value: &str) -> bool {
    let lower = attrs.to_ascii_lowercase();
    ['"', '\''].iter().any(|quote| lower.contains(&format!("{name}={quote}{value}{quote}")))
}

fn attr_has_class(attrs: &str, class_name: &str) -> bool {
    let lower = attrs.to_ascii_lowercase();
    for quote in ['"', '\''] {
        let prefix = format!("class={quote}");
        if let Some(rel_start) = lower.find(&prefix) {
            let value_start = rel_start + prefix.len();
            if let Some(rel_end) = lower[value_start..].find(quote) {
                let classes = &lower[value_start..value_start + rel_end];
                if classes.split_whitespace().any(|c| c == class_name) {
                    return true;
                }
            }
        }
    }
    false
}

fn extract_tag_text(html: &str, tag: &str) -> Vec<String> {
    let lower = html.to_ascii_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(rel_start) = lower[pos..].find(&open) {
        let start = pos + rel_start;
        let Some(gt) = lower[start..].find('>') else { break };
        let content_start = start + gt + 1;
        let Some(rel_end) = lower[content_start..].find(&close) else { break };
        let end = content_start + rel_end;
        let text = plain_text(&html[content_start..end]);
        if !text.is_empty() {
            out.push(text);
        }
        pos = end + close.len();
    }
    out
}

fn extract_tables(html: &str) -> Vec<Vec<Vec<String>>> {
    let lower = html.to_ascii_lowercase();
    let mut tables = Vec::new();
    let mut pos = 0;
    while let Some(rel_start) = lower[pos..].find("<table") {
        let start = pos + rel_start;
        let Some(end_rel) = lower[start..].find("</table>") else { break };
        let end = start + end_rel;
        let table_html = &html[start..end];
        let rows: Vec<Vec<String>> = extract_tag_text(table_html, "tr")
            .into_iter()
            .map(|row_text| row_text.split_whitespace().map(String::from).collect())
            .collect();
        if !rows.is_empty() {
            tables.push(rows);
        }
        pos = end + "</table>".len();
    }
    tables
}

fn plain_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn base64_decode(s: &str) -> std::result::Result<Vec<u8>, ()> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s).map_err(|_| ())
}

/// Adapter that returns a fixed result, used in unit and integration tests.
pub struct MockBrowserAdapter {
    pub result: Result<ScrapeResult>,
}

impl MockBrowserAdapter {
    pub fn ok(content: &str) -> Self {
        Self {
            result: Ok(ScrapeResult {
                content: content.to_string(),
                title: None,
                description: None,
                blocked: false,
                screenshot: None,
                screenshot_type: None,
            }),
        }
    }

    pub fn blocked() -> Self {
        Self {
            result: Ok(ScrapeResult {
                content: "Access Denied - Please verify you are human".to_string(),
                title: Some("Access Denied".to_string()),
                description: None,
                blocked: true,
                screenshot: None,
                screenshot_type: None,
            }),
        }
    }
}

#[async_trait]
impl BrowserAdapter for MockBrowserAdapter {
    async fn render(&self, _url: &str, _options: &ExtractOptions, _max_content_chars: usize) -> Result<ScrapeResult> {
        match &self.result {
            Ok(r) => Ok(ScrapeResult {
                content: r.content.clone(),
                title: r.title.clone(),
                description: r.description.clone(),
                blocked: r.blocked,
                screenshot: r.screenshot.clone(),
                screenshot_type: r.screenshot_type,
            }),
            Err(e) => Err(Error::Browser(e.to_string())),
        }
    }
}
