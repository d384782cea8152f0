//! Web browsing tool: fetch pages, extract text, harvest links.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, info};

use skein_plugin::{Plugin, ToolPlugin};
use skein_types::{AgentTool, AgentToolParam, Config, ParamKind, Result, ToolResult};

const DEFAULT_MAX_CONTENT_LENGTH: i64 = 100_000;
const DEFAULT_TIMEOUT_SECS: i64 = 30;

struct BrowserState {
    max_content_length: usize,
    timeout_secs: u64,
    initialized: bool,
}

impl Default for BrowserState {
    fn default() -> Self {
        Self {
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH as usize,
            timeout_secs: DEFAULT_TIMEOUT_SECS as u64,
            initialized: false,
        }
    }
}

/// Browser tool with `fetch`, `extract_text`, `get_links`, and
/// `status` actions.
pub struct BrowserTool {
    http: RwLock<Option<reqwest::Client>>,
    state: RwLock<BrowserState>,
}

impl Default for BrowserTool {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserTool {
    pub fn new() -> Self {
        Self {
            http: RwLock::new(None),
            state: RwLock::new(BrowserState::default()),
        }
    }

    fn client(&self) -> Option<reqwest::Client> {
        self.http.read().expect("http client poisoned").clone()
    }

    async fn fetch_body(&self, url: &str) -> std::result::Result<(u16, String, bool), String> {
        let Some(client) = self.client() else {
            return Err("browser tool not initialized".into());
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(format!("unsupported URL scheme: {url}"));
        }

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| format!("failed to read body: {e}"))?;

        let max = self
            .state
            .read()
            .expect("browser state poisoned")
            .max_content_length;
        let truncated = body.len() > max;
        let body = if truncated {
            let mut end = max;
            while end < body.len() && !body.is_char_boundary(end) {
                end += 1;
            }
            body[..end].to_string()
        } else {
            body
        };
        Ok((status, body, truncated))
    }

    async fn do_fetch(&self, params: &Value) -> ToolResult {
        let Some(url) = params.get("url").and_then(Value::as_str) else {
            return ToolResult::fail("missing 'url' parameter");
        };
        debug!(url, "browser fetch");
        match self.fetch_body(url).await {
            Ok((status, body, truncated)) => ToolResult::ok(json!({
                "url": url,
                "status": status,
                "content": body,
                "content_length": body.len(),
                "truncated": truncated,
            })),
            Err(e) => ToolResult::fail(e),
        }
    }

    async fn do_extract_text(&self, params: &Value) -> ToolResult {
        let Some(url) = params.get("url").and_then(Value::as_str) else {
            return ToolResult::fail("missing 'url' parameter");
        };
        match self.fetch_body(url).await {
            Ok((status, body, truncated)) => {
                let text = strip_html(&body);
                ToolResult::ok(json!({
                    "url": url,
                    "status": status,
                    "text": text,
                    "text_length": text.len(),
                    "truncated": truncated,
                }))
            }
            Err(e) => ToolResult::fail(e),
        }
    }

    async fn do_get_links(&self, params: &Value) -> ToolResult {
        let Some(url) = params.get("url").and_then(Value::as_str) else {
            return ToolResult::fail("missing 'url' parameter");
        };
        match self.fetch_body(url).await {
            Ok((_, body, _)) => {
                let links = extract_links(&body, url);
                ToolResult::ok(json!({
                    "url": url,
                    "count": links.len(),
                    "links": links
                        .into_iter()
                        .map(|(href, text)| json!({"href": href, "text": text}))
                        .collect::<Vec<_>>(),
                }))
            }
            Err(e) => ToolResult::fail(e),
        }
    }

    fn do_status(&self) -> ToolResult {
        let state = self.state.read().expect("browser state poisoned");
        ToolResult::ok(json!({
            "initialized": state.initialized,
            "max_content_length": state.max_content_length,
            "timeout_seconds": state.timeout_secs,
        }))
    }
}

/// Strip HTML down to readable text: script/style bodies removed, tags
/// dropped, basic entities decoded, whitespace collapsed.
fn strip_html(html: &str) -> String {
    static SCRIPT_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    static TAG_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let script_re = SCRIPT_RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("script regex")
    });
    let tag_re = TAG_RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex"));

    let without_scripts = script_re.replace_all(html, " ");
    let without_tags = tag_re.replace_all(&without_scripts, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Harvest `<a href>` links, resolving relative targets against the
/// base URL. Returns `(href, anchor text)` pairs.
fn extract_links(html: &str, base_url: &str) -> Vec<(String, String)> {
    static LINK_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let link_re = LINK_RE.get_or_init(|| {
        Regex::new(r#"(?is)<a\s[^>]*href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)
            .expect("link regex")
    });

    link_re
        .captures_iter(html)
        .filter_map(|cap| {
            let href = resolve_url(base_url, &cap[1])?;
            let text = strip_html(&cap[2]);
            Some((href, text))
        })
        .collect()
}

/// Resolve a possibly-relative href against a base URL. Fragment-only
/// and javascript links resolve to nothing.
fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }

    let (scheme, rest) = base.split_once("://")?;
    let host = rest.split('/').next()?;
    if let Some(proto_relative) = href.strip_prefix("//") {
        return Some(format!("{scheme}://{proto_relative}"));
    }
    if href.starts_with('/') {
        return Some(format!("{scheme}://{host}{href}"));
    }
    // Relative to the base's directory.
    let base_dir = match base.rfind('/') {
        Some(idx) if idx > scheme.len() + 2 => &base[..idx],
        _ => base,
    };
    Some(format!("{base_dir}/{href}"))
}

#[async_trait]
impl Plugin for BrowserTool {
    fn name(&self) -> &str {
        "browser-tool"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Fetches web pages and extracts text and links"
    }

    fn init(&self, cfg: &Config) -> Result<()> {
        let mut state = self.state.write().expect("browser state poisoned");
        state.max_content_length =
            cfg.get_i64("browser.max_content_length", DEFAULT_MAX_CONTENT_LENGTH).max(1) as usize;
        state.timeout_secs = cfg.get_i64("browser.timeout", DEFAULT_TIMEOUT_SECS).max(1) as u64;
        state.initialized = true;

        *self.http.write().expect("http client poisoned") = Some(
            reqwest::Client::builder()
                .timeout(Duration::from_secs(state.timeout_secs))
                .build()
                .unwrap_or_default(),
        );
        info!(
            max_content = state.max_content_length,
            timeout = state.timeout_secs,
            "browser tool initialized"
        );
        Ok(())
    }

    fn shutdown(&self) {
        self.state.write().expect("browser state poisoned").initialized = false;
    }

    fn is_initialized(&self) -> bool {
        self.state.read().expect("browser state poisoned").initialized
    }
}

#[async_trait]
impl ToolPlugin for BrowserTool {
    fn tool_id(&self) -> &str {
        "browser"
    }

    fn actions(&self) -> Vec<String> {
        vec![
            "fetch".into(),
            "extract_text".into(),
            "get_links".into(),
            "status".into(),
        ]
    }

    async fn execute(&self, action: &str, params: &Value) -> ToolResult {
        if !self.is_initialized() {
            return ToolResult::fail("browser tool not initialized");
        }
        match action {
            "fetch" => self.do_fetch(params).await,
            "extract_text" => self.do_extract_text(params).await,
            "get_links" => self.do_get_links(params).await,
            "status" => self.do_status(),
            other => ToolResult::fail(format!("Unknown action: {other}")),
        }
    }

    fn agent_tools(&self) -> Vec<AgentTool> {
        let url_param =
            |desc: &str| AgentToolParam::required("url", ParamKind::String, desc);
        vec![
            AgentTool {
                name: "browser_fetch".into(),
                description: "Fetch a URL and return the raw page content.".into(),
                params: vec![url_param("The URL to fetch (http or https)")],
                tool_id: "browser".into(),
                action: "fetch".into(),
            },
            AgentTool {
                name: "browser_extract_text".into(),
                description: "Fetch a URL and return its readable text with HTML removed.".into(),
                params: vec![url_param("The URL to extract text from")],
                tool_id: "browser".into(),
                action: "extract_text".into(),
            },
            AgentTool {
                name: "browser_get_links".into(),
                description: "Fetch a URL and list the links found on the page.".into(),
                params: vec![url_param("The URL to collect links from")],
                tool_id: "browser".into(),
                action: "get_links".into(),
            },
        ]
    }
}
