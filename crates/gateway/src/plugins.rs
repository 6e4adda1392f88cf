//! Built-in glue plugins: clock, web fetch, and sandboxed file access.
//!
//! These are deliberately small -- they exist so the assistant has a
//! useful baseline and so the invoker's policy, rate-limit, and
//! path-sandbox machinery is exercised end to end. Richer capability
//! comes from skills.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use hearth_domain::chat::{ToolDefinition, ToolParameter};
use hearth_domain::error::{Error, Result};
use hearth_tools::{Plugin, PolicyDecision};

fn param(name: &str, description: &str) -> ToolParameter {
    ToolParameter {
        name: name.into(),
        ptype: "string".into(),
        description: description.into(),
        required: true,
        is_path: false,
    }
}

fn path_param(name: &str, description: &str) -> ToolParameter {
    ToolParameter {
        is_path: true,
        ..param(name, description)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Clock
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ClockPlugin;

#[async_trait::async_trait]
impl Plugin for ClockPlugin {
    fn name(&self) -> &str {
        "clock"
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "clock_now".into(),
            plugin: "clock".into(),
            description: "Get the current date and time (UTC and local)".into(),
            parameters: vec![],
        }]
    }

    async fn invoke(&self, tool: &str, _params: &Value) -> Result<String> {
        match tool {
            "clock_now" => {
                let utc = chrono::Utc::now();
                let local = chrono::Local::now();
                Ok(format!(
                    "UTC: {}\nLocal: {}\nUnix: {}",
                    utc.to_rfc3339(),
                    local.to_rfc3339(),
                    utc.timestamp()
                ))
            }
            _ => Err(Error::Other(format!("no such tool: {tool}"))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Web fetch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const FETCH_MAX_CHARS: usize = 10_000;

pub struct WebPlugin {
    client: reqwest::Client,
}

impl WebPlugin {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent("hearth/0.1")
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Plugin for WebPlugin {
    fn name(&self) -> &str {
        "web"
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "web_fetch".into(),
            plugin: "web".into(),
            description: "Fetch a web page and return its readable text".into(),
            parameters: vec![param("url", "The http(s) URL to fetch")],
        }]
    }

    fn policy_check(&self, _tool: &str, params: &Value) -> PolicyDecision {
        let url = params.get("url").and_then(Value::as_str).unwrap_or("");
        if url.starts_with("http://") || url.starts_with("https://") {
            PolicyDecision::Allow
        } else {
            PolicyDecision::Deny("only http(s) URLs are fetchable".into())
        }
    }

    async fn invoke(&self, tool: &str, params: &Value) -> Result<String> {
        if tool != "web_fetch" {
            return Err(Error::Other(format!("no such tool: {tool}")));
        }
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Other("missing 'url' parameter".into()))?;

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Http(format!("{url} returned HTTP {status}")));
        }
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        let mut text = strip_html(&body);
        if text.len() > FETCH_MAX_CHARS {
            let mut end = FETCH_MAX_CHARS;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
            text.push_str("\n[content truncated]");
        }
        Ok(text)
    }
}

/// Crude readable-text extraction: drop script/style blocks, strip
/// tags, collapse whitespace runs.
fn strip_html(html: &str) -> String {
    let mut cleaned = html.to_string();
    for blocked in ["script", "style"] {
        cleaned = remove_blocks(&cleaned, blocked);
    }

    let mut out = String::with_capacity(cleaned.len() / 2);
    let mut in_tag = false;
    let mut last_space = true;
    for c in cleaned.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                if !last_space {
                    out.push(' ');
                    last_space = true;
                }
            }
            c if !in_tag => {
                if c.is_whitespace() {
                    if !last_space {
                        out.push(' ');
                        last_space = true;
                    }
                } else {
                    out.push(c);
                    last_space = false;
                }
            }
            _ => {}
        }
    }
    out.trim().to_string()
}

/// Remove `<tag ...>...</tag>` blocks. Searches an ASCII-lowercased
/// copy so byte offsets line up with the original.
fn remove_blocks(input: &str, tag: &str) -> String {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let lower: String = input.chars().map(|c| c.to_ascii_lowercase()).collect();

    let mut out = String::with_capacity(input.len());
    let mut pos = 0;
    while let Some(start_rel) = lower[pos..].find(&open) {
        let start = pos + start_rel;
        out.push_str(&input[pos..start]);
        match lower[start..].find(&close) {
            Some(end_rel) => pos = start + end_rel + close.len(),
            None => return out,
        }
    }
    out.push_str(&input[pos..]);
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Files
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const READ_MAX_CHARS: usize = 100_000;

pub struct FilesPlugin {
    roots: Vec<PathBuf>,
}

impl FilesPlugin {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }
}

#[async_trait::async_trait]
impl Plugin for FilesPlugin {
    fn name(&self) -> &str {
        "files"
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "file_read".into(),
                plugin: "files".into(),
                description: "Read a text file from the allowed directories".into(),
                parameters: vec![path_param("path", "Absolute path of the file")],
            },
            ToolDefinition {
                name: "file_list".into(),
                plugin: "files".into(),
                description: "List a directory inside the allowed directories".into(),
                parameters: vec![path_param("path", "Absolute path of the directory")],
            },
        ]
    }

    fn allowed_paths(&self) -> Option<Vec<PathBuf>> {
        Some(self.roots.clone())
    }

    async fn invoke(&self, tool: &str, params: &Value) -> Result<String> {
        let path = params
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Other("missing 'path' parameter".into()))?;

        match tool {
            "file_read" => {
                let mut content = tokio::fs::read_to_string(path).await.map_err(Error::Io)?;
                if content.len() > READ_MAX_CHARS {
                    let mut end = READ_MAX_CHARS;
                    while !content.is_char_boundary(end) {
                        end -= 1;
                    }
                    content.truncate(end);
                    content.push_str("\n[file truncated]");
                }
                Ok(content)
            }
            "file_list" => {
                let mut entries = tokio::fs::read_dir(path).await.map_err(Error::Io)?;
                let mut names = Vec::new();
                while let Some(entry) = entries.next_entry().await.map_err(Error::Io)? {
                    let kind = if entry.path().is_dir() { "dir" } else { "file" };
                    names.push(format!("{kind}  {}", entry.file_name().to_string_lossy()));
                }
                names.sort();
                Ok(names.join("\n"))
            }
            _ => Err(Error::Other(format!("no such tool: {tool}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clock_reports_time() {
        let out = ClockPlugin
            .invoke("clock_now", &serde_json::json!({}))
            .await
            .unwrap();
        assert!(out.contains("UTC:"));
        assert!(out.contains("Unix:"));
    }

    #[test]
    fn web_policy_rejects_non_http() {
        let plugin = WebPlugin::new().unwrap();
        assert_eq!(
            plugin.policy_check("web_fetch", &serde_json::json!({"url": "https://example.com"})),
            PolicyDecision::Allow
        );
        assert!(matches!(
            plugin.policy_check("web_fetch", &serde_json::json!({"url": "file:///etc/passwd"})),
            PolicyDecision::Deny(_)
        ));
    }

    #[test]
    fn strip_html_drops_tags_and_scripts() {
        let html = r#"<html><head><style>body{color:red}</style>
            <script>alert("x")</script></head>
            <body><h1>Title</h1><p>Hello <b>world</b></p></body></html>"#;
        let text = strip_html(html);
        assert!(text.contains("Title"));
        assert!(text.contains("Hello world"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color:red"));
        assert!(!text.contains('<'));
    }

    #[tokio::test]
    async fn files_read_and_list() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("note.txt"), "remember this").unwrap();
        let plugin = FilesPlugin::new(vec![dir.path().to_path_buf()]);

        let content = plugin
            .invoke(
                "file_read",
                &serde_json::json!({"path": dir.path().join("note.txt").to_str().unwrap()}),
            )
            .await
            .unwrap();
        assert_eq!(content, "remember this");

        let listing = plugin
            .invoke(
                "file_list",
                &serde_json::json!({"path": dir.path().to_str().unwrap()}),
            )
            .await
            .unwrap();
        assert!(listing.contains("file  note.txt"));
    }
}
