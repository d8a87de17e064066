//! Web access tools: search and readable-text fetch.
//!
//! Search is provider-polymorphic: a key-authenticated JSON API when a
//! key is configured, otherwise an HTML scrape of the public DuckDuckGo
//! endpoint. Fetched content is untrusted data; it is returned to the
//! model as tool output and never as instructions.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::Tool;
use crate::sandbox::WorkspaceRoot;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; Workshop/0.1)";
const DEFAULT_MAX_CHARS: usize = 20_000;

/// Search the web.
pub struct WebSearch {
    http: reqwest::Client,
    api_key: Option<String>,
}

impl WebSearch {
    pub fn new(http: reqwest::Client, api_key: Option<String>) -> Self {
        Self { http, api_key }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns result titles, URLs and snippets, and optionally fetches the top results' readable text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "count": {
                    "type": "integer",
                    "description": "Maximum number of results (default 5)"
                },
                "fetch": {
                    "type": "boolean",
                    "description": "Also fetch readable text for the top results (default true)"
                },
                "fetch_count": {
                    "type": "integer",
                    "description": "How many results to fetch (default min(3, count))"
                },
                "max_chars": {
                    "type": "integer",
                    "description": "Per-page character cap for fetched text (default 20000)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, _workspace: &WorkspaceRoot) -> anyhow::Result<Value> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'query' argument"))?;
        let count = args["count"].as_u64().unwrap_or(5).clamp(1, 10) as usize;
        let fetch = args["fetch"].as_bool().unwrap_or(true);
        let fetch_count = args["fetch_count"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or_else(|| count.min(3));
        let max_chars = args["max_chars"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_CHARS);

        let results = match &self.api_key {
            Some(key) if !key.is_empty() => search_json_api(&self.http, key, query, count).await?,
            _ => search_duckduckgo(&self.http, query, count).await?,
        };

        let to_fetch: Vec<(String, String)> = results
            .iter()
            .take(fetch_count)
            .map(|r| (r.url.clone(), r.title.clone()))
            .collect();

        let mut output = json!({ "results": results });

        if fetch {
            let mut fetched = Vec::new();
            for (url, title) in to_fetch {
                match fetch_readable(&self.http, &url, max_chars).await {
                    Ok(page) => fetched.push(json!({
                        "url": url,
                        "title": page.title.unwrap_or(title),
                        "text": page.text,
                    })),
                    // A failed page never fails the whole search.
                    Err(e) => fetched.push(json!({
                        "url": url,
                        "title": title,
                        "text": "",
                        "error": format!("{e}"),
                    })),
                }
            }
            output["fetched"] = json!(fetched);
        }

        Ok(output)
    }
}

/// Key-authenticated JSON search API.
#[derive(Debug, Serialize)]
struct JsonApiRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct JsonApiResponse {
    #[serde(default)]
    results: Vec<JsonApiResult>,
}

#[derive(Debug, Deserialize)]
struct JsonApiResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

async fn search_json_api(
    http: &reqwest::Client,
    api_key: &str,
    query: &str,
    count: usize,
) -> anyhow::Result<Vec<SearchResult>> {
    let request = JsonApiRequest {
        api_key,
        query,
        max_results: count,
    };

    let response = http
        .post("https://api.tavily.com/search")
        .timeout(Duration::from_secs(30))
        .json(&request)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Search API error ({status}): {body}");
    }

    let parsed: JsonApiResponse = response.json().await?;
    Ok(parsed
        .results
        .into_iter()
        .take(count)
        .map(|r| SearchResult {
            title: r.title,
            url: r.url,
            snippet: r.content,
        })
        .collect())
}

/// Fallback scraper over the public DuckDuckGo HTML endpoint.
async fn search_duckduckgo(
    http: &reqwest::Client,
    query: &str,
    count: usize,
) -> anyhow::Result<Vec<SearchResult>> {
    let url = format!(
        "https://html.duckduckgo.com/html/?q={}",
        urlencoding::encode(query)
    );

    let response = http
        .get(&url)
        .header("User-Agent", USER_AGENT)
        .timeout(Duration::from_secs(30))
        .send()
        .await?;
    let html = response.text().await?;

    if html.contains("anomaly-modal") || html.contains("Unfortunately, bots") {
        anyhow::bail!(
            "Search endpoint blocked the request; configure a search API key for reliable results"
        );
    }

    Ok(extract_ddg_results(&html, count))
}

/// Extract search results from DuckDuckGo HTML without an HTML parser.
fn extract_ddg_results(html: &str, count: usize) -> Vec<SearchResult> {
    let mut results = Vec::new();

    for chunk in html.split("class=\"result__body\"").skip(1) {
        if results.len() >= count {
            break;
        }

        let title = chunk
            .split("class=\"result__a\"")
            .nth(1)
            .and_then(|s| s.split('>').nth(1))
            .and_then(|s| s.split('<').next())
            .unwrap_or("");

        let href = chunk
            .split("class=\"result__a\"")
            .nth(1)
            .and_then(|s| s.split("href=\"").nth(1))
            .and_then(|s| s.split('"').next())
            .unwrap_or("");

        let snippet = chunk
            .split("class=\"result__snippet\"")
            .nth(1)
            .and_then(|s| s.split('>').nth(1))
            .and_then(|s| s.split('<').next())
            .unwrap_or("");

        if !title.is_empty() {
            results.push(SearchResult {
                title: html_decode(title),
                url: html_decode(href),
                snippet: html_decode(snippet),
            });
        }
    }

    results
}

/// Fetch readable text from a URL.
pub struct WebFetch {
    http: reqwest::Client,
}

impl WebFetch {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Tool for WebFetch {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its readable text, single-spaced and truncated to max_chars."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch"
                },
                "max_chars": {
                    "type": "integer",
                    "description": "Character cap for the extracted text (default 20000)"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value, _workspace: &WorkspaceRoot) -> anyhow::Result<Value> {
        let url = args["url"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'url' argument"))?;
        let max_chars = args["max_chars"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_CHARS);

        let page = fetch_readable(&self.http, url, max_chars).await?;

        let mut output = json!({ "url": url, "text": page.text });
        if let Some(title) = page.title {
            output["title"] = json!(title);
        }
        Ok(output)
    }
}

/// A fetched page reduced to readable text.
pub(crate) struct ReadablePage {
    pub title: Option<String>,
    pub text: String,
    pub truncated: bool,
}

/// Fetch `url` and reduce it to single-spaced readable text capped at
/// `max_chars` characters.
pub(crate) async fn fetch_readable(
    http: &reqwest::Client,
    url: &str,
    max_chars: usize,
) -> anyhow::Result<ReadablePage> {
    let parsed = url::Url::parse(url).map_err(|e| anyhow::anyhow!("Invalid URL: {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("Only http(s) URLs are supported, got '{}'", parsed.scheme());
    }

    let response = http
        .get(parsed)
        .header("User-Agent", USER_AGENT)
        .timeout(Duration::from_secs(60))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("HTTP error: {status}");
    }

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let body = response.text().await?;

    let looks_like_html = content_type.contains("text/html")
        || body.trim_start().starts_with("<!DOCTYPE")
        || body.trim_start().starts_with("<html");

    let (title, text) = if looks_like_html {
        (extract_title(&body), extract_text_from_html(&body))
    } else {
        (None, collapse_whitespace(&body))
    };

    let (text, truncated) = truncate_chars(&text, max_chars);
    Ok(ReadablePage {
        title,
        text,
        truncated,
    })
}

/// Extract the `<title>` element, if any.
pub(crate) fn extract_title(html: &str) -> Option<String> {
    let start = html.find("<title")?;
    let rest = &html[start..];
    let open_end = rest.find('>')?;
    let rest = &rest[open_end + 1..];
    let close = rest.find("</title>")?;
    let title = html_decode(rest[..close].trim());
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// Extract readable text from HTML: drop scripts and styles, strip tags,
/// collapse whitespace.
pub(crate) fn extract_text_from_html(html: &str) -> String {
    let mut text = html.to_string();

    for (open, close) in [("<script", "</script>"), ("<style", "</style>")] {
        while let Some(start) = text.find(open) {
            if let Some(end) = text[start..].find(close) {
                text = format!("{}{}", &text[..start], &text[start + end + close.len()..]);
            } else {
                text.truncate(start);
                break;
            }
        }
    }

    let mut result = String::new();
    let mut in_tag = false;
    for c in text.chars() {
        if c == '<' {
            in_tag = true;
        } else if c == '>' {
            in_tag = false;
            result.push(' ');
        } else if !in_tag {
            result.push(c);
        }
    }

    html_decode(&collapse_whitespace(&result))
}

/// Collapse all whitespace runs to single spaces.
pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Basic HTML entity decoding.
pub(crate) fn html_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

/// Truncate to `max_chars` characters on a character boundary.
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> (String, bool) {
    if s.chars().count() <= max_chars {
        (s.to_string(), false)
    } else {
        (s.chars().take(max_chars).collect(), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_text_extraction_strips_scripts_and_tags() {
        let html = r#"<html><head><title>Hi &amp; Bye</title>
            <script>var x = "<p>not text</p>";</script>
            <style>p { color: red }</style></head>
            <body><p>First   paragraph.</p><p>Second one.</p></body></html>"#;

        let text = extract_text_from_html(html);
        assert!(text.contains("First paragraph."));
        assert!(text.contains("Second one."));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("var x"));

        assert_eq!(extract_title(html).as_deref(), Some("Hi & Bye"));
    }

    #[test]
    fn whitespace_collapses_to_single_spaces() {
        assert_eq!(collapse_whitespace("a\n\n  b\t\tc"), "a b c");
    }

    #[test]
    fn truncation_counts_characters() {
        let (text, truncated) = truncate_chars("héllo wörld", 5);
        assert_eq!(text, "héllo");
        assert!(truncated);

        let (text, truncated) = truncate_chars("short", 10);
        assert_eq!(text, "short");
        assert!(!truncated);
    }

    #[test]
    fn ddg_extraction_finds_results() {
        let html = r##"
        <div class="result__body">
          <a class="result__a" href="https://example.com/a">First &amp; Best</a>
          <a class="result__snippet" href="#">Snippet one</a>
        </div>
        <div class="result__body">
          <a class="result__a" href="https://example.com/b">Second</a>
          <a class="result__snippet" href="#">Snippet two</a>
        </div>"##;

        let results = extract_ddg_results(html, 5);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "First & Best");
        assert_eq!(results[0].url, "https://example.com/a");
        assert_eq!(results[0].snippet, "Snippet one");

        let capped = extract_ddg_results(html, 1);
        assert_eq!(capped.len(), 1);
    }
}
