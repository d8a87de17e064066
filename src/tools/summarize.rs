//! Document summarizer: chunked map-reduce over a file or URL.
//!
//! The pipeline is deterministic: load, normalize whitespace, chunk on
//! paragraph boundaries, summarize each chunk, then combine. Failures at
//! any stage land in the result's `error` field; the tool itself never
//! raises past the registry.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::web::{extract_text_from_html, extract_title, fetch_readable, truncate_chars};
use super::Tool;
use crate::llm::{ChatMessage, ChatOptions, LlmClient, Role, ToolChoice};
use crate::sandbox::WorkspaceRoot;

const DEFAULT_MAX_CHARS: usize = 60_000;
const CHUNK_CHARS: usize = 12_000;

const MAP_SYSTEM_PROMPT: &str =
    "You are a precise summarizer. Summarize the provided text faithfully; do not invent facts.";
const COMBINE_SYSTEM_PROMPT: &str =
    "You combine chunk summaries of a single document into one coherent summary. Do not invent facts.";

/// Summarization style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryStyle {
    Brief,
    Detailed,
    Bullets,
}

impl SummaryStyle {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "brief" => Some(Self::Brief),
            "detailed" => Some(Self::Detailed),
            "bullets" => Some(Self::Bullets),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Brief => "brief",
            Self::Detailed => "detailed",
            Self::Bullets => "bullets",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            Self::Brief => "Write 5-8 sentences.",
            Self::Bullets => "Write 5-10 bullet points.",
            Self::Detailed => "Write short paragraphs covering every major point.",
        }
    }
}

/// Summarize a document from the workspace or the web.
pub struct Summarize {
    llm: Arc<dyn LlmClient>,
    http: reqwest::Client,
}

impl Summarize {
    pub fn new(llm: Arc<dyn LlmClient>, http: reqwest::Client) -> Self {
        Self { llm, http }
    }

    async fn load_source(
        &self,
        source: &str,
        workspace: &WorkspaceRoot,
        max_chars: usize,
    ) -> anyhow::Result<(String, Option<String>, bool, &'static str)> {
        if source.starts_with("http://") || source.starts_with("https://") {
            let page = fetch_readable(&self.http, source, max_chars).await?;
            return Ok((page.text, page.title, page.truncated, "url"));
        }

        let resolved = workspace.resolve(source)?;
        if !resolved.absolute.is_file() {
            anyhow::bail!("File not found: {}", resolved.relative);
        }
        let raw = tokio::fs::read_to_string(&resolved.absolute).await?;

        let ext = resolved
            .absolute
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let (text, title) = if ext == "html" || ext == "htm" {
            (extract_text_from_html(&raw), extract_title(&raw))
        } else {
            (raw, None)
        };

        let (text, truncated) = truncate_chars(&text, max_chars);
        Ok((text, title, truncated, "file"))
    }

    async fn summarize_text(
        &self,
        text: &str,
        style: SummaryStyle,
        focus: Option<&str>,
    ) -> anyhow::Result<(String, usize)> {
        let chunks = chunk_text(text, CHUNK_CHARS);
        let chunk_count = chunks.len();
        let cancel = CancellationToken::new();

        let options = ChatOptions {
            temperature: 0.2,
            tool_choice: ToolChoice::None,
        };

        let focus_clause = focus
            .map(|f| format!(" Focus on: {f}."))
            .unwrap_or_default();

        let mut summaries = Vec::with_capacity(chunk_count);
        for (index, chunk) in chunks.iter().enumerate() {
            let instruction = format!(
                "Summarize part {} of {}. {}{}",
                index + 1,
                chunk_count,
                style.instruction(),
                focus_clause
            );
            let messages = [
                ChatMessage::new(Role::System, MAP_SYSTEM_PROMPT),
                ChatMessage::new(Role::User, format!("{instruction}\n\n{chunk}")),
            ];
            let response = self
                .llm
                .chat(&messages, None, options.clone(), &cancel)
                .await?;
            summaries.push(response.content.unwrap_or_default().trim().to_string());
        }

        if summaries.len() < 2 {
            return Ok((summaries.pop().unwrap_or_default(), chunk_count));
        }

        let instruction = format!(
            "Combine the {} chunk summaries below into one summary. {}{}",
            summaries.len(),
            style.instruction(),
            focus_clause
        );
        let messages = [
            ChatMessage::new(Role::System, COMBINE_SYSTEM_PROMPT),
            ChatMessage::new(
                Role::User,
                format!("{instruction}\n\n{}", summaries.join("\n\n---\n\n")),
            ),
        ];
        let response = self
            .llm
            .chat(&messages, None, options, &cancel)
            .await?;

        Ok((
            response.content.unwrap_or_default().trim().to_string(),
            chunk_count,
        ))
    }
}

#[async_trait]
impl Tool for Summarize {
    fn name(&self) -> &str {
        "summarize"
    }

    fn description(&self) -> &str {
        "Summarize a document. The source is a workspace-relative file path or an http(s) URL; styles are brief, detailed, or bullets."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source": {
                    "type": "string",
                    "description": "Workspace-relative file path or http(s) URL"
                },
                "style": {
                    "type": "string",
                    "enum": ["brief", "detailed", "bullets"],
                    "description": "Summary style (default brief)"
                },
                "focus": {
                    "type": "string",
                    "description": "Optional aspect to focus on"
                },
                "max_chars": {
                    "type": "integer",
                    "description": "Character cap on the loaded text (default 60000)"
                }
            },
            "required": ["source"]
        })
    }

    async fn execute(&self, args: Value, workspace: &WorkspaceRoot) -> anyhow::Result<Value> {
        let Some(source) = args["source"].as_str().map(String::from) else {
            return Ok(json!({ "error": "Missing 'source' argument" }));
        };
        let style_raw = args["style"].as_str().unwrap_or("brief");
        let Some(style) = SummaryStyle::parse(style_raw) else {
            return Ok(json!({
                "source": source,
                "error": format!("Unknown style '{style_raw}' (expected brief, detailed, or bullets)"),
            }));
        };
        let focus = args["focus"].as_str().map(String::from);
        let max_chars = args["max_chars"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_CHARS);

        let (text, title, truncated, source_type) =
            match self.load_source(&source, workspace, max_chars).await {
                Ok(loaded) => loaded,
                Err(e) => {
                    return Ok(json!({
                        "source": source,
                        "style": style.as_str(),
                        "error": format!("Failed to load source: {e}"),
                    }));
                }
            };

        let text = normalize_whitespace(&text);

        let mut output = json!({
            "source": source,
            "source_type": source_type,
            "style": style.as_str(),
            "truncated": truncated,
            "text_chars": text.chars().count(),
        });
        if let Some(title) = title {
            output["title"] = json!(title);
        }
        if let Some(focus) = &focus {
            output["focus"] = json!(focus);
        }

        if text.trim().is_empty() {
            output["error"] = json!("Source contains no text");
            return Ok(output);
        }

        match self.summarize_text(&text, style, focus.as_deref()).await {
            Ok((summary, chunk_count)) => {
                output["summary"] = json!(summary);
                output["chunk_count"] = json!(chunk_count);
            }
            Err(e) => {
                output["error"] = json!(format!("Summarization failed: {e}"));
            }
        }

        Ok(output)
    }
}

/// Normalize line endings, collapse runs of tabs/spaces, and cap blank
/// runs at one empty line.
pub(crate) fn normalize_whitespace(text: &str) -> String {
    static SPACES: OnceLock<Regex> = OnceLock::new();
    static NEWLINES: OnceLock<Regex> = OnceLock::new();

    let text = text.replace("\r\n", "\n");
    let text = SPACES
        .get_or_init(|| Regex::new(r"[ \t]+").expect("valid regex"))
        .replace_all(&text, " ");
    NEWLINES
        .get_or_init(|| Regex::new(r"\n{3,}").expect("valid regex"))
        .replace_all(&text, "\n\n")
        .into_owned()
}

/// Split into chunks of at most `limit` characters, preferring blank-line
/// boundaries. A single oversized paragraph is hard-sliced.
pub(crate) fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for paragraph in text.split("\n\n") {
        let paragraph_chars = paragraph.chars().count();

        if paragraph_chars > limit {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            let slice: Vec<char> = paragraph.chars().collect();
            for piece in slice.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        // +2 for the separating blank line.
        if !current.is_empty() && current_chars + 2 + paragraph_chars > limit {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
            current_chars += 2;
        }
        current.push_str(paragraph);
        current_chars += paragraph_chars;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, ChatStream, LlmError, TokenUsage, ToolDefinition};
    use crate::sandbox::ensure_root;
    use std::sync::Mutex;

    /// Scripted provider: replies with canned text and records prompts.
    struct ScriptedLlm {
        replies: Mutex<Vec<String>>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().map(String::from).collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(
            &self,
            messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
            _options: ChatOptions,
            _cancel: &CancellationToken,
        ) -> Result<ChatResponse, LlmError> {
            self.seen
                .lock()
                .unwrap()
                .push(messages.last().and_then(|m| m.content.clone()).unwrap_or_default());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| "fallback".to_string());
            Ok(ChatResponse {
                content: Some(reply),
                tool_calls: None,
                finish_reason: Some("stop".to_string()),
                usage: Some(TokenUsage::new(1, 1)),
            })
        }

        async fn chat_stream(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
            _options: ChatOptions,
            _cancel: &CancellationToken,
        ) -> Result<ChatStream, LlmError> {
            unimplemented!("summarizer uses unary calls")
        }
    }

    #[test]
    fn whitespace_normalization_rules() {
        let input = "a\r\nb\t\t c\n\n\n\nd";
        assert_eq!(normalize_whitespace(input), "a\nb c\n\nd");
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("hello world", 12_000);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn paragraphs_pack_greedily() {
        let a = "a".repeat(7_000);
        let b = "b".repeat(7_000);
        let c = "c".repeat(2_000);
        let text = format!("{a}\n\n{b}\n\n{c}");

        let chunks = chunk_text(&text, 12_000);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with('a'));
        // b and c fit together under the limit.
        assert!(chunks[1].starts_with('b'));
        assert!(chunks[1].ends_with('c'));
    }

    #[test]
    fn oversized_paragraph_is_hard_sliced() {
        let text = "x".repeat(25_000);
        let chunks = chunk_text(&text, 12_000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 12_000);
        assert_eq!(chunks[2].chars().count(), 1_000);
    }

    #[tokio::test]
    async fn summarizes_small_file_without_combine() {
        let dir = tempfile::tempdir().unwrap();
        let root = ensure_root(dir.path()).unwrap();
        std::fs::write(root.path().join("doc.txt"), "Some facts about solar panels.").unwrap();

        let llm = Arc::new(ScriptedLlm::new(vec!["A short summary."]));
        let tool = Summarize::new(llm.clone(), reqwest::Client::new());

        let result = tool
            .execute(json!({"source": "doc.txt"}), &root)
            .await
            .unwrap();

        assert_eq!(result["summary"], "A short summary.");
        assert_eq!(result["chunk_count"], 1);
        assert_eq!(result["source_type"], "file");
        assert_eq!(result["truncated"], false);
        assert!(result.get("error").is_none());
        // Single chunk: no combine pass.
        assert_eq!(llm.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn long_document_gets_combine_pass() {
        let dir = tempfile::tempdir().unwrap();
        let root = ensure_root(dir.path()).unwrap();
        let body = format!("{}\n\n{}", "a".repeat(10_000), "b".repeat(10_000));
        std::fs::write(root.path().join("long.txt"), body).unwrap();

        let llm = Arc::new(ScriptedLlm::new(vec!["part one", "part two", "combined"]));
        let tool = Summarize::new(llm.clone(), reqwest::Client::new());

        let result = tool
            .execute(json!({"source": "long.txt", "style": "bullets"}), &root)
            .await
            .unwrap();

        assert_eq!(result["summary"], "combined");
        assert_eq!(result["chunk_count"], 2);

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[2].contains("part one"));
        assert!(seen[2].contains("part two"));
    }

    #[tokio::test]
    async fn unknown_style_is_an_error_field() {
        let dir = tempfile::tempdir().unwrap();
        let root = ensure_root(dir.path()).unwrap();

        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let tool = Summarize::new(llm, reqwest::Client::new());

        let result = tool
            .execute(json!({"source": "doc.txt", "style": "haiku"}), &root)
            .await
            .unwrap();
        assert!(result["error"].as_str().unwrap().contains("Unknown style"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error_field() {
        let dir = tempfile::tempdir().unwrap();
        let root = ensure_root(dir.path()).unwrap();

        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let tool = Summarize::new(llm, reqwest::Client::new());

        let result = tool
            .execute(json!({"source": "missing.txt"}), &root)
            .await
            .unwrap();
        assert!(result["error"]
            .as_str()
            .unwrap()
            .contains("Failed to load source"));
    }
}
