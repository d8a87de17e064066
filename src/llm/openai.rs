//! OpenAI-style chat-completion client.
//!
//! Speaks `POST <base_url>/chat/completions` with a bearer key. Streaming
//! uses the provider's event-stream transport: `data:` lines are decoded,
//! a literal `[DONE]` terminates the sequence, and malformed JSON lines
//! are dropped silently (implementation chatter, not errors).

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::LlmConfig;

use super::stream::StreamDelta;
use super::{
    ChatMessage, ChatOptions, ChatResponse, ChatStream, LlmClient, LlmError, TokenUsage, ToolCall,
    ToolDefinition,
};

/// Client for an OpenAI-compatible chat-completion endpoint.
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request_body<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        tools: Option<&'a [ToolDefinition]>,
        options: &ChatOptions,
        stream: bool,
    ) -> ChatRequestBody<'a> {
        // Some providers reject empty tool arrays, so `tools` and
        // `tool_choice` are included only when the list is non-empty.
        let tools = tools.filter(|t| !t.is_empty());
        ChatRequestBody {
            model: &self.model,
            messages,
            tools,
            tool_choice: tools.map(|_| options.tool_choice.as_str()),
            temperature: options.temperature,
            stream,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        options: ChatOptions,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, LlmError> {
        let body = self.request_body(messages, tools, &options, false);

        let request = async {
            let response = self
                .client
                .post(self.endpoint())
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| LlmError::Network(format!("{e}")))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| LlmError::Network(format!("{e}")))?;

            if !status.is_success() {
                return Err(LlmError::Provider {
                    status: status.as_u16(),
                    message: text,
                });
            }

            let parsed: ChatCompletionResponse = serde_json::from_str(&text)
                .map_err(|e| LlmError::Parse(format!("{e}, body: {text}")))?;

            let choice = parsed
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| LlmError::Parse("No choices in response".to_string()))?;

            Ok(ChatResponse {
                content: choice.message.content,
                tool_calls: choice.message.tool_calls,
                finish_reason: choice.finish_reason,
                usage: parsed
                    .usage
                    .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
            })
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
            result = request => result,
        }
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        options: ChatOptions,
        cancel: &CancellationToken,
    ) -> Result<ChatStream, LlmError> {
        let body = self.request_body(messages, tools, &options, true);

        let mut source = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .eventsource()
            .map_err(|e| LlmError::Network(format!("{e}")))?;

        let cancel = cancel.clone();
        let stream = async_stream::stream! {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        source.close();
                        yield Err(LlmError::Cancelled);
                        break;
                    }
                    event = source.next() => match event {
                        None => break,
                        Some(Ok(Event::Open)) => {}
                        Some(Ok(Event::Message(message))) => {
                            if message.data.trim() == "[DONE]" {
                                source.close();
                                break;
                            }
                            match serde_json::from_str::<ChatCompletionChunk>(&message.data) {
                                Ok(chunk) => {
                                    if let Some(choice) = chunk.choices.into_iter().next() {
                                        yield Ok(choice.delta);
                                    }
                                }
                                // Not an error: providers interleave chatter
                                // that is not a completion chunk.
                                Err(_) => {}
                            }
                        }
                        Some(Err(reqwest_eventsource::Error::StreamEnded)) => break,
                        Some(Err(error)) => {
                            source.close();
                            yield Err(map_stream_error(error).await);
                            break;
                        }
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

async fn map_stream_error(error: reqwest_eventsource::Error) -> LlmError {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let message = response.text().await.unwrap_or_default();
            LlmError::Provider {
                status: status.as_u16(),
                message,
            }
        }
        reqwest_eventsource::Error::Transport(e) => LlmError::Network(format!("{e}")),
        other => LlmError::Parse(format!("{other}")),
    }
}

/// Request body (OpenAI-compatible).
#[derive(Debug, Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    temperature: f64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

/// Unary response body.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<UsageBody>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct UsageBody {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Streaming chunk body.
#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: StreamDelta,
}
