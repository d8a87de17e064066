//! The bounded reason/act loop.
//!
//! Each turn appends the user message, optionally seeds the conversation
//! with a specialist note, then alternates model calls and tool
//! executions until the model produces text or the step bound is hit.
//!
//! # Algorithm
//! 1. Append and log the user message
//! 2. Route; on a match, run the specialist and inject its note
//! 3. Loop up to `max_steps`:
//!    - call the provider (streaming when an observer is attached)
//!    - nothing usable -> sentinel text
//!    - tool calls -> execute sequentially, append results, continue
//!    - text -> return it
//! 4. Step bound exhausted -> sentinel text
//!
//! Tool-level failures are embedded in the tool result so the model can
//! react; they never abort the loop. Provider errors and cancellation
//! propagate out of the turn.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::router::route;
use super::specialist::{run_specialist, specialist_note};
use super::{Confirm, EventSink, LoopEvent};
use crate::llm::{
    ChatMessage, ChatOptions, ChatResponse, LlmClient, LlmError, Role, ToolCall,
    ToolCallAssembler, ToolDefinition,
};
use crate::session::Session;
use crate::tools::{is_write_tool, ToolRegistry};

/// Error surfaced by a turn.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Provider(LlmError),
}

impl From<LlmError> for LoopError {
    fn from(error: LlmError) -> Self {
        match error {
            LlmError::Cancelled => LoopError::Cancelled,
            other => LoopError::Provider(other),
        }
    }
}

/// The agent execution core. One instance drives one session's turns.
pub struct AgentLoop {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    max_steps: usize,
    auto_approve: bool,
    confirm: Option<Arc<dyn Confirm>>,
}

impl AgentLoop {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        max_steps: usize,
        auto_approve: bool,
        confirm: Option<Arc<dyn Confirm>>,
    ) -> Self {
        Self {
            llm,
            tools,
            max_steps,
            auto_approve,
            confirm,
        }
    }

    /// Run one turn. Returns the final text (possibly a sentinel).
    pub async fn run_turn(
        &self,
        session: &mut Session,
        input: &str,
        observer: Option<EventSink>,
        cancel: &CancellationToken,
    ) -> Result<String, LoopError> {
        session.logger.log_message("user", Some(input), None);
        session.push(ChatMessage::new(Role::User, input));

        if let Some(decision) = route(input) {
            tracing::debug!(
                agent = decision.profile.id,
                reason = %decision.reason,
                "specialist selected"
            );
            let text =
                run_specialist(self.llm.as_ref(), decision.profile, input, cancel).await?;
            if !text.is_empty() {
                if let Some(sink) = &observer {
                    sink(LoopEvent::AgentNote {
                        name: decision.profile.name.to_string(),
                        content: text.clone(),
                    });
                }
                session.logger.log_agent(
                    decision.profile.id,
                    decision.profile.name,
                    &decision.reason,
                    &text,
                );
                session.push(ChatMessage::new(
                    Role::System,
                    specialist_note(decision.profile.name, &text),
                ));
            }
        }

        let schemas = self.tools.get_tool_schemas();

        for step in 0..self.max_steps {
            tracing::debug!(step, "agent loop step");

            let response = match &observer {
                Some(sink) => self.stream_step(session, &schemas, sink, cancel).await?,
                None => self
                    .llm
                    .chat(
                        &session.conversation,
                        Some(&schemas),
                        ChatOptions::default(),
                        cancel,
                    )
                    .await?,
            };

            let tool_calls = response.tool_calls.unwrap_or_default();
            let content = response.content.unwrap_or_default();

            if tool_calls.is_empty() && content.trim().is_empty() {
                return Ok("No response from model.".to_string());
            }

            session.logger.log_message(
                "assistant",
                if content.is_empty() {
                    None
                } else {
                    Some(&content)
                },
                Some(&tool_calls),
            );

            if tool_calls.is_empty() {
                session.push(ChatMessage::new(Role::Assistant, content.clone()));
                return Ok(content.trim().to_string());
            }

            session.push(ChatMessage::assistant_with_tools(
                if content.is_empty() {
                    None
                } else {
                    Some(content)
                },
                tool_calls.clone(),
            ));

            // Sequential, in presentation order. All results are appended
            // before the next model call.
            for call in &tool_calls {
                self.execute_tool_call(session, call).await;
            }
        }

        Ok(format!(
            "Reached max steps ({}) without final response.",
            self.max_steps
        ))
    }

    /// Stream one model call, fanning tokens out to the observer and
    /// assembling tool-call deltas. The assistant message is appended by
    /// the caller only after the stream completes.
    async fn stream_step(
        &self,
        session: &Session,
        schemas: &[ToolDefinition],
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, LoopError> {
        let mut stream = self
            .llm
            .chat_stream(
                &session.conversation,
                Some(schemas),
                ChatOptions::default(),
                cancel,
            )
            .await?;

        let mut content = String::new();
        let mut assembler = ToolCallAssembler::new();

        while let Some(delta) = stream.next().await {
            let delta = delta?;
            if let Some(token) = delta.content {
                if !token.is_empty() {
                    content.push_str(&token);
                    sink(LoopEvent::Token(token));
                }
            }
            for tool_call in &delta.tool_calls {
                assembler.apply(tool_call);
            }
        }

        Ok(ChatResponse {
            content: if content.is_empty() {
                None
            } else {
                Some(content)
            },
            tool_calls: if assembler.is_empty() {
                None
            } else {
                Some(assembler.finish())
            },
            finish_reason: None,
            usage: None,
        })
    }

    /// Execute one tool call and append its result message. Failures
    /// become `{error}` payloads, never loop aborts.
    async fn execute_tool_call(&self, session: &mut Session, call: &ToolCall) {
        let name = &call.function.name;

        let result = match serde_json::from_str::<Value>(&call.function.arguments) {
            Err(_) => {
                session
                    .logger
                    .log_tool_call(name, &Value::String(call.function.arguments.clone()));
                json!({ "error": format!("Invalid tool arguments for {name}") })
            }
            Ok(args) => {
                session.logger.log_tool_call(name, &args);

                if is_write_tool(name) && !self.auto_approve {
                    let approved = match &self.confirm {
                        Some(confirm) => {
                            confirm
                                .confirm(&format!("Allow {name} to modify the workspace?"))
                                .await
                        }
                        None => false,
                    };
                    if !approved {
                        let declined = json!({ "error": "User declined write operation" });
                        session.logger.log_tool_result(name, &declined);
                        session.push(ChatMessage::tool_result(&call.id, declined.to_string()));
                        return;
                    }
                }

                match self.tools.execute(name, args, &session.workspace).await {
                    Ok(value) => value,
                    Err(e) => json!({ "error": format!("{e}") }),
                }
            }
        };

        session.logger.log_tool_result(name, &result);
        session.push(ChatMessage::tool_result(&call.id, result.to_string()));
    }
}
