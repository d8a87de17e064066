//! Single-shot specialist invocation.
//!
//! A specialist never uses tools: one chat call with its own system
//! prompt and the user's request, temperature 0.2, tool choice off.

use tokio_util::sync::CancellationToken;

use super::AgentProfile;
use crate::llm::{ChatMessage, ChatOptions, LlmClient, LlmError, Role, ToolChoice};

/// Run the specialist once and return its trimmed output.
pub async fn run_specialist(
    llm: &dyn LlmClient,
    profile: &AgentProfile,
    request_text: &str,
    cancel: &CancellationToken,
) -> Result<String, LlmError> {
    let messages = [
        ChatMessage::new(Role::System, profile.system_prompt),
        ChatMessage::new(Role::User, request_text),
    ];
    let options = ChatOptions {
        temperature: 0.2,
        tool_choice: ToolChoice::None,
    };

    let response = llm.chat(&messages, None, options, cancel).await?;
    Ok(response.content.unwrap_or_default().trim().to_string())
}

/// The system-role note injected into the main conversation after a
/// specialist runs.
pub fn specialist_note(name: &str, text: &str) -> String {
    format!(
        "Specialist agent ({name}) output:\n{text}\nUse this as draft guidance and respond to the user."
    )
}
