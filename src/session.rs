//! Conversation and session state.
//!
//! A session owns one conversation, one workspace root, and one log.
//! The conversation always starts with the system prompt; a reset
//! replaces it with a fresh single-entry list. Nothing survives process
//! exit.

use std::sync::Arc;

use crate::llm::{ChatMessage, Role};
use crate::logger::SessionLogger;
use crate::sandbox::WorkspaceRoot;
use crate::tools::ToolRegistry;

/// Base system prompt for the main loop.
pub const SYSTEM_PROMPT: &str = "You are Workshop, a local-first assistant. \
You can search the web, fetch pages, summarize documents, and read and \
write files inside the user's workspace. Use tools when they help; answer \
directly when they do not. Be concise and concrete.";

/// The base prompt plus an enumeration of the registered tools.
pub fn system_prompt_with_tools(tools: &ToolRegistry) -> String {
    let catalog = tools
        .list_tools()
        .iter()
        .map(|t| format!("- **{}**: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");
    if catalog.is_empty() {
        SYSTEM_PROMPT.to_string()
    } else {
        format!("{SYSTEM_PROMPT}\n\n## Available tools\n{catalog}")
    }
}

pub struct Session {
    pub id: String,
    pub conversation: Vec<ChatMessage>,
    pub workspace: WorkspaceRoot,
    pub user_id: String,
    pub logger: Arc<SessionLogger>,
    system_prompt: String,
}

impl Session {
    pub fn new(
        workspace: WorkspaceRoot,
        user_id: impl Into<String>,
        logger: Arc<SessionLogger>,
    ) -> Self {
        Self::with_system_prompt(workspace, user_id, logger, SYSTEM_PROMPT)
    }

    pub fn with_system_prompt(
        workspace: WorkspaceRoot,
        user_id: impl Into<String>,
        logger: Arc<SessionLogger>,
        system_prompt: impl Into<String>,
    ) -> Self {
        let system_prompt = system_prompt.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation: vec![ChatMessage::new(Role::System, system_prompt.clone())],
            workspace,
            user_id: user_id.into(),
            logger,
            system_prompt,
        }
    }

    /// Drop everything but a fresh system message.
    pub fn reset(&mut self) {
        self.conversation = vec![ChatMessage::new(Role::System, self.system_prompt.clone())];
    }

    /// Append a message to the conversation.
    pub fn push(&mut self, message: ChatMessage) {
        self.conversation.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ensure_root;

    fn session() -> (tempfile::TempDir, Session) {
        let dir = tempfile::tempdir().unwrap();
        let root = ensure_root(dir.path()).unwrap();
        let session = Session::new(root, "tester", Arc::new(SessionLogger::disabled()));
        (dir, session)
    }

    #[test]
    fn conversation_starts_with_system() {
        let (_dir, session) = session();
        assert_eq!(session.conversation.len(), 1);
        assert_eq!(session.conversation[0].role, Role::System);
    }

    #[test]
    fn tool_catalog_lands_in_system_prompt() {
        let mut registry = ToolRegistry::empty();
        registry.register(Arc::new(crate::tools::FsList));
        let prompt = system_prompt_with_tools(&registry);
        assert!(prompt.starts_with(SYSTEM_PROMPT));
        assert!(prompt.contains("## Available tools"));
        assert!(prompt.contains("**fs_list**"));

        assert_eq!(system_prompt_with_tools(&ToolRegistry::empty()), SYSTEM_PROMPT);
    }

    #[test]
    fn reset_restores_single_system_entry() {
        let (_dir, mut session) = session();
        session.push(ChatMessage::new(Role::User, "hi"));
        session.push(ChatMessage::new(Role::Assistant, "hello"));
        assert_eq!(session.conversation.len(), 3);

        session.reset();
        assert_eq!(session.conversation.len(), 1);
        assert_eq!(session.conversation[0].role, Role::System);
    }
}
