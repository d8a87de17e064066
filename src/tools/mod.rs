//! Tool system for the agent.
//!
//! Tools are the hands and eyes of the agent: sandboxed file access, web
//! search and fetch, and document summarization. Every tool declares a
//! JSON-Schema parameters object; argument parsing happens at the
//! registry boundary and failures become structured tool results rather
//! than loop aborts.
//!
//! All file paths resolve through the workspace sandbox first; a tool
//! never receives a path outside the session's workspace root.

mod fs;
mod summarize;
mod web;

pub use fs::{FsApplyPatch, FsList, FsRead, FsWrite};
pub use summarize::Summarize;
pub use web::{WebFetch, WebSearch};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{FunctionDefinition, LlmClient, ToolDefinition};
use crate::sandbox::WorkspaceRoot;

/// Tools that mutate the workspace and therefore pass through the
/// confirm collaborator when auto-approve is off.
pub const WRITE_TOOLS: &[&str] = &["fs_write", "fs_apply_patch"];

/// Whether `name` is on the writable-tool allow-list.
pub fn is_write_tool(name: &str) -> bool {
    WRITE_TOOLS.contains(&name)
}

/// Information about a tool for display purposes.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// Trait for implementing tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with parsed arguments inside `workspace`.
    async fn execute(&self, args: Value, workspace: &WorkspaceRoot) -> anyhow::Result<Value>;
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry (no built-in tools).
    pub fn empty() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Create a registry with the full built-in catalog.
    pub fn with_catalog(
        llm: Arc<dyn LlmClient>,
        http: reqwest::Client,
        search_api_key: Option<String>,
    ) -> Self {
        let mut registry = Self::empty();

        registry.register(Arc::new(fs::FsList));
        registry.register(Arc::new(fs::FsRead));
        registry.register(Arc::new(fs::FsWrite));
        registry.register(Arc::new(fs::FsApplyPatch));

        registry.register(Arc::new(web::WebSearch::new(
            http.clone(),
            search_api_key,
        )));
        registry.register(Arc::new(web::WebFetch::new(http.clone())));

        registry.register(Arc::new(summarize::Summarize::new(llm, http)));

        tracing::debug!("tool registry ready with {} tools", registry.tools.len());
        registry
    }

    /// Add a tool, replacing any existing one with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// List all available tools, sorted by name.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Check if a tool exists by name.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get tool schemas in provider-compatible format.
    pub fn get_tool_schemas(&self) -> Vec<ToolDefinition> {
        let mut schemas: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters_schema(),
                },
            })
            .collect();
        schemas.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        schemas
    }

    /// Execute a tool by name inside `workspace`.
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        workspace: &WorkspaceRoot,
    ) -> anyhow::Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {}", name))?;

        tool.execute(args, workspace).await
    }
}
