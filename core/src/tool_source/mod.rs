//! Pluggable tool providers. A `ToolSource` is anything that can enumerate
//! [`ToolSpec`]s and execute one by name, independent of whether it is backed
//! by local Rust code or an external MCP server session.

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Message;

#[cfg(feature = "mcp")]
pub mod mcp;

#[cfg(feature = "mcp")]
pub use mcp::McpToolSource;

/// A tool's declared shape, aligned with MCP's `tools/list` result.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// The result of one tool invocation before truncation/recording.
#[derive(Debug, Clone, Default)]
pub struct ToolCallContent {
    pub text: String,
    pub rich_content: Vec<crate::message::ContentPart>,
    pub meta: Option<serde_json::Value>,
}

impl ToolCallContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), rich_content: Vec::new(), meta: None }
    }
}

#[derive(Debug, Error)]
pub enum ToolSourceError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("json-rpc error: {0}")]
    JsonRpc(String),
}

/// Per-call context available to tools: recent messages, the owning thread,
/// and the workspace root a path-accepting tool should resolve against.
#[derive(Debug, Clone, Default)]
pub struct ToolCallContext {
    pub recent_messages: Vec<Message>,
    pub thread_id: Option<String>,
    pub workspace_root: Option<std::path::PathBuf>,
}

impl ToolCallContext {
    pub fn new(recent_messages: Vec<Message>) -> Self {
        Self { recent_messages, thread_id: None, workspace_root: None }
    }
}

/// A provider of tools: a local registry, an aggregate of several sources, or
/// an MCP server session.
#[async_trait]
pub trait ToolSource: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolSourceError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallContent, ToolSourceError> {
        self.call_tool_with_context(name, arguments, None).await
    }

    async fn call_tool_with_context(
        &self,
        name: &str,
        arguments: serde_json::Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError>;
}
