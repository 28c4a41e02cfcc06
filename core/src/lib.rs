//! # adnify-core
//!
//! The agent runtime sitting between a user's chat input and LLM providers: it
//! drives multi-turn tool-using conversations, adapts to heterogeneous
//! streaming protocols, compacts unbounded dialogue histories, snapshots file
//! state for rollback, and coordinates concurrent tool execution with human
//! approval gates.
//!
//! ## Main modules
//!
//! - [`message`]: [`Thread`], [`Message`], [`ToolCall`], [`ContextItem`] — the conversation data model.
//! - [`store`]: [`ConversationStore`] — the sole mutator of thread data.
//! - [`adapter`]: [`AdapterSpec`], [`LlmAdapter`], [`NormalizedDelta`] — declarative vendor streaming.
//! - [`tools`]: [`Tool`], [`ToolRegistry`], [`Executor`] — tool visibility, validation, approval, truncation.
//! - [`tool_source`]: [`ToolSource`], [`tools::AggregateToolSource`] — pluggable tool providers, including an MCP-over-HTTP source behind the `mcp` feature.
//! - [`partial_json`]: [`parse_partial_json`] — recovers structured args from truncated JSON.
//! - [`checkpoint`]: [`CheckpointStore`] — content-addressed file snapshots and restore.
//! - [`compaction`]: [`CompactionEngine`] — tiered context summarization.
//! - [`turn_loop`]: [`TurnState`], [`run_turn`] — the explicit per-turn state machine.
//! - [`host`]: [`Host`] and friends — the trait boundary to external collaborators (§6).
//! - [`runtime`]: [`AgentRuntime`] — owns every subsystem; the single entry point a host constructs.
//! - [`error`]: [`AgentError`] — the error taxonomy.
//! - [`model_spec`]: model context-window lookup used by the compaction budget check.

pub mod adapter;
pub mod checkpoint;
pub mod compaction;
pub mod error;
pub mod host;
pub mod message;
pub mod model_spec;
pub mod partial_json;
pub mod runtime;
pub mod store;
pub mod tool_source;
pub mod tools;
pub mod turn_loop;

pub use adapter::{AdapterSpec, LlmAdapter, LlmConfig, NormalizedDelta, ProtocolTag};
pub use checkpoint::{CheckpointStore, FileSnapshot, RestoreReport};
pub use compaction::{CompactedSummary, CompactionEngine, CompactionLevel, CompactionStats};
pub use error::{AdapterErrorKind, AgentError};
pub use host::{Approval, ApprovalDecision, Filesystem, Git, Host, Lsp, Shell, Telemetry};
pub use message::{
    ContextItem, ContentPart, Image, Message, MessageCheckpoint, MessageId, ThreadId, ToolCall,
    ToolCallStatus, ToolCallStreamingState,
};
pub use message::Thread;
pub use runtime::AgentRuntime;
pub use store::ConversationStore;
pub use tool_source::{ToolCallContent, ToolCallContext, ToolSource, ToolSourceError, ToolSpec};
pub use tools::{AggregateToolSource, ApprovalKind, Executor, Mode, Tool, ToolDescriptor, ToolRegistry};

#[cfg(feature = "mcp")]
pub use tools::{register_mcp_tools, McpToolAdapter};
pub use turn_loop::{run_turn, TurnOutcome, TurnState};
