//! Conversation data model.
//!
//! `Thread` owns an append-only sequence of [`Message`]s, a de-duplicated set
//! of [`ContextItem`]s, an optional [`CompactedSummary`], and an ordered list
//! of [`MessageCheckpoint`]s. Mutation only ever happens through
//! [`crate::store::ConversationStore`] — nothing in this module offers a way
//! to mutate a `Thread` in place from the outside.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::compaction::CompactedSummary;

pub type ThreadId = Uuid;
pub type MessageId = Uuid;
pub type ToolCallId = String;
pub type CheckpointId = Uuid;

fn now() -> SystemTime {
    SystemTime::now()
}

/// A conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    pub messages: Vec<Message>,
    pub context_items: Vec<ContextItem>,
    pub summary: Option<CompactedSummary>,
    pub checkpoints: Vec<MessageCheckpoint>,
}

impl Thread {
    pub fn new() -> Self {
        let t = now();
        Self {
            id: Uuid::new_v4(),
            created_at: t,
            updated_at: t,
            messages: Vec::new(),
            context_items: Vec::new(),
            summary: None,
            checkpoints: Vec::new(),
        }
    }

    /// The in-progress (or most recent) assistant message, if any.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| matches!(m, Message::Assistant(_)))
    }

    /// Finds a tool call by id across all assistant messages — a ToolCall is
    /// owned by exactly one Assistant message.
    pub fn find_tool_call(&self, id: &str) -> Option<&ToolCall> {
        self.messages.iter().find_map(|m| match m {
            Message::Assistant(a) => a.tool_calls.iter().find(|tc| tc.id == id),
            _ => None,
        })
    }
}

impl Default for Thread {
    fn default() -> Self {
        Self::new()
    }
}

/// One role-tagged entry in a [`Thread`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    Tool(ToolMessage),
    System(SystemMessage),
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Message::User(UserMessage {
            id: Uuid::new_v4(),
            created_at: now(),
            text: text.into(),
            images: Vec::new(),
        })
    }

    pub fn system(text: impl Into<String>) -> Self {
        Message::System(SystemMessage {
            id: Uuid::new_v4(),
            created_at: now(),
            text: text.into(),
        })
    }

    pub fn id(&self) -> MessageId {
        match self {
            Message::User(m) => m.id,
            Message::Assistant(m) => m.id,
            Message::Tool(m) => m.id,
            Message::System(m) => m.id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessage {
    pub id: MessageId,
    pub created_at: SystemTime,
    pub text: String,
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    /// Either base64-encoded bytes or a URL, distinguished by `media_type`'s
    /// presence (base64 payloads always carry one; URL references may not).
    pub data: String,
    pub is_url: bool,
    pub media_type: Option<String>,
}

/// Completion state of an in-progress or finished assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantState {
    Streaming,
    Complete,
    Aborted,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub id: MessageId,
    pub created_at: SystemTime,
    pub text: String,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub state: AssistantState,
}

impl AssistantMessage {
    pub fn new_streaming() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: now(),
            text: String::new(),
            reasoning: None,
            tool_calls: Vec::new(),
            state: AssistantState::Streaming,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMessageStatus {
    Success,
    Error,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMessage {
    pub id: MessageId,
    pub created_at: SystemTime,
    pub tool_call_id: ToolCallId,
    pub text: String,
    pub content: Vec<ContentPart>,
    pub status: ToolMessageStatus,
}

/// Rich content parts a Tool message may carry alongside its plain text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    Text(String),
    Image { data: String, media_type: String },
    Code { language: String, source: String },
    Json(serde_json::Value),
    Markdown(String),
    Html(String),
    File { path: String, mime: Option<String> },
    Link { url: String, title: Option<String> },
    Table { headers: Vec<String>, rows: Vec<Vec<String>> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMessage {
    pub id: MessageId,
    pub created_at: SystemTime,
    pub text: String,
}

/// Status of a [`ToolCall`]; transitions are monotone and never regress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCallStatus {
    Pending,
    AwaitingApproval,
    Running,
    Success,
    Error,
    Rejected,
}

impl ToolCallStatus {
    /// Index into the canonical progression `[pending, awaiting-approval,
    /// running, {success|error|rejected}]`. Terminal states share the last slot.
    fn rank(self) -> u8 {
        match self {
            ToolCallStatus::Pending => 0,
            ToolCallStatus::AwaitingApproval => 1,
            ToolCallStatus::Running => 2,
            ToolCallStatus::Success | ToolCallStatus::Error | ToolCallStatus::Rejected => 3,
        }
    }

    /// Whether transitioning from `self` to `next` is a legal monotone step.
    /// Once `self` is already terminal (rank 3), no further transition is
    /// admitted, including to a different terminal variant.
    pub fn can_transition_to(self, next: ToolCallStatus) -> bool {
        if self.rank() == 3 {
            return next == self;
        }
        next.rank() >= self.rank()
    }
}

/// Incremental streaming state for a tool call whose arguments are still
/// arriving, tracked as its own field rather than mutated in place on the
/// arguments map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallStreamingState {
    pub is_streaming: bool,
    pub partial_args_fragment: String,
    pub last_update: Option<SystemTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: HashMap<String, serde_json::Value>,
    pub status: ToolCallStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub content: Vec<ContentPart>,
    pub streaming: Option<ToolCallStreamingState>,
}

impl ToolCall {
    pub fn new_streaming(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: HashMap::new(),
            status: ToolCallStatus::Pending,
            result: None,
            error: None,
            content: Vec::new(),
            streaming: Some(ToolCallStreamingState {
                is_streaming: true,
                partial_args_fragment: String::new(),
                last_update: Some(now()),
            }),
        }
    }

    /// Applies a monotone status transition, returning `false` (no-op) if the
    /// transition would go backward.
    pub fn set_status(&mut self, next: ToolCallStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// A pinned handle to external material expanded into prompt context at
/// assembly time. De-duplicated by canonical key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextItem {
    File { uri: String },
    Folder { uri: String },
    CodeSelection { uri: String, start_line: u32, end_line: u32 },
    Codebase,
    Symbol { name: String, file: String, line: u32 },
    Git,
    Terminal,
    Web { url: String },
    Image { uri: String },
}

impl ContextItem {
    /// Canonical key used for set semantics (type + uri/range).
    pub fn canonical_key(&self) -> String {
        match self {
            ContextItem::File { uri } => format!("file:{uri}"),
            ContextItem::Folder { uri } => format!("folder:{uri}"),
            ContextItem::CodeSelection { uri, start_line, end_line } => {
                format!("selection:{uri}:{start_line}-{end_line}")
            }
            ContextItem::Codebase => "codebase".to_string(),
            ContextItem::Symbol { name, file, line } => format!("symbol:{file}:{line}:{name}"),
            ContextItem::Git => "git".to_string(),
            ContextItem::Terminal => "terminal".to_string(),
            ContextItem::Web { url } => format!("web:{url}"),
            ContextItem::Image { uri } => format!("image:{uri}"),
        }
    }
}

/// An immutable before-state snapshot of files a tool is about to modify,
/// scoped to one assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCheckpoint {
    pub id: CheckpointId,
    pub message_id: MessageId,
    pub created_at: SystemTime,
    pub description: String,
    pub files: HashMap<String, FileSnapshotRef>,
}

/// A reference to file content held by the checkpoint's content-addressed
/// store (see [`crate::checkpoint::CheckpointStore`]); `null` hash means the
/// file did not exist at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSnapshotRef {
    pub hash: Option<String>,
    pub previously_existed: bool,
}
