//! Tool registry, mode-scoped visibility, and the tool executor.
//!
//! The registry maps a tool's name to its descriptor; the executor drives
//! one call end to end through argument assembly, validation, repeat-call
//! suppression, path-safety checks, the approval gate, execution with a
//! timeout, and content-aware truncation.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::host::{ApprovalDecision, Host};
use crate::message::{ContentPart, MessageId, ThreadId, ToolCall, ToolCallStatus};
use crate::tool_source::{ToolCallContent, ToolCallContext, ToolSource, ToolSourceError, ToolSpec};

/// How a tool call must be gated before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalKind {
    None,
    Terminal,
    Dangerous,
    Interaction,
}

/// Tool-loading context: which tools are visible for a given `{mode, phase}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Executing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Chat,
    Agent { template_groups: Vec<String> },
    Orchestrator { phase: Phase },
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Chat
    }
}

/// Everything the registry and executor need to know about one tool, beyond
/// its callable implementation.
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub json_schema: Value,
    pub approval_kind: ApprovalKind,
    pub group: String,
    /// Per-tool truncation cap override; defaults to 10k chars.
    pub result_char_cap: usize,
    pub tool: Arc<dyn Tool>,
}

/// A single callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn spec(&self) -> ToolSpec;
    fn approval_kind(&self) -> ApprovalKind {
        ApprovalKind::None
    }
    fn group(&self) -> &str {
        "core"
    }
    fn result_char_cap(&self) -> usize {
        10_000
    }
    /// Paths this tool call will touch, used by the checkpoint engine before
    /// the call runs and by the path-safety check. Tools that take no
    /// filesystem arguments (e.g. `run_command`) return `&[]`.
    fn target_paths(&self, _args: &Value) -> Vec<String> {
        Vec::new()
    }
    async fn call(
        &self,
        args: Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError>;
}

/// Process-wide, insertion-time-only mapping from tool name to descriptor.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ToolDescriptor) {
        self.tools.insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// Tool-loading policy:
    /// - `chat` → none
    /// - `agent` → `core` + template's extra groups
    /// - `orchestrator/planning` → `orchestrator` only
    /// - `orchestrator/executing` → `core` + `orchestrator`
    pub fn tools_for_context(&self, mode: &Mode) -> Vec<&ToolDescriptor> {
        let allowed_groups: Vec<&str> = match mode {
            Mode::Chat => return Vec::new(),
            Mode::Agent { template_groups } => {
                let mut g = vec!["core"];
                g.extend(template_groups.iter().map(String::as_str));
                g
            }
            Mode::Orchestrator { phase: Phase::Planning } => vec!["orchestrator"],
            Mode::Orchestrator { phase: Phase::Executing } => vec!["core", "orchestrator"],
        };
        self.tools.values().filter(|d| allowed_groups.contains(&d.group.as_str())).collect()
    }

    pub fn specs_for_context(&self, mode: &Mode) -> Vec<ToolSpec> {
        self.tools_for_context(mode).into_iter().map(|d| d.tool.spec()).collect()
    }
}

/// A [`ToolSource`] backed by an async-lockable set of named [`Tool`]s,
/// combining one or more underlying providers (a local registry, an MCP
/// server's tools, ...) behind one `list_tools`/`call_tool` surface.
#[derive(Default, Clone)]
pub struct AggregateToolSource {
    tools: Arc<tokio::sync::RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl AggregateToolSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, replacing any existing tool of the same name.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.write().await.insert(tool.name().to_string(), tool);
    }
}

#[async_trait]
impl ToolSource for AggregateToolSource {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolSourceError> {
        Ok(self.tools.read().await.values().map(|t| t.spec()).collect())
    }

    async fn call_tool_with_context(
        &self,
        name: &str,
        arguments: Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError> {
        let tool = {
            let tools = self.tools.read().await;
            tools.get(name).cloned()
        };
        let Some(tool) = tool else {
            return Err(ToolSourceError::UnknownTool(name.to_string()));
        };
        tool.call(arguments, ctx).await
    }
}

/// Wraps one MCP tool as a [`Tool`], delegating `call` to a shared MCP
/// session. Built by [`register_mcp_tools`].
#[cfg(feature = "mcp")]
pub struct McpToolAdapter {
    spec: ToolSpec,
    source: Arc<crate::tool_source::McpToolSource>,
}

#[cfg(feature = "mcp")]
#[async_trait]
impl Tool for McpToolAdapter {
    fn name(&self) -> &str {
        &self.spec.name
    }
    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }
    fn group(&self) -> &str {
        "mcp"
    }
    async fn call(
        &self,
        args: Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError> {
        self.source.call_tool(&self.spec.name, args).await
    }
}

/// Lists the tools exposed by `source` and registers one [`McpToolAdapter`]
/// per tool into `aggregate`.
#[cfg(feature = "mcp")]
pub async fn register_mcp_tools(
    source: Arc<crate::tool_source::McpToolSource>,
    aggregate: &AggregateToolSource,
) -> Result<usize, ToolSourceError> {
    let specs = source.list_tools().await?;
    let count = specs.len();
    for spec in specs {
        aggregate.register(Arc::new(McpToolAdapter { spec, source: source.clone() })).await;
    }
    Ok(count)
}

/// Sensitive-path substrings rejected for any file-touching tool.
const SENSITIVE_PATTERNS: &[&str] = &[
    ".ssh", ".gnupg", ".aws", ".azure", ".kube", ".docker", ".env.local", ".env.production",
    "secrets.json", "secrets.yml", "secrets.toml", "credentials.", "private_key", "id_rsa",
    "id_ed25519", "password", "secret", "credential",
];
const SENSITIVE_SUFFIXES: &[&str] = &[".pem", ".key", ".p12", ".pfx"];
const TRAVERSAL_TOKENS: &[&str] = &["..", "%2e%2e", "%252e%252e", "\0"];

fn is_sensitive_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    if TRAVERSAL_TOKENS.iter().any(|t| lower.contains(t)) {
        return true;
    }
    if SENSITIVE_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return true;
    }
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Default allow-listed shell binaries.
pub const SHELL_ALLOWLIST: &[&str] = &[
    "npm", "yarn", "pnpm", "bun", "node", "npx", "deno", "git", "python", "python3", "pip",
    "pip3", "java", "javac", "mvn", "gradle", "go", "rust", "cargo", "make", "gcc", "clang",
    "cmake", "pwd", "ls", "dir", "cat", "type", "echo", "mkdir", "touch", "rm", "mv", "cp", "cd",
];

/// Default allow-listed git subcommands.
pub const GIT_SUBCOMMAND_ALLOWLIST: &[&str] = &[
    "status", "log", "diff", "show", "ls-files", "rev-parse", "rev-list", "blame", "add",
    "commit", "reset", "restore", "push", "pull", "fetch", "remote", "branch", "checkout",
    "switch", "merge", "rebase", "cherry-pick", "clone", "init", "stash", "tag", "config",
];

fn command_is_allowlisted(command: &str) -> bool {
    let mut parts = command.split_whitespace();
    let Some(bin) = parts.next() else { return true };
    let bin = bin.rsplit('/').next().unwrap_or(bin);
    if bin == "git" {
        return parts.next().map(|sub| GIT_SUBCOMMAND_ALLOWLIST.contains(&sub)).unwrap_or(true);
    }
    SHELL_ALLOWLIST.contains(&bin)
}

/// Outcome of one executor run, ready for the turn loop to record via the
/// conversation store, which remains the sole mutator of thread data.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ToolCallStatus,
    pub text: String,
    pub error: Option<String>,
    pub rich_content: Vec<ContentPart>,
    pub arguments: HashMap<String, Value>,
}

impl ExecutionOutcome {
    fn error(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            status: ToolCallStatus::Error,
            error: Some(text.clone()),
            text,
            rich_content: Vec::new(),
            arguments: HashMap::new(),
        }
    }

    fn rejected(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            status: ToolCallStatus::Rejected,
            error: None,
            text,
            rich_content: Vec::new(),
            arguments: HashMap::new(),
        }
    }
}

/// Execution-time context a tool call runs under.
pub struct ExecutionContext {
    pub workspace_root: std::path::PathBuf,
    pub assistant_message_id: MessageId,
    pub thread_id: ThreadId,
    pub mode: Mode,
}

/// Mode of content-aware truncation a tool's output is classified into.
#[derive(Debug, Clone, Copy)]
struct TruncationRatio {
    head: f32,
    tail: f32,
}

fn classify_truncation(tool_name: &str, text: &str) -> TruncationRatio {
    let lower_name = tool_name.to_lowercase();
    if lower_name.contains("run_command") || lower_name.contains("exec") {
        return TruncationRatio { head: 0.20, tail: 0.75 };
    }
    if lower_name.contains("search") || lower_name.contains("grep") {
        return TruncationRatio { head: 0.90, tail: 0.05 };
    }
    if lower_name.contains("read_file") || lower_name.contains("read") {
        return TruncationRatio { head: 0.70, tail: 0.25 };
    }
    let lower_text = text.to_lowercase();
    let error_marker = ["error", "exception", "failed", "fatal", "panic", "traceback"]
        .iter()
        .any(|m| lower_text.contains(m));
    if error_marker {
        return TruncationRatio { head: 0.25, tail: 0.70 };
    }
    let success_marker =
        ["success", "ok", "done", "completed"].iter().any(|m| lower_text.contains(m));
    if success_marker && text.len() < 4_000 {
        return TruncationRatio { head: 0.80, tail: 0.15 };
    }
    TruncationRatio { head: 0.50, tail: 0.50 }
}

/// Aligns an offset to the nearest newline boundary, searching outward by at
/// most `window` bytes so a cut never lands mid-line.
fn align_to_newline(text: &str, offset: usize, window: usize) -> usize {
    let bytes = text.as_bytes();
    let lo = offset.saturating_sub(window);
    let hi = (offset + window).min(bytes.len());
    for i in offset..hi {
        if bytes.get(i) == Some(&b'\n') {
            return i + 1;
        }
    }
    for i in (lo..offset).rev() {
        if bytes.get(i) == Some(&b'\n') {
            return i + 1;
        }
    }
    offset
}

/// Content-aware truncation.
fn truncate_result(tool_name: &str, text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let ratio = classify_truncation(tool_name, text);
    let head_chars = ((cap as f32) * ratio.head) as usize;
    let tail_chars = ((cap as f32) * ratio.tail) as usize;

    let char_to_byte: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let total_chars = char_to_byte.len();
    let head_byte_goal = char_to_byte.get(head_chars).copied().unwrap_or(text.len());
    let tail_start_char = total_chars.saturating_sub(tail_chars);
    let tail_byte_goal = char_to_byte.get(tail_start_char).copied().unwrap_or(text.len());

    let head_end = align_to_newline(text, head_byte_goal, 80).min(text.len());
    let tail_start = align_to_newline(text, tail_byte_goal, 80).max(head_end);

    let omitted_chars = text[head_end..tail_start].chars().count();
    format!(
        "{}\n… [truncated: {omitted_chars} chars omitted] …\n{}",
        &text[..head_end],
        &text[tail_start..]
    )
}

/// Validates assembled arguments against a tool's JSON-schema `required`
/// list. A full draft-07 validator is out of scope; only missing required
/// fields are caught.
fn validate_required_fields(schema: &Value, args: &HashMap<String, Value>) -> Result<(), String> {
    let Some(required) = schema.get("required").and_then(Value::as_array) else {
        return Ok(());
    };
    for field in required {
        let Some(name) = field.as_str() else { continue };
        if !args.contains_key(name) {
            return Err(format!("missing argument: {name}"));
        }
    }
    Ok(())
}

fn canonical_args_hash(name: &str, args: &HashMap<String, Value>) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut keys: Vec<&String> = args.keys().collect();
    keys.sort();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    name.hash(&mut hasher);
    for k in keys {
        k.hash(&mut hasher);
        args[k].to_string().hash(&mut hasher);
    }
    hasher.finish()
}

/// Given a ToolCall and an execution context, validates, gates, executes,
/// truncates, and reports a tool call's result.
pub struct Executor {
    pub registry: Arc<ToolRegistry>,
    pub host: Arc<dyn Host>,
    pub default_timeout: Duration,
    /// Rolling window of the last 5 `(name, args-hash)` pairs per thread.
    recent_calls: DashMap<ThreadId, VecDeque<(String, u64)>>,
}

impl Executor {
    pub fn new(registry: Arc<ToolRegistry>, host: Arc<dyn Host>) -> Self {
        Self { registry, host, default_timeout: Duration::from_secs(60), recent_calls: DashMap::new() }
    }

    /// Short-circuits to `error` if the same `(name, canonical-args-hash)`
    /// appears more than twice consecutively in the last 5 calls. Applies to
    /// every tool execution unconditionally.
    fn check_repeat_call(&self, thread_id: ThreadId, name: &str, hash: u64) -> bool {
        let mut window = self.recent_calls.entry(thread_id).or_insert_with(VecDeque::new);
        window.push_back((name.to_string(), hash));
        while window.len() > 5 {
            window.pop_front();
        }
        let consecutive = window
            .iter()
            .rev()
            .take_while(|(n, h)| n == name && *h == hash)
            .count();
        consecutive > 2
    }

    /// Runs one tool call end to end: assemble, validate, check repeats,
    /// check path safety, gate, execute, truncate. The caller (turn loop) is
    /// responsible for recording the outcome via the conversation store and
    /// for invoking the checkpoint engine before calling this for a
    /// write-shaped tool.
    pub async fn execute(&self, tool_call: &ToolCall, ctx: &ExecutionContext) -> ExecutionOutcome {
        let Some(descriptor) = self.registry.get(&tool_call.name) else {
            return ExecutionOutcome::error(format!("unknown tool: {}", tool_call.name));
        };

        // Argument assembly.
        let arguments: HashMap<String, Value> = match &tool_call.streaming {
            Some(s) if s.is_streaming => crate::partial_json::parse_partial_json(&s.partial_args_fragment),
            _ => tool_call.arguments.clone(),
        };

        // Validation.
        if let Err(msg) = validate_required_fields(&descriptor.json_schema, &arguments) {
            let mut outcome = ExecutionOutcome::error(msg);
            outcome.arguments = arguments;
            return outcome;
        }

        // Repeat-call detection short-circuit (applies before approval/execution).
        let hash = canonical_args_hash(&tool_call.name, &arguments);
        if self.check_repeat_call(ctx.thread_id, &tool_call.name, hash) {
            let mut outcome = ExecutionOutcome::error("repeated call suppressed");
            outcome.arguments = arguments;
            return outcome;
        }

        // Path-safety check, run before approval so a rejected path never
        // reaches a human.
        let args_value = Value::Object(arguments.clone().into_iter().collect());
        for path in descriptor.tool.target_paths(&args_value) {
            if is_sensitive_path(&path) {
                let mut outcome = ExecutionOutcome::error(format!("path rejected: {path}"));
                outcome.arguments = arguments;
                return outcome;
            }
        }

        // Approval gate.
        let approved = match descriptor.approval_kind {
            ApprovalKind::None => true,
            ApprovalKind::Dangerous => {
                self.host.await_approval(&tool_call.id, &format!("Allow {}?", tool_call.name)).await
                    == ApprovalDecision::Approve
            }
            ApprovalKind::Terminal => {
                let command = arguments.get("command").and_then(Value::as_str).unwrap_or("");
                if command_is_allowlisted(command) {
                    true
                } else {
                    self.host
                        .await_approval(&tool_call.id, &format!("Allow shell command `{command}`?"))
                        .await
                        == ApprovalDecision::Approve
                }
            }
            ApprovalKind::Interaction => {
                let question = arguments
                    .get("question")
                    .and_then(Value::as_str)
                    .unwrap_or("Confirm?")
                    .to_string();
                self.host.await_approval(&tool_call.id, &question).await == ApprovalDecision::Approve
            }
        };
        if !approved {
            let mut outcome = ExecutionOutcome::rejected("rejected by approval gate");
            outcome.arguments = arguments;
            return outcome;
        }

        // Execution with timeout.
        let call_ctx = ToolCallContext {
            recent_messages: Vec::new(),
            thread_id: Some(ctx.thread_id.to_string()),
            workspace_root: Some(ctx.workspace_root.clone()),
        };
        let timeout_result =
            tokio::time::timeout(self.default_timeout, descriptor.tool.call(args_value, Some(&call_ctx)))
                .await;

        let mut outcome = match timeout_result {
            Err(_) => ExecutionOutcome::error("tool execution timed out"),
            Ok(Err(e)) => ExecutionOutcome::error(e.to_string()),
            Ok(Ok(content)) => {
                // Content-aware truncation.
                let text = truncate_result(&tool_call.name, &content.text, descriptor.result_char_cap);
                ExecutionOutcome {
                    status: ToolCallStatus::Success,
                    text,
                    error: None,
                    rich_content: content.rich_content,
                    arguments: HashMap::new(),
                }
            }
        };
        outcome.arguments = arguments;
        outcome
    }
}
