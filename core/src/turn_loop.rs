//! The turn loop: an explicit state machine driving one user turn end to
//! end, as a named sequence of steps rather than an implicit promise chain.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::adapter::{AdapterSpec, LlmAdapter, LlmConfig, NormalizedDelta};
use crate::checkpoint::{is_checkpointable, CheckpointStore};
use crate::compaction::CompactionEngine;
use crate::error::{AdapterErrorKind, AgentError};
use crate::host::Host;
use crate::message::{
    ContentPart, MessageCheckpoint, MessageId, ThreadId, ToolCallStatus, ToolMessageStatus,
};
use crate::store::ConversationStore;
use crate::tool_source::ToolSpec;
use crate::tools::{ExecutionContext, Executor, Mode, ToolRegistry};

/// States of one turn: `idle → assembling → streaming →
/// {executing-tool → awaiting-approval → executing-tool} → done`.
/// `AwaitingApproval` is observed rather than driven directly here — the
/// [`Executor`] owns the approval gate internally — but is named so a host
/// can surface "waiting on you" state from the approval trait's suspension
/// point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Assembling,
    Streaming,
    ExecutingTool,
    AwaitingApproval,
    Done,
}

/// How the turn loop concluded.
#[derive(Debug)]
pub enum TurnOutcome {
    Completed { assistant_message_id: MessageId, tool_call_count: usize },
    Aborted { assistant_message_id: MessageId },
    Error { assistant_message_id: MessageId, error: AgentError },
}

/// Everything `run_turn` needs beyond the per-call cancellation token;
/// bundled so the function signature stays a handful of parameters instead
/// of a dozen. All of these are owned by one [`crate::runtime::AgentRuntime`]
/// and borrowed per call.
pub struct TurnConfig<'a> {
    pub store: &'a ConversationStore,
    pub thread_id: ThreadId,
    pub adapter: &'a LlmAdapter,
    pub adapter_spec: &'a AdapterSpec,
    pub llm_config: &'a LlmConfig,
    pub registry: &'a ToolRegistry,
    pub executor: &'a Executor,
    pub checkpoint_store: &'a CheckpointStore,
    pub compaction: &'a CompactionEngine<'a>,
    pub host: Arc<dyn Host>,
    pub system_prompt: Option<&'a str>,
    pub mode: Mode,
    pub workspace_root: std::path::PathBuf,
    /// Caps `(a) assemble, (b) call LLM, (c) handle tool calls` repetitions
    /// within one turn.
    pub max_tool_iterations: usize,
}

const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_MULTIPLIER: f64 = 1.5;
const MAX_ATTEMPTS: u32 = 3;

/// Retries an LLM call: `network | timeout | rate-limit` are retried with
/// exponential backoff (base 1s, multiplier 1.5, up to 3 total attempts);
/// every other classified error returns immediately.
async fn stream_with_retry(
    cfg: &TurnConfig<'_>,
    messages: &[crate::message::Message],
    system_prompt: Option<&str>,
    tools: &[ToolSpec],
    cancel: CancellationToken,
) -> Result<impl futures::Stream<Item = NormalizedDelta> + Send, AgentError> {
    let mut attempt = 0u32;
    let mut delay = RETRY_BASE;
    loop {
        match cfg
            .adapter
            .stream(cfg.adapter_spec, cfg.llm_config, messages, system_prompt, tools, cancel.clone())
            .await
        {
            Ok(s) => return Ok(s),
            Err(AgentError::Llm { kind, message }) if kind.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                tracing::warn!(attempt, ?kind, %message, "retrying llm call");
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(RETRY_MULTIPLIER);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Assembles the message list for the next LLM call, compacting first if the
/// thread is over budget or a prior attempt hit `context-length-exceeded`.
async fn assemble(
    cfg: &TurnConfig<'_>,
    force_compact: bool,
) -> Result<Vec<crate::message::Message>, AgentError> {
    let thread = cfg.store.snapshot(cfg.thread_id).await.map_err(|e| AgentError::Store(e.to_string()))?;
    let needs = force_compact || cfg.compaction.needs_compaction(&thread, &cfg.llm_config.model);
    if !needs {
        return Ok(thread.messages);
    }
    let (messages, summary, stats) =
        cfg.compaction.compact(&thread, &cfg.llm_config.model, cfg.system_prompt).await?;
    tracing::info!(
        thread_id = %cfg.thread_id,
        level = ?summary.level,
        original = stats.original_tokens,
        final_tokens = stats.final_tokens,
        "compacted thread context"
    );
    cfg.store.set_summary(cfg.thread_id, summary).await.map_err(|e| AgentError::Store(e.to_string()))?;
    Ok(messages)
}

/// Captures a [`MessageCheckpoint`] for a write-shaped tool call before it
/// executes, invoked by the turn loop rather than the Executor itself since
/// only the loop holds the [`CheckpointStore`].
async fn checkpoint_if_needed(
    cfg: &TurnConfig<'_>,
    assistant_message_id: MessageId,
    tool_name: &str,
    args: &serde_json::Value,
) -> Result<(), AgentError> {
    if !is_checkpointable(tool_name) {
        return Ok(());
    }
    let Some(descriptor) = cfg.registry.get(tool_name) else { return Ok(()) };
    let paths = descriptor.tool.target_paths(args);
    if paths.is_empty() {
        return Ok(());
    }
    let fs = cfg.host.as_ref() as &dyn crate::host::Filesystem;
    let files = cfg.checkpoint_store.capture(fs, &paths).await;
    let checkpoint = MessageCheckpoint {
        id: uuid::Uuid::new_v4(),
        message_id: assistant_message_id,
        created_at: std::time::SystemTime::now(),
        description: format!("before {tool_name}"),
        files,
    };
    cfg.store.append_checkpoint(cfg.thread_id, checkpoint).await.map_err(|e| AgentError::Checkpoint(e.to_string()))
}

/// Runs one user turn to completion. Assumes the triggering User Message has
/// already been appended to the thread by the caller.
pub async fn run_turn(cfg: TurnConfig<'_>, cancel: CancellationToken) -> TurnOutcome {
    let tools = cfg.registry.specs_for_context(&cfg.mode);
    let mut state = TurnState::Idle;
    let mut context_escalated = false;

    for _iteration in 0..cfg.max_tool_iterations {
        state = TurnState::Assembling;
        let messages = match assemble(&cfg, false).await {
            Ok(m) => m,
            Err(e) => {
                let assistant_message_id = match cfg.store.begin_assistant_message(cfg.thread_id).await {
                    Ok(id) => id,
                    Err(store_err) => return TurnOutcome::Error { assistant_message_id: MessageId::nil(), error: AgentError::Store(store_err.to_string()) },
                };
                let _ = cfg.store.error_assistant_message(cfg.thread_id).await;
                return TurnOutcome::Error { assistant_message_id, error: e };
            }
        };

        let assistant_message_id = match cfg.store.begin_assistant_message(cfg.thread_id).await {
            Ok(id) => id,
            Err(e) => return TurnOutcome::Error { assistant_message_id: MessageId::nil(), error: AgentError::Store(e.to_string()) },
        };

        state = TurnState::Streaming;
        let stream_result = stream_with_retry(&cfg, &messages, cfg.system_prompt, &tools, cancel.clone()).await;

        let mut stream = match stream_result {
            Ok(s) => Box::pin(s),
            Err(AgentError::Llm { kind: AdapterErrorKind::ContextLengthExceeded, .. }) if !context_escalated => {
                context_escalated = true;
                let escalated = match assemble(&cfg, true).await {
                    Ok(m) => m,
                    Err(e) => {
                        let _ = cfg.store.error_assistant_message(cfg.thread_id).await;
                        return TurnOutcome::Error { assistant_message_id, error: e };
                    }
                };
                match stream_with_retry(&cfg, &escalated, cfg.system_prompt, &tools, cancel.clone()).await {
                    Ok(s) => Box::pin(s),
                    Err(e) => {
                        let _ = cfg.store.error_assistant_message(cfg.thread_id).await;
                        return TurnOutcome::Error { assistant_message_id, error: e };
                    }
                }
            }
            Err(e) => {
                let _ = cfg.store.error_assistant_message(cfg.thread_id).await;
                return TurnOutcome::Error { assistant_message_id, error: e };
            }
        };

        let mut finish_reason: Option<String> = None;
        let mut cancelled = false;

        loop {
            let delta = tokio::select! {
                biased;
                _ = cancel.cancelled() => { cancelled = true; None }
                d = stream.next() => d,
            };
            let Some(delta) = delta else { break };
            match delta {
                NormalizedDelta::Text(t) => {
                    let _ = cfg.store.append_text_delta(cfg.thread_id, &t).await;
                }
                NormalizedDelta::Reasoning(t) => {
                    let _ = cfg.store.append_reasoning_delta(cfg.thread_id, &t).await;
                }
                NormalizedDelta::ToolCallStart { id, name } => {
                    let _ = cfg.store.tool_call_start(cfg.thread_id, id, name).await;
                }
                NormalizedDelta::ToolCallDelta { id, args_fragment } => {
                    let _ = cfg.store.tool_call_delta(cfg.thread_id, &id, &args_fragment).await;
                }
                NormalizedDelta::ToolCallEnd { id } => {
                    let _ = cfg.store.tool_call_end(cfg.thread_id, &id).await;
                }
                NormalizedDelta::FinishReason(reason) => finish_reason = Some(reason),
                NormalizedDelta::Error(message) => {
                    if message == "cancelled" {
                        cancelled = true;
                    } else {
                        let _ = cfg.store.error_assistant_message(cfg.thread_id).await;
                        return TurnOutcome::Error {
                            assistant_message_id,
                            error: AgentError::Llm { kind: AdapterErrorKind::Unknown, message },
                        };
                    }
                    break;
                }
            }
        }

        if cancelled {
            // Close the stream, finalize the in-progress Assistant Message as
            // aborted, and reject any ToolCalls that never started executing.
            let _ = cfg.store.abort_assistant_message(cfg.thread_id).await;
            if let Ok(thread) = cfg.store.snapshot(cfg.thread_id).await {
                if let Some(crate::message::Message::Assistant(am)) =
                    thread.messages.iter().find(|m| m.id() == assistant_message_id)
                {
                    for tc in &am.tool_calls {
                        if tc.status == ToolCallStatus::Pending {
                            let _ = cfg
                                .store
                                .update_tool_call_status(cfg.thread_id, &tc.id, ToolCallStatus::Rejected)
                                .await;
                        }
                    }
                }
            }
            return TurnOutcome::Aborted { assistant_message_id };
        }

        let _ = cfg.store.finalize_assistant_message(cfg.thread_id).await;

        let thread = match cfg.store.snapshot(cfg.thread_id).await {
            Ok(t) => t,
            Err(e) => return TurnOutcome::Error { assistant_message_id, error: AgentError::Store(e.to_string()) },
        };
        let tool_calls: Vec<_> = thread
            .messages
            .iter()
            .find(|m| m.id() == assistant_message_id)
            .and_then(|m| match m {
                crate::message::Message::Assistant(a) => Some(a.tool_calls.clone()),
                _ => None,
            })
            .unwrap_or_default();

        let implies_tool_use = finish_reason.as_deref().map(|r| r == "tool_calls" || r == "tool_use").unwrap_or(false);
        if tool_calls.is_empty() || !implies_tool_use {
            state = TurnState::Done;
            return TurnOutcome::Completed { assistant_message_id, tool_call_count: tool_calls.len() };
        }

        // validate → gate → execute → record → re-enter the loop. The
        // Executor owns validation/gating/execution; the loop owns
        // checkpointing and recording into the store.
        for tool_call in &tool_calls {
            state = TurnState::ExecutingTool;
            let args_value =
                serde_json::Value::Object(tool_call.arguments.clone().into_iter().collect());
            if let Err(e) = checkpoint_if_needed(&cfg, assistant_message_id, &tool_call.name, &args_value).await {
                tracing::error!(tool = %tool_call.name, error = %e, "checkpoint capture failed");
            }

            state = TurnState::AwaitingApproval;
            let exec_ctx = ExecutionContext {
                workspace_root: cfg.workspace_root.clone(),
                assistant_message_id,
                thread_id: cfg.thread_id,
                mode: cfg.mode.clone(),
            };
            let outcome = cfg.executor.execute(tool_call, &exec_ctx).await;
            state = TurnState::ExecutingTool;

            let status = match outcome.status {
                ToolCallStatus::Success => ToolMessageStatus::Success,
                ToolCallStatus::Rejected => ToolMessageStatus::Rejected,
                _ => ToolMessageStatus::Error,
            };
            let rich_content: Vec<ContentPart> = outcome.rich_content;
            let _ = cfg
                .store
                .append_tool_result(cfg.thread_id, tool_call.id.clone(), outcome.text, rich_content, status)
                .await;
        }
        // Loop back to Assembling for the next model call with tool results in context.
    }

    state = TurnState::Done;
    let thread = cfg.store.snapshot(cfg.thread_id).await.ok();
    let assistant_message_id =
        thread.as_ref().and_then(|t| t.last_assistant()).map(|m| m.id()).unwrap_or_else(MessageId::nil);
    TurnOutcome::Error {
        assistant_message_id,
        error: AgentError::Unknown("tool-call loop limit reached".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ProtocolTag, ResponseFieldPaths, SamplingParams, ToolChoicePolicy};
    use crate::host::{ApprovalDecision, FileEntry, HostError, LogLevel, ShellOutput};
    use async_trait::async_trait;
    use std::path::Path;

    struct StubHost;

    #[async_trait]
    impl crate::host::Filesystem for StubHost {
        async fn read(&self, _path: &Path) -> Result<Option<String>, HostError> {
            Ok(None)
        }
        async fn write(&self, _path: &Path, _content: &str) -> Result<(), HostError> {
            Ok(())
        }
        async fn delete(&self, _path: &Path) -> Result<(), HostError> {
            Ok(())
        }
        async fn mkdir(&self, _path: &Path) -> Result<(), HostError> {
            Ok(())
        }
        async fn exists(&self, _path: &Path) -> Result<bool, HostError> {
            Ok(false)
        }
        async fn list_dir(&self, _path: &Path) -> Result<Vec<FileEntry>, HostError> {
            Ok(Vec::new())
        }
    }
    #[async_trait]
    impl crate::host::Shell for StubHost {
        async fn exec(&self, _c: &str, _cwd: &Path, _cancel: CancellationToken) -> Result<ShellOutput, HostError> {
            Ok(ShellOutput { exit_code: 0, stdout: String::new(), stderr: String::new() })
        }
    }
    impl crate::host::Lsp for StubHost {}
    impl crate::host::Git for StubHost {}
    #[async_trait]
    impl crate::host::Approval for StubHost {
        async fn await_approval(&self, _id: &str, _q: &str) -> ApprovalDecision {
            ApprovalDecision::Approve
        }
    }
    impl crate::host::Telemetry for StubHost {
        fn log(&self, _level: LogLevel, _message: &str, _fields: &serde_json::Value) {}
    }

    fn test_llm_config() -> LlmConfig {
        LlmConfig {
            provider: "openai".into(),
            model: "gpt-4o".into(),
            api_key: "test".into(),
            base_url: "http://127.0.0.1:1".into(),
            request_timeout: Duration::from_secs(5),
            sampling: SamplingParams::default(),
            streaming: true,
            tool_choice: ToolChoicePolicy::Auto,
            parallel_tool_calls: false,
            static_header_overrides: vec![],
            protocol: ProtocolTag::OpenAi,
            reasoning_enabled: false,
        }
    }

    #[tokio::test]
    async fn checkpoint_if_needed_skips_non_checkpointable_tools() {
        let store = ConversationStore::new();
        let thread_id = store.create_thread();
        let registry = Arc::new(ToolRegistry::new());
        let host: Arc<dyn Host> = Arc::new(StubHost);
        let executor = Executor::new(registry.clone(), host.clone());
        let checkpoint_store = CheckpointStore::new();
        let summarizer = crate::compaction::MechanicalSummarizer;
        let compaction = CompactionEngine::new(crate::compaction::CompactionConfig::default(), &summarizer);
        let spec = crate::adapter::openai_spec();
        let llm_config = test_llm_config();
        let adapter = LlmAdapter::new();

        let cfg = TurnConfig {
            store: &store,
            thread_id,
            adapter: &adapter,
            adapter_spec: &spec,
            llm_config: &llm_config,
            registry: &registry,
            executor: &executor,
            checkpoint_store: &checkpoint_store,
            compaction: &compaction,
            host,
            system_prompt: None,
            mode: Mode::Agent { template_groups: vec![] },
            workspace_root: std::path::PathBuf::from("/tmp"),
            max_tool_iterations: 10,
        };

        let am_id = store.begin_assistant_message(thread_id).await.unwrap();
        checkpoint_if_needed(&cfg, am_id, "run_command", &serde_json::json!({})).await.unwrap();
        let thread = store.snapshot(thread_id).await.unwrap();
        assert!(thread.checkpoints.is_empty());
    }

    #[test]
    fn response_field_paths_default_is_empty() {
        let r = ResponseFieldPaths::default();
        assert!(r.content.is_none());
    }
}
