//! Top-level runtime value: a store, tool registry, executor, checkpoint
//! store, compaction engine, LLM adapter, and host bridge assembled into one
//! long-lived value constructed explicitly at startup, rather than reached
//! for via process-global state. `AgentRuntime` owns every subsystem a turn
//! needs and exposes the turn-loop operation as its single entry point.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::adapter::{AdapterSpec, LlmAdapter, LlmConfig};
use crate::checkpoint::CheckpointStore;
use crate::compaction::{CompactionConfig, CompactionEngine, MechanicalSummarizer, Summarizer};
use crate::host::Host;
use crate::message::{Image, ThreadId};
use crate::store::{ConversationStore, StoreError};
use crate::tools::{Executor, Mode, ToolRegistry};
use crate::turn_loop::{run_turn, TurnConfig, TurnOutcome};

/// Owns every subsystem a turn needs and exposes `run_turn` as the one
/// operation callers drive.
pub struct AgentRuntime {
    pub store: ConversationStore,
    pub registry: Arc<ToolRegistry>,
    pub executor: Executor,
    pub checkpoint_store: CheckpointStore,
    pub compaction_config: CompactionConfig,
    pub summarizer: Box<dyn Summarizer>,
    pub adapter: LlmAdapter,
    pub host: Arc<dyn Host>,
    pub workspace_root: PathBuf,
}

/// Construction-time configuration an embedder supplies once, constructed
/// explicitly at startup rather than assembled implicitly per call.
pub struct RuntimeConfig {
    pub registry: ToolRegistry,
    pub host: Arc<dyn Host>,
    pub workspace_root: PathBuf,
    pub compaction_config: CompactionConfig,
    /// Defaults to [`MechanicalSummarizer`] when `None`.
    pub summarizer: Option<Box<dyn Summarizer>>,
}

impl AgentRuntime {
    pub fn new(cfg: RuntimeConfig) -> Self {
        let registry = Arc::new(cfg.registry);
        let executor = Executor::new(registry.clone(), cfg.host.clone());
        Self {
            store: ConversationStore::new(),
            registry,
            executor,
            checkpoint_store: CheckpointStore::new(),
            compaction_config: cfg.compaction_config,
            summarizer: cfg.summarizer.unwrap_or_else(|| Box::new(MechanicalSummarizer)),
            adapter: LlmAdapter::new(),
            host: cfg.host,
            workspace_root: cfg.workspace_root,
        }
    }

    /// Creates a new empty thread and returns its id.
    pub fn create_thread(&self) -> ThreadId {
        self.store.create_thread()
    }

    /// Appends the user's message, then drives one full turn: assemble,
    /// stream, execute any tool calls, checkpoint, and finalize. Returns once
    /// the assistant message reaches a terminal state (`Completed`,
    /// `Aborted`, or `Error`).
    pub async fn run_turn(
        &self,
        thread_id: ThreadId,
        user_text: impl Into<String>,
        images: Vec<Image>,
        adapter_spec: &AdapterSpec,
        llm_config: &LlmConfig,
        system_prompt: Option<&str>,
        mode: Mode,
        max_tool_iterations: usize,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, StoreError> {
        self.store.append_user_message(thread_id, user_text, images).await?;
        let compaction = CompactionEngine::new(self.compaction_config.clone(), self.summarizer.as_ref());
        let cfg = TurnConfig {
            store: &self.store,
            thread_id,
            adapter: &self.adapter,
            adapter_spec,
            llm_config,
            registry: &self.registry,
            executor: &self.executor,
            checkpoint_store: &self.checkpoint_store,
            compaction: &compaction,
            host: self.host.clone(),
            system_prompt,
            mode,
            workspace_root: self.workspace_root.clone(),
            max_tool_iterations,
        };
        Ok(run_turn(cfg, cancel).await)
    }
}
