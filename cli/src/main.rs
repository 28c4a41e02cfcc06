//! Terminal binary for `adnify-core`: wires a local host bridge and a
//! handful of file/shell tools into an `AgentRuntime` and drives one or more
//! turns from the command line, running `adnify_core::AgentRuntime` directly
//! in-process rather than through a remote transport.

use std::path::PathBuf;
use std::sync::Arc;

use adnify_core::adapter::{self, LlmConfig, ProtocolTag, SamplingParams, ToolChoicePolicy};
use adnify_core::compaction::CompactionConfig;
use adnify_core::runtime::{AgentRuntime, RuntimeConfig};
use adnify_core::tools::{ApprovalKind, Mode, Tool, ToolDescriptor, ToolRegistry};
use cli::host::LocalHost;
use cli::tools::{ReadFileTool, RunCommandTool, WriteFileTool};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "adnify")]
#[command(about = "Runs a single agent turn against a configured LLM provider")]
struct Args {
    #[command(subcommand)]
    cmd: Option<Command>,

    /// User message. Positional arguments are joined with spaces when `-m` is absent.
    #[arg(short, long, value_name = "TEXT")]
    message: Option<String>,

    #[arg(trailing_var_arg = true)]
    rest: Vec<String>,

    /// Workspace root for file/shell tools. Defaults to the current directory.
    #[arg(short, long, value_name = "DIR")]
    workspace_root: Option<PathBuf>,

    /// LLM provider: openai, anthropic, or google.
    #[arg(long, env = "ADNIFY_PROVIDER", default_value = "openai")]
    provider: String,

    /// Model name passed through to the provider.
    #[arg(long, env = "ADNIFY_MODEL", default_value = "gpt-4o")]
    model: String,

    /// API key for the configured provider.
    #[arg(long, env = "ADNIFY_API_KEY", default_value = "")]
    api_key: String,

    /// Provider base URL override.
    #[arg(long, env = "ADNIFY_BASE_URL")]
    base_url: Option<String>,

    /// Interactive REPL: keep prompting for input after each turn.
    #[arg(short, long)]
    interactive: bool,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Lists the tools available in agent mode.
    Tools,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let override_dir = std::env::current_dir().ok();
    if let Err(e) = config::load_and_apply("adnify", override_dir.as_deref()) {
        tracing::warn!(error = %e, "failed to load process configuration");
    }

    let args = Args::parse();
    let workspace_root = Arc::new(
        args.workspace_root.clone().unwrap_or_else(|| std::env::current_dir().unwrap_or(PathBuf::from("."))),
    );

    let host: Arc<dyn adnify_core::host::Host> = Arc::new(LocalHost);
    let registry = build_registry(host.clone(), workspace_root.clone());

    if matches!(args.cmd, Some(Command::Tools)) {
        for spec in registry.specs_for_context(&Mode::Agent { template_groups: vec![] }) {
            println!("{}\t{}", spec.name, spec.description.unwrap_or_default());
        }
        return Ok(());
    }

    let runtime = AgentRuntime::new(RuntimeConfig {
        registry,
        host,
        workspace_root: workspace_root.as_ref().clone(),
        compaction_config: CompactionConfig::default(),
        summarizer: None,
    });

    let adapter_spec = match args.provider.as_str() {
        "anthropic" => adapter::anthropic_spec(),
        "google" => adapter::google_spec(),
        _ => adapter::openai_spec(),
    };
    let llm_config = LlmConfig {
        provider: args.provider.clone(),
        protocol: match args.provider.as_str() {
            "anthropic" => ProtocolTag::Anthropic,
            "google" => ProtocolTag::Google,
            _ => ProtocolTag::OpenAi,
        },
        model: args.model.clone(),
        api_key: args.api_key.clone(),
        base_url: args.base_url.clone().unwrap_or_else(|| default_base_url(&args.provider)),
        request_timeout: LlmConfig::default_timeout(),
        sampling: SamplingParams::default(),
        streaming: true,
        tool_choice: ToolChoicePolicy::Auto,
        parallel_tool_calls: false,
        static_header_overrides: Vec::new(),
        reasoning_enabled: false,
    };

    let thread_id = runtime.create_thread();
    let initial_message = args.message.clone().unwrap_or_else(|| args.rest.join(" "));
    run_one_turn(&runtime, thread_id, &adapter_spec, &llm_config, &initial_message).await;

    if args.interactive {
        loop {
            let line = read_line("> ");
            let Some(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            run_one_turn(&runtime, thread_id, &adapter_spec, &llm_config, &line).await;
        }
    }

    Ok(())
}

fn default_base_url(provider: &str) -> String {
    match provider {
        "anthropic" => "https://api.anthropic.com".to_string(),
        "google" => "https://generativelanguage.googleapis.com".to_string(),
        _ => "https://api.openai.com".to_string(),
    }
}

async fn run_one_turn(
    runtime: &AgentRuntime,
    thread_id: adnify_core::message::ThreadId,
    adapter_spec: &adnify_core::adapter::AdapterSpec,
    llm_config: &LlmConfig,
    user_text: &str,
) {
    let outcome = runtime
        .run_turn(
            thread_id,
            user_text,
            Vec::new(),
            adapter_spec,
            llm_config,
            None,
            Mode::Agent { template_groups: vec![] },
            10,
            CancellationToken::new(),
        )
        .await;
    match outcome {
        Ok(adnify_core::turn_loop::TurnOutcome::Completed { tool_call_count, .. }) => {
            if let Ok(thread) = runtime.store.snapshot(thread_id).await {
                if let Some(adnify_core::message::Message::Assistant(am)) = thread.last_assistant() {
                    println!("{}", am.text);
                }
            }
            tracing::debug!(tool_call_count, "turn completed");
        }
        Ok(adnify_core::turn_loop::TurnOutcome::Aborted { .. }) => {
            eprintln!("turn aborted");
        }
        Ok(adnify_core::turn_loop::TurnOutcome::Error { error, .. }) => {
            eprintln!("turn failed: {error}");
        }
        Err(e) => eprintln!("store error: {e}"),
    }
}

fn read_line(prompt: &str) -> Option<String> {
    use std::io::Write as _;
    print!("{prompt}");
    std::io::stdout().flush().ok()?;
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line.trim_end().to_string()),
        Err(_) => None,
    }
}

fn build_registry(host: Arc<dyn adnify_core::host::Host>, workspace_root: Arc<PathBuf>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register(&mut registry, Arc::new(ReadFileTool::new(workspace_root.clone())));
    register(&mut registry, Arc::new(WriteFileTool::new(workspace_root.clone())));
    register(&mut registry, Arc::new(RunCommandTool::new(host, workspace_root)));
    registry
}

fn register(registry: &mut ToolRegistry, tool: Arc<dyn Tool>) {
    let spec = tool.spec();
    registry.register(ToolDescriptor {
        name: spec.name,
        description: spec.description,
        json_schema: spec.input_schema,
        approval_kind: tool.approval_kind(),
        group: tool.group().to_string(),
        result_char_cap: tool.result_char_cap(),
        tool,
    });
}
