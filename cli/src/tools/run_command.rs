//! Shell-command tool: runs a command through the [`Host`] shell capability
//! rather than spawning its own subprocess, so cancellation and the
//! approval gate stay centralized.

use std::sync::Arc;

use adnify_core::host::Host;
use adnify_core::tool_source::{ToolCallContent, ToolCallContext, ToolSourceError};
use adnify_core::tools::{ApprovalKind, Tool};
use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

pub const TOOL_RUN_COMMAND: &str = "run_command";

pub struct RunCommandTool {
    pub host: Arc<dyn Host>,
    pub workspace_root: Arc<std::path::PathBuf>,
}

impl RunCommandTool {
    pub fn new(host: Arc<dyn Host>, workspace_root: Arc<std::path::PathBuf>) -> Self {
        Self { host, workspace_root }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        TOOL_RUN_COMMAND
    }

    fn approval_kind(&self) -> ApprovalKind {
        ApprovalKind::Terminal
    }

    fn spec(&self) -> adnify_core::tool_source::ToolSpec {
        adnify_core::tool_source::ToolSpec {
            name: TOOL_RUN_COMMAND.to_string(),
            description: Some(
                "Runs a shell command in the workspace root and returns combined stdout/stderr. \
                 Not for reading or writing files — use read_file/write_file instead."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"}
                },
                "required": ["command"]
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolSourceError::InvalidArguments("missing command".to_string()))?;
        let output = self
            .host
            .exec(command, self.workspace_root.as_ref(), CancellationToken::new())
            .await
            .map_err(|e| ToolSourceError::Execution(e.to_string()))?;
        let text = if output.stderr.is_empty() {
            output.stdout
        } else {
            format!("stdout:\n{}\nstderr:\n{}", output.stdout, output.stderr)
        };
        Ok(ToolCallContent::text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adnify_core::host::{ApprovalDecision, FileEntry, HostError, LogLevel, ShellOutput};
    use std::path::Path;

    struct EchoHost;

    #[async_trait]
    impl adnify_core::host::Filesystem for EchoHost {
        async fn read(&self, _p: &Path) -> Result<Option<String>, HostError> {
            Ok(None)
        }
        async fn write(&self, _p: &Path, _c: &str) -> Result<(), HostError> {
            Ok(())
        }
        async fn delete(&self, _p: &Path) -> Result<(), HostError> {
            Ok(())
        }
        async fn mkdir(&self, _p: &Path) -> Result<(), HostError> {
            Ok(())
        }
        async fn exists(&self, _p: &Path) -> Result<bool, HostError> {
            Ok(false)
        }
        async fn list_dir(&self, _p: &Path) -> Result<Vec<FileEntry>, HostError> {
            Ok(Vec::new())
        }
    }
    #[async_trait]
    impl adnify_core::host::Shell for EchoHost {
        async fn exec(&self, command: &str, _cwd: &Path, _cancel: CancellationToken) -> Result<ShellOutput, HostError> {
            Ok(ShellOutput { exit_code: 0, stdout: format!("ran: {command}"), stderr: String::new() })
        }
    }
    impl adnify_core::host::Lsp for EchoHost {}
    impl adnify_core::host::Git for EchoHost {}
    #[async_trait]
    impl adnify_core::host::Approval for EchoHost {
        async fn await_approval(&self, _id: &str, _q: &str) -> ApprovalDecision {
            ApprovalDecision::Approve
        }
    }
    impl adnify_core::host::Telemetry for EchoHost {
        fn log(&self, _level: LogLevel, _message: &str, _fields: &serde_json::Value) {}
    }

    #[tokio::test]
    async fn delegates_to_the_host_shell_capability() {
        let host: Arc<dyn Host> = Arc::new(EchoHost);
        let tool = RunCommandTool::new(host, Arc::new(std::path::PathBuf::from("/tmp")));
        let result = tool.call(json!({"command": "ls"}), None).await.unwrap();
        assert_eq!(result.text, "ran: ls");
    }

    #[tokio::test]
    async fn missing_command_errors() {
        let host: Arc<dyn Host> = Arc::new(EchoHost);
        let tool = RunCommandTool::new(host, Arc::new(std::path::PathBuf::from("/tmp")));
        let err = tool.call(json!({}), None).await.unwrap_err();
        assert!(matches!(err, ToolSourceError::InvalidArguments(_)));
    }
}
