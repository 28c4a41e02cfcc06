//! Exercises the CLI's builtin tools end to end without a network-backed
//! LLM call: writes a file, reads it back, and runs a shell command, all
//! through the same `Tool` trait the turn loop drives.

use std::path::Path;
use std::sync::Arc;

use adnify_core::host::{
    ApprovalDecision, FileEntry, Filesystem, Git, HostError, Lsp, LogLevel, Shell, ShellOutput,
    Telemetry,
};
use adnify_core::tool_source::ToolCallContext;
use adnify_core::tools::Tool;
use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

struct RealHost;

#[async_trait]
impl Filesystem for RealHost {
    async fn read(&self, path: &Path) -> Result<Option<String>, HostError> {
        match tokio::fs::read_to_string(path).await {
            Ok(c) => Ok(Some(c)),
            Err(_) => Ok(None),
        }
    }
    async fn write(&self, path: &Path, content: &str) -> Result<(), HostError> {
        tokio::fs::write(path, content).await.map_err(|e| HostError::Io(e.to_string()))
    }
    async fn delete(&self, _path: &Path) -> Result<(), HostError> {
        Ok(())
    }
    async fn mkdir(&self, _path: &Path) -> Result<(), HostError> {
        Ok(())
    }
    async fn exists(&self, path: &Path) -> Result<bool, HostError> {
        Ok(path.exists())
    }
    async fn list_dir(&self, _path: &Path) -> Result<Vec<FileEntry>, HostError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl Shell for RealHost {
    async fn exec(&self, command: &str, cwd: &Path, _cancel: CancellationToken) -> Result<ShellOutput, HostError> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| HostError::Io(e.to_string()))?;
        Ok(ShellOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl Lsp for RealHost {}
impl Git for RealHost {}

#[async_trait]
impl adnify_core::host::Approval for RealHost {
    async fn await_approval(&self, _id: &str, _q: &str) -> ApprovalDecision {
        ApprovalDecision::Approve
    }
}

impl Telemetry for RealHost {
    fn log(&self, _level: LogLevel, _message: &str, _fields: &serde_json::Value) {}
}

#[tokio::test]
async fn write_read_and_run_command_compose() {
    let dir = tempfile::tempdir().unwrap();
    let root = Arc::new(dir.path().to_path_buf());
    let host: Arc<dyn adnify_core::host::Host> = Arc::new(RealHost);

    let write_tool = cli::tools::WriteFileTool::new(root.clone());
    write_tool.call(json!({"path": "greeting.txt", "content": "hello there"}), None).await.unwrap();

    let read_tool = cli::tools::ReadFileTool::new(root.clone());
    let read_result = read_tool.call(json!({"path": "greeting.txt"}), None).await.unwrap();
    assert!(read_result.text.contains("hello there"));

    let run_tool = cli::tools::RunCommandTool::new(host, root);
    let ctx: Option<&ToolCallContext> = None;
    let run_result = run_tool.call(json!({"command": "cat greeting.txt"}), ctx).await.unwrap();
    assert!(run_result.text.contains("hello there"));
}
