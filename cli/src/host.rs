//! Local host bridge: a worked implementation of [`adnify_core::host::Host`]
//! over the real filesystem, a subprocess shell, and a terminal approval
//! prompt — direct, in-process execution with no transport hop, against the
//! core crate's trait boundary rather than concrete application types.

use std::io::Write as _;
use std::path::Path;

use adnify_core::host::{
    Approval, ApprovalDecision, FileEntry, Filesystem, Git, HostError, Lsp, LogLevel, Shell,
    ShellOutput, Telemetry,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Host bridge rooted at a fixed workspace directory. LSP and Git stay at
/// their trait defaults (`Unsupported`) — this binary only needs to exercise
/// the turn loop end to end, not provide a full IDE backend.
pub struct LocalHost;

#[async_trait]
impl Filesystem for LocalHost {
    async fn read(&self, path: &Path) -> Result<Option<String>, HostError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HostError::Io(e.to_string())),
        }
    }

    async fn write(&self, path: &Path, content: &str) -> Result<(), HostError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| HostError::Io(e.to_string()))?;
        }
        tokio::fs::write(path, content).await.map_err(|e| HostError::Io(e.to_string()))
    }

    async fn delete(&self, path: &Path) -> Result<(), HostError> {
        tokio::fs::remove_file(path).await.map_err(|e| HostError::Io(e.to_string()))
    }

    async fn mkdir(&self, path: &Path) -> Result<(), HostError> {
        tokio::fs::create_dir_all(path).await.map_err(|e| HostError::Io(e.to_string()))
    }

    async fn exists(&self, path: &Path) -> Result<bool, HostError> {
        Ok(tokio::fs::metadata(path).await.is_ok())
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<FileEntry>, HostError> {
        let mut read_dir = tokio::fs::read_dir(path).await.map_err(|e| HostError::Io(e.to_string()))?;
        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| HostError::Io(e.to_string()))? {
            let file_type = entry.file_type().await.map_err(|e| HostError::Io(e.to_string()))?;
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: file_type.is_dir(),
            });
        }
        Ok(entries)
    }
}

#[async_trait]
impl Shell for LocalHost {
    async fn exec(
        &self,
        command: &str,
        cwd: &Path,
        cancel: CancellationToken,
    ) -> Result<ShellOutput, HostError> {
        #[cfg(unix)]
        let mut cmd = {
            let mut c = tokio::process::Command::new("sh");
            c.arg("-c").arg(command);
            c
        };
        #[cfg(not(unix))]
        let mut cmd = {
            let mut c = tokio::process::Command::new("cmd");
            c.arg("/C").arg(command);
            c
        };
        cmd.current_dir(cwd);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| HostError::Io(e.to_string()))?;
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                Err(HostError::Other("shell command cancelled".to_string()))
            }
            output = child.wait_with_output() => {
                let output = output.map_err(|e| HostError::Io(e.to_string()))?;
                Ok(ShellOutput {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
        }
    }
}

impl Lsp for LocalHost {}
impl Git for LocalHost {}

#[async_trait]
impl Approval for LocalHost {
    async fn await_approval(&self, tool_call_id: &str, question: &str) -> ApprovalDecision {
        tokio::task::spawn_blocking({
            let tool_call_id = tool_call_id.to_string();
            let question = question.to_string();
            move || prompt_approval(&tool_call_id, &question)
        })
        .await
        .unwrap_or(ApprovalDecision::Reject)
    }
}

fn prompt_approval(tool_call_id: &str, question: &str) -> ApprovalDecision {
    print!("approve [{tool_call_id}] {question}? [y/N] ");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return ApprovalDecision::Reject;
    }
    match line.trim().to_lowercase().as_str() {
        "y" | "yes" => ApprovalDecision::Approve,
        _ => ApprovalDecision::Reject,
    }
}

impl Telemetry for LocalHost {
    fn log(&self, level: LogLevel, message: &str, fields: &serde_json::Value) {
        match level {
            LogLevel::Trace => tracing::trace!(%fields, "{message}"),
            LogLevel::Debug => tracing::debug!(%fields, "{message}"),
            LogLevel::Info => tracing::info!(%fields, "{message}"),
            LogLevel::Warn => tracing::warn!(%fields, "{message}"),
            LogLevel::Error => tracing::error!(%fields, "{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_missing_file_returns_none() {
        let host = LocalHost;
        let result = host.read(Path::new("/nonexistent/definitely/missing.txt")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        let host = LocalHost;
        host.write(&path, "hello").await.unwrap();
        let content = host.read(&path).await.unwrap();
        assert_eq!(content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn exec_echo_returns_stdout() {
        let host = LocalHost;
        let out = host.exec("echo hi", Path::new("."), CancellationToken::new()).await.unwrap();
        assert_eq!(out.exit_code, 0);
        assert!(out.stdout.trim().ends_with("hi"));
    }
}
