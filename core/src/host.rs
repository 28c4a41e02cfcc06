//! Host bridge trait boundary: six capabilities, each its own trait, composed
//! into a single [`Host`] object wired in at compile time rather than reached
//! for via a global. The `cli` crate's `tokio::fs`/`std::process::Command`
//! implementation is a worked example of this contract, not part of this
//! crate.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("io error: {0}")]
    Io(String),
    #[error("not supported by this host")]
    Unsupported,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Filesystem capability.
#[async_trait]
pub trait Filesystem: Send + Sync {
    async fn read(&self, path: &Path) -> Result<Option<String>, HostError>;
    async fn write(&self, path: &Path, content: &str) -> Result<(), HostError>;
    async fn delete(&self, path: &Path) -> Result<(), HostError>;
    async fn mkdir(&self, path: &Path) -> Result<(), HostError>;
    async fn exists(&self, path: &Path) -> Result<bool, HostError>;
    async fn list_dir(&self, path: &Path) -> Result<Vec<FileEntry>, HostError>;
}

#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Shell capability. `cancel` is a best-effort cooperative signal — a
/// running subprocess may not respect it until it's killed outright.
#[async_trait]
pub trait Shell: Send + Sync {
    async fn exec(
        &self,
        command: &str,
        cwd: &Path,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<ShellOutput, HostError>;
}

/// LSP pass-through capability. This crate never implements a language
/// server itself — only the interface a host may back with one.
#[async_trait]
pub trait Lsp: Send + Sync {
    async fn definition(&self, path: &Path, line: u32, col: u32) -> Result<String, HostError> {
        let _ = (path, line, col);
        Err(HostError::Unsupported)
    }
    async fn references(&self, path: &Path, line: u32, col: u32) -> Result<String, HostError> {
        let _ = (path, line, col);
        Err(HostError::Unsupported)
    }
    async fn hover(&self, path: &Path, line: u32, col: u32) -> Result<String, HostError> {
        let _ = (path, line, col);
        Err(HostError::Unsupported)
    }
    async fn document_symbol(&self, path: &Path) -> Result<String, HostError> {
        let _ = path;
        Err(HostError::Unsupported)
    }
    async fn call_hierarchy(&self, path: &Path, line: u32, col: u32) -> Result<String, HostError> {
        let _ = (path, line, col);
        Err(HostError::Unsupported)
    }
}

/// Git pass-through capability.
#[async_trait]
pub trait Git: Send + Sync {
    async fn status(&self) -> Result<String, HostError> {
        Err(HostError::Unsupported)
    }
    async fn diff(&self, path: Option<&Path>) -> Result<String, HostError> {
        let _ = path;
        Err(HostError::Unsupported)
    }
    async fn commit(&self, message: &str) -> Result<String, HostError> {
        let _ = message;
        Err(HostError::Unsupported)
    }
    async fn log(&self, limit: usize) -> Result<String, HostError> {
        let _ = limit;
        Err(HostError::Unsupported)
    }
}

/// Human approve/reject decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

/// Approval capability. No timeout — waits indefinitely for the human.
#[async_trait]
pub trait Approval: Send + Sync {
    async fn await_approval(&self, tool_call_id: &str, question: &str) -> ApprovalDecision;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Telemetry capability: best-effort, non-blocking.
pub trait Telemetry: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, fields: &serde_json::Value);
}

/// The full host-bridge contract: every capability a running
/// [`crate::runtime::AgentRuntime`] needs from its embedding environment,
/// composed into one object constructed explicitly at startup.
pub trait Host: Filesystem + Shell + Lsp + Git + Approval + Telemetry {}

impl<T: Filesystem + Shell + Lsp + Git + Approval + Telemetry> Host for T {}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTelemetry;
    impl Telemetry for NullTelemetry {
        fn log(&self, _level: LogLevel, _message: &str, _fields: &serde_json::Value) {}
    }

    #[test]
    fn log_level_orders_by_severity() {
        assert!(LogLevel::Trace < LogLevel::Error);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn null_telemetry_does_not_panic() {
        NullTelemetry.log(LogLevel::Info, "hello", &serde_json::json!({}));
    }
}
