//! Write-file tool: write text content to a file under the workspace root.

use std::sync::Arc;

use adnify_core::tool_source::{ToolCallContent, ToolCallContext, ToolSourceError};
use adnify_core::tools::{ApprovalKind, Tool};
use async_trait::async_trait;
use serde_json::json;

use super::path::resolve_under;

pub const TOOL_WRITE_FILE: &str = "write_file";

pub struct WriteFileTool {
    pub workspace_root: Arc<std::path::PathBuf>,
}

impl WriteFileTool {
    pub fn new(workspace_root: Arc<std::path::PathBuf>) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        TOOL_WRITE_FILE
    }

    fn approval_kind(&self) -> ApprovalKind {
        ApprovalKind::Dangerous
    }

    fn spec(&self) -> adnify_core::tool_source::ToolSpec {
        adnify_core::tool_source::ToolSpec {
            name: TOOL_WRITE_FILE.to_string(),
            description: Some(
                "Write text content to a file, relative to the workspace root. Creates parent \
                 directories. Overwrites unless append is true."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"},
                    "append": {"type": "boolean", "default": false}
                },
                "required": ["path", "content"]
            }),
        }
    }

    fn target_paths(&self, args: &serde_json::Value) -> Vec<String> {
        args.get("path").and_then(|v| v.as_str()).map(|s| vec![s.to_string()]).unwrap_or_default()
    }

    async fn call(
        &self,
        args: serde_json::Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError> {
        let path_param = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolSourceError::InvalidArguments("missing path".to_string()))?;
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolSourceError::InvalidArguments("missing content".to_string()))?;
        let append = args.get("append").and_then(|v| v.as_bool()).unwrap_or(false);
        let path = resolve_under(self.workspace_root.as_ref(), path_param)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ToolSourceError::Transport(format!("failed to create parent dir: {e}")))?;
        }
        let open_result = if append {
            std::fs::OpenOptions::new().create(true).append(true).open(&path)
        } else {
            std::fs::File::create(&path)
        };
        let mut file =
            open_result.map_err(|e| ToolSourceError::Transport(format!("failed to open file: {e}")))?;
        std::io::Write::write_all(&mut file, content.as_bytes())
            .map_err(|e| ToolSourceError::Transport(format!("failed to write file: {e}")))?;
        Ok(ToolCallContent::text("ok"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteFileTool::new(Arc::new(dir.path().to_path_buf()));
        tool.call(json!({"path": "out.txt", "content": "hi"}), None).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "hi");
    }

    #[tokio::test]
    async fn append_true_appends_rather_than_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteFileTool::new(Arc::new(dir.path().to_path_buf()));
        tool.call(json!({"path": "out.txt", "content": "a"}), None).await.unwrap();
        tool.call(json!({"path": "out.txt", "content": "b", "append": true}), None).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "ab");
    }

    #[test]
    fn approval_kind_is_dangerous() {
        let tool = WriteFileTool::new(Arc::new(std::path::PathBuf::from("/tmp")));
        assert_eq!(tool.approval_kind(), ApprovalKind::Dangerous);
    }
}
