//! Read-file tool: read text content of a file under the workspace root.

use std::sync::Arc;

use adnify_core::tool_source::{ToolCallContent, ToolCallContext, ToolSourceError};
use adnify_core::tools::Tool;
use async_trait::async_trait;
use serde_json::json;

use super::path::resolve_under;

pub const TOOL_READ_FILE: &str = "read_file";
const DEFAULT_LIMIT: usize = 2000;

pub struct ReadFileTool {
    pub workspace_root: Arc<std::path::PathBuf>,
}

impl ReadFileTool {
    pub fn new(workspace_root: Arc<std::path::PathBuf>) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        TOOL_READ_FILE
    }

    fn spec(&self) -> adnify_core::tool_source::ToolSpec {
        adnify_core::tool_source::ToolSpec {
            name: TOOL_READ_FILE.to_string(),
            description: Some(
                "Read file content, relative to the workspace root. Optional 0-based offset \
                 and limit (default 2000 lines). Output is cat -n style."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "offset": {"type": "integer", "minimum": 0},
                    "limit": {"type": "integer", "minimum": 1, "default": DEFAULT_LIMIT}
                },
                "required": ["path"]
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
        let path = resolve_under(self.workspace_root.as_ref(), path_param)?;
        if !path.exists() {
            return Err(ToolSourceError::InvalidArguments(format!("file not found: {}", path.display())));
        }
        if path.is_dir() {
            return Err(ToolSourceError::InvalidArguments(format!(
                "is a directory, not a file: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ToolSourceError::Transport(format!("failed to read file: {e}")))?;

        let offset = args.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_LIMIT as u64) as usize;

        let lines: Vec<&str> = content.split('\n').collect();
        let start = offset.min(lines.len());
        let end = (start + limit).min(lines.len());

        let mut out = String::new();
        for (i, line) in lines[start..end].iter().enumerate() {
            out.push_str(&format!("  {}\t{}\n", start + i + 1, line));
        }
        Ok(ToolCallContent::text(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_lines_with_numbering() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();
        let tool = ReadFileTool::new(Arc::new(dir.path().to_path_buf()));
        let result = tool.call(json!({"path": "a.txt"}), None).await.unwrap();
        assert!(result.text.contains("1\tone"));
        assert!(result.text.contains("2\ttwo"));
    }

    #[tokio::test]
    async fn missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadFileTool::new(Arc::new(dir.path().to_path_buf()));
        let err = tool.call(json!({"path": "missing.txt"}), None).await.unwrap_err();
        assert!(matches!(err, ToolSourceError::InvalidArguments(_)));
    }

    #[test]
    fn target_paths_reports_the_requested_file() {
        let tool = ReadFileTool::new(Arc::new(std::path::PathBuf::from("/tmp")));
        assert_eq!(tool.target_paths(&json!({"path": "a.txt"})), vec!["a.txt".to_string()]);
    }
}
