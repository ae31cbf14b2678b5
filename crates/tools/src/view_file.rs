//! View file tool: read file contents with line numbers, or list a directory.

use async_trait::async_trait;
use kestrel_core::error::ToolError;
use kestrel_core::tool::{Tool, ToolResult};

use crate::path::PathPolicy;

/// Files longer than this are truncated unless a range is requested.
const MAX_LINES: usize = 2000;

pub struct ViewFileTool {
    policy: PathPolicy,
}

impl ViewFileTool {
    pub fn new(policy: PathPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for ViewFileTool {
    fn name(&self) -> &str {
        "view_file"
    }

    fn description(&self) -> &str {
        "View the contents of a file with line numbers, or list the entries of a directory. Optionally restrict to a 1-based line range."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file or directory"
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to show (1-based, inclusive)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "Last line to show (inclusive)"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let raw = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;

        let path = self.policy.check(raw).map_err(|e| ToolError::PermissionDenied {
            tool_name: "view_file".into(),
            reason: e.to_string(),
        })?;

        if path.is_dir() {
            let mut entries = match tokio::fs::read_dir(&path).await {
                Ok(entries) => entries,
                Err(e) => return Ok(ToolResult::failure(format!("Failed to list directory: {e}"))),
            };
            let mut names = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                let mut name = entry.file_name().to_string_lossy().to_string();
                if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                    name.push('/');
                }
                names.push(name);
            }
            names.sort();
            return Ok(ToolResult::ok(format!("Directory {raw}:\n{}", names.join("\n"))));
        }

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => return Ok(ToolResult::failure(format!("Failed to read file: {e}"))),
        };

        let lines: Vec<&str> = content.lines().collect();
        let start = arguments["start_line"].as_u64().map(|n| n.max(1) as usize).unwrap_or(1);
        let requested_end = arguments["end_line"].as_u64().map(|n| n as usize);
        let end = requested_end
            .unwrap_or_else(|| lines.len().min(start + MAX_LINES - 1))
            .min(lines.len());

        if start > end && !lines.is_empty() {
            return Ok(ToolResult::failure(format!(
                "Invalid line range {start}-{end} for a file with {} lines",
                lines.len()
            )));
        }

        let mut out: String = lines
            .iter()
            .enumerate()
            .skip(start - 1)
            .take(end + 1 - start)
            .map(|(i, line)| format!("{:>6}\t{line}\n", i + 1))
            .collect();

        if requested_end.is_none() && end < lines.len() {
            out.push_str(&format!("... {} more lines\n", lines.len() - end));
        }

        Ok(ToolResult::ok(out.trim_end().to_string()))
    }
}
