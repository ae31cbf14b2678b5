//! Create file tool: write a new file with path validation.

use async_trait::async_trait;
use kestrel_core::confirmation::OperationCategory;
use kestrel_core::error::ToolError;
use kestrel_core::tool::{Tool, ToolResult};

use crate::path::PathPolicy;

pub struct CreateFileTool {
    policy: PathPolicy,
}

impl CreateFileTool {
    pub fn new(policy: PathPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for CreateFileTool {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create a new file with the given content. Parent directories are created as needed. Fails if the file already exists; use str_replace_editor to modify existing files."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file to create"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn category(&self) -> Option<OperationCategory> {
        Some(OperationCategory::File)
    }

    fn describe(&self, arguments: &serde_json::Value) -> String {
        format!("Create {}", arguments["path"].as_str().unwrap_or("<missing path>"))
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let raw = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;

        let path = self.policy.check(raw).map_err(|e| ToolError::PermissionDenied {
            tool_name: "create_file".into(),
            reason: e.to_string(),
        })?;

        if path.exists() {
            return Ok(ToolResult::failure(format!("File already exists: {raw}")));
        }

        if let Some(parent) = path.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return Ok(ToolResult::failure(format!("Failed to create directory: {e}")));
        }

        match tokio::fs::write(&path, content).await {
            Ok(()) => Ok(ToolResult::ok(format!(
                "Created {raw} ({} lines)",
                content.lines().count()
            ))),
            Err(e) => Ok(ToolResult::failure(format!("Failed to write file: {e}"))),
        }
    }
}
