//! String replace editor: edit an existing file by exact text replacement.

use async_trait::async_trait;
use kestrel_core::confirmation::OperationCategory;
use kestrel_core::error::ToolError;
use kestrel_core::tool::{Tool, ToolResult};

use crate::path::PathPolicy;

pub struct StrReplaceEditorTool {
    policy: PathPolicy,
}

impl StrReplaceEditorTool {
    pub fn new(policy: PathPolicy) -> Self {
        Self { policy }
    }
}

/// Replace `old` with `new` in `content`.
///
/// Without `replace_all` the match must be unique so the edit is unambiguous.
fn replace(content: &str, old: &str, new: &str, replace_all: bool) -> Result<(String, usize), String> {
    if old.is_empty() {
        return Err("old_str must not be empty".into());
    }

    match content.matches(old).count() {
        0 => Err("old_str not found in file".into()),
        1 => Ok((content.replacen(old, new, 1), 1)),
        n if replace_all => Ok((content.replace(old, new), n)),
        n => Err(format!(
            "old_str matches {n} locations; add surrounding context to make it unique or set replace_all"
        )),
    }
}

#[async_trait]
impl Tool for StrReplaceEditorTool {
    fn name(&self) -> &str {
        "str_replace_editor"
    }

    fn description(&self) -> &str {
        "Replace an exact string in an existing file. old_str must match exactly once unless replace_all is true."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file to edit"
                },
                "old_str": {
                    "type": "string",
                    "description": "Exact text to replace, including whitespace"
                },
                "new_str": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence instead of requiring a unique match"
                }
            },
            "required": ["path", "old_str", "new_str"]
        })
    }

    fn category(&self) -> Option<OperationCategory> {
        Some(OperationCategory::File)
    }

    fn describe(&self, arguments: &serde_json::Value) -> String {
        format!("Edit {}", arguments["path"].as_str().unwrap_or("<missing path>"))
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let raw = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let old = arguments["old_str"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'old_str' argument".into()))?;
        let new = arguments["new_str"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'new_str' argument".into()))?;
        let replace_all = arguments["replace_all"].as_bool().unwrap_or(false);

        let path = self.policy.check(raw).map_err(|e| ToolError::PermissionDenied {
            tool_name: "str_replace_editor".into(),
            reason: e.to_string(),
        })?;

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => return Ok(ToolResult::failure(format!("Failed to read file: {e}"))),
        };

        let (updated, count) = match replace(&content, old, new, replace_all) {
            Ok(r) => r,
            Err(reason) => return Ok(ToolResult::failure(reason)),
        };

        match tokio::fs::write(&path, updated).await {
            Ok(()) => Ok(ToolResult::ok(format!(
                "Updated {raw}: replaced {count} occurrence{}",
                if count == 1 { "" } else { "s" }
            ))),
            Err(e) => Ok(ToolResult::failure(format!("Failed to write file: {e}"))),
        }
    }
}
