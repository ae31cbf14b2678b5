//! Todo list tool: an in-memory task list the model keeps for itself.

use async_trait::async_trait;
use kestrel_core::error::ToolError;
use kestrel_core::tool::{Tool, ToolResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

/// Shared list state, readable by the UI while the tool mutates it.
pub type TodoState = Arc<RwLock<Vec<TodoItem>>>;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum TodoAction {
    /// Replace the whole list
    Create { todos: Vec<TodoItem> },
    /// Patch items by id
    Update { updates: Vec<TodoUpdate> },
    View,
}

#[derive(Debug, Deserialize)]
struct TodoUpdate {
    id: String,
    #[serde(default)]
    status: Option<TodoStatus>,
    #[serde(default)]
    content: Option<String>,
}

pub struct TodoListTool {
    state: TodoState,
}

impl TodoListTool {
    pub fn new(state: TodoState) -> Self {
        Self { state }
    }
}

/// Render items as a checklist, one per line.
pub fn render_checklist(items: &[TodoItem]) -> String {
    if items.is_empty() {
        return "Todo list is empty".into();
    }
    items
        .iter()
        .map(|item| {
            let mark = match item.status {
                TodoStatus::Pending => "[ ]",
                TodoStatus::InProgress => "[~]",
                TodoStatus::Completed => "[x]",
            };
            format!("{mark} {} ({})", item.content, item.id)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Tool for TodoListTool {
    fn name(&self) -> &str {
        "todo_list"
    }

    fn description(&self) -> &str {
        "Plan and track multi-step work. action=create replaces the list, action=update changes items by id, action=view shows it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["create", "update", "view"] },
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string" },
                            "status": { "type": "string", "enum": ["pending", "in_progress", "completed"] }
                        },
                        "required": ["id", "content", "status"]
                    }
                },
                "updates": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string" },
                            "status": { "type": "string", "enum": ["pending", "in_progress", "completed"] }
                        },
                        "required": ["id"]
                    }
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let action: TodoAction =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let mut items = self.state.write().await;
        match action {
            TodoAction::Create { todos } => *items = todos,
            TodoAction::Update { updates } => {
                for update in updates {
                    let Some(item) = items.iter_mut().find(|i| i.id == update.id) else {
                        return Ok(ToolResult::failure(format!("No todo with id '{}'", update.id)));
                    };
                    if let Some(status) = update.status {
                        item.status = status;
                    }
                    if let Some(content) = update.content {
                        item.content = content;
                    }
                }
            }
            TodoAction::View => {}
        }

        Ok(ToolResult::ok(render_checklist(&items)))
    }
}
