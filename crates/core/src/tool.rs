//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world:
//! run shell commands, view and edit files, keep a task list.
//! Built-in, plugin and protocol-server tools share one namespace in the
//! [`ToolRegistry`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::confirmation::OperationCategory;
use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// The outcome of a tool invocation.
///
/// When `success` is false, `error` is populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Text fed back to the model and shown in the transcript.
    pub fn display_text(&self) -> String {
        if self.success {
            self.output.clone().unwrap_or_else(|| "Success".to_string())
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"))
        }
    }
}

/// The core Tool trait.
///
/// Each tool (bash, view_file, str_replace_editor, ...) implements this
/// trait and is registered in the [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "bash", "view_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with parsed arguments.
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError>;

    /// Destructive category requiring confirmation, `None` for read-only tools.
    fn category(&self) -> Option<OperationCategory> {
        None
    }

    /// Human-readable summary of an invocation, shown when asking for confirmation.
    fn describe(&self, arguments: &serde_json::Value) -> String {
        format!("{} {}", self.name(), arguments)
    }

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Where a registered tool came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum ToolSource {
    Builtin,
    Plugin(String),
    Mcp(String),
}

struct Registered {
    tool: Arc<dyn Tool>,
    source: ToolSource,
}

/// A registry of available tools.
///
/// The agent uses this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Look up and invoke tools when the LLM requests them
pub struct ToolRegistry {
    tools: HashMap<String, Registered>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a built-in tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_from(ToolSource::Builtin, Arc::new(tool));
    }

    /// Register a tool from a given source.
    pub fn register_from(&mut self, source: ToolSource, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if let Some(previous) = self.tools.get(&name) {
            tracing::warn!(tool = %name, previous = ?previous.source, new = ?source, "Tool name collision, replacing");
        }
        self.tools.insert(name, Registered { tool, source });
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|r| Arc::clone(&r.tool))
    }

    pub fn source_of(&self, name: &str) -> Option<&ToolSource> {
        self.tools.get(name).map(|r| &r.source)
    }

    /// All tool definitions, sorted by name so requests are stable.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|r| r.tool.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Invoke a tool by name.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolResult, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(arguments).await
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError> {
            let text = arguments["text"].as_str().unwrap_or("").to_string();
            Ok(ToolResult::ok(text))
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.source_of("echo"), Some(&ToolSource::Builtin));
    }

    #[test]
    fn plugin_tool_replaces_builtin_with_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register_from(ToolSource::Plugin("extras".into()), Arc::new(EchoTool));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.source_of("echo"), Some(&ToolSource::Plugin("extras".into())));
    }

    #[tokio::test]
    async fn registry_invoke_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let result = registry
            .invoke("echo", serde_json::json!({"text": "hello world"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn registry_invoke_missing_tool() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("nonexistent", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn failure_display_text() {
        let result = ToolResult::failure("tool not found");
        assert_eq!(result.display_text(), "Error: tool not found");
        assert!(!result.success);
    }
}
