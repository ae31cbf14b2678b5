//! Conversation domain types.
//!
//! Two views of the same conversation live here:
//! - [`ChatEntry`] is the user-visible transcript owned by the agent. It is
//!   the single source of truth.
//! - [`Message`] is the provider wire shape, derived from the entries on
//!   every request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::ToolResult;

/// The role of a message sender on the provider wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Assistant,
    /// System preamble
    System,
    /// Tool execution result
    Tool,
}

/// A model-requested tool invocation.
///
/// `arguments` is kept as the raw string the model produced; it may be
/// malformed JSON and is only parsed at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-issued call ID
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON string
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// A single message as sent to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Attach tool calls to an assistant message.
    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }
}

/// What kind of transcript record a [`ChatEntry`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatEntryKind {
    User,
    Assistant,
    ToolCall,
    ToolResult,
}

/// One turn in the visible conversation.
///
/// Content is only mutated while `is_streaming` is set; [`ChatEntry::freeze`]
/// ends that window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEntry {
    pub kind: ChatEntryKind,

    pub content: String,

    pub timestamp: DateTime<Utc>,

    /// Calls issued by an assistant entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// The call a `tool_call` or `tool_result` entry refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,

    #[serde(default)]
    pub is_streaming: bool,
}

impl ChatEntry {
    fn new(kind: ChatEntryKind, content: String) -> Self {
        Self {
            kind,
            content,
            timestamp: Utc::now(),
            tool_calls: None,
            tool_call: None,
            tool_result: None,
            is_streaming: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatEntryKind::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatEntryKind::Assistant, content.into())
    }

    /// An assistant entry that will receive streamed content.
    pub fn streaming_assistant() -> Self {
        let mut entry = Self::new(ChatEntryKind::Assistant, String::new());
        entry.is_streaming = true;
        entry
    }

    pub fn tool_call(call: ToolCall) -> Self {
        let mut entry = Self::new(ChatEntryKind::ToolCall, format!("Calling {}", call.name));
        entry.tool_call = Some(call);
        entry
    }

    pub fn tool_result(call: ToolCall, result: ToolResult) -> Self {
        let mut entry = Self::new(ChatEntryKind::ToolResult, result.display_text());
        entry.tool_call = Some(call);
        entry.tool_result = Some(result);
        entry
    }

    /// The call ID this entry refers to, if it is part of a tool exchange.
    pub fn call_id(&self) -> Option<&str> {
        self.tool_call.as_ref().map(|c| c.id.as_str())
    }

    /// Whether this assistant entry issued tool calls.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Append streamed text. Ignored once the entry is frozen.
    pub fn push_content(&mut self, delta: &str) {
        if self.is_streaming {
            self.content.push_str(delta);
        }
    }

    pub fn freeze(&mut self) {
        self.is_streaming = false;
    }
}
