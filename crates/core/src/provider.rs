//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and get a response
//! back, either as a complete message or as a stream of deltas. Each
//! provider owns its active model, switchable at runtime.
//!
//! Implementations: OpenAI-compatible (OpenAI, OpenRouter, Grok, Ollama,
//! custom endpoints) and Anthropic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::{Message, ToolCall};

/// A request to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The conversation messages, system preamble first
    pub messages: Vec<Message>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Overrides the provider's current model for this request only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            model: None,
            temperature: default_temperature(),
            max_tokens: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,

    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A fragment of a tool call in a stream.
///
/// Adapters resolve vendor stream indices to the provider-issued call ID, so
/// fragments of one call always share `id`. `arguments` fragments are
/// concatenated in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub arguments: String,
}

impl From<ToolCall> for ToolCallDelta {
    fn from(call: ToolCall) -> Self {
        Self {
            id: call.id,
            name: Some(call.name),
            arguments: call.arguments,
        }
    }
}

/// A single delta in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDelta {
    /// Partial content
    #[serde(default)]
    pub content: Option<String>,

    /// Partial tool call fragments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,

    /// Whether this is the final delta
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final delta)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn finished() -> Self {
        Self {
            done: true,
            ..Default::default()
        }
    }
}

/// Receiving half of a provider stream.
pub type DeltaStream = mpsc::Receiver<std::result::Result<StreamDelta, ProviderError>>;

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The agent calls `chat()` or
/// `chat_stream()` without knowing which provider is being used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// The model used when a request carries no override.
    fn current_model(&self) -> String;

    fn set_model(&self, model: &str);

    /// Send a request and get a complete response.
    async fn chat(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response deltas.
    ///
    /// Default implementation calls `chat()` and replays the result as a
    /// single content delta followed by the tool calls and a final delta.
    async fn chat_stream(&self, request: ProviderRequest) -> std::result::Result<DeltaStream, ProviderError> {
        let response = self.chat(request).await?;
        let (tx, rx) = mpsc::channel(2);
        let _ = tx
            .send(Ok(StreamDelta {
                content: Some(response.message.content),
                tool_calls: response.message.tool_calls.into_iter().map(ToolCallDelta::from).collect(),
                done: false,
                usage: None,
            }))
            .await;
        let _ = tx
            .send(Ok(StreamDelta {
                usage: response.usage,
                ..StreamDelta::finished()
            }))
            .await;
        Ok(rx)
    }

    /// List available models for this provider.
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(vec![self.current_model()])
    }
}

/// Builds providers by ID.
///
/// Resolution fails with [`ProviderError::UnknownProvider`] for an
/// unrecognized ID and [`ProviderError::MissingCredential`] when a
/// credential is required but absent.
pub trait ProviderResolver: Send + Sync {
    fn resolve(&self, provider_id: &str) -> std::result::Result<Arc<dyn Provider>, ProviderError>;

    /// Provider IDs this resolver knows about.
    fn known_providers(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Interior-mutable model name shared by provider implementations.
#[derive(Debug)]
pub struct ModelSlot(RwLock<String>);

impl ModelSlot {
    pub fn new(model: impl Into<String>) -> Self {
        Self(RwLock::new(model.into()))
    }

    pub fn get(&self) -> String {
        match self.0.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, model: &str) {
        let mut guard = match self.0.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = model.to_string();
    }

    /// The request override if present, otherwise the current model.
    pub fn resolve(&self, request: &ProviderRequest) -> String {
        request.model.clone().unwrap_or_else(|| self.get())
    }
}
