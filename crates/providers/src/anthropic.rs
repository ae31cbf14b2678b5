//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via typed SSE events, normalized into [`StreamDelta`]s

use async_trait::async_trait;
use futures::StreamExt;
use kestrel_core::error::ProviderError;
use kestrel_core::message::{Message, Role, ToolCall};
use kestrel_core::provider::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::http::{build_client, check_status, transport_error};
use crate::sse::{SseBuffer, SseLine};

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const REQUEST_TIMEOUT_SECS: u64 = 300;

const KNOWN_MODELS: &[&str] = &[
    "claude-sonnet-4-20250514",
    "claude-opus-4-20250514",
    "claude-3-7-sonnet-20250219",
    "claude-3-5-haiku-20241022",
];

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    base_url: String,
    api_key: String,
    model: ModelSlot,
    max_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: ModelSlot::new(model),
            max_tokens: DEFAULT_MAX_TOKENS,
            client: build_client(REQUEST_TIMEOUT_SECS)?,
        })
    }

    /// Use a custom base URL (e.g., a proxy).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Split system messages out; Anthropic takes them as a top-level field.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let (system, rest): (Vec<&Message>, Vec<&Message>) =
            messages.iter().partition(|m| m.role == Role::System);

        let system = (!system.is_empty()).then(|| {
            system
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        });

        (system, rest)
    }

    /// Convert messages to Anthropic content blocks.
    ///
    /// Consecutive tool results are folded into a single user message since
    /// the API requires alternating roles.
    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::User => result.push(AnthropicMessage {
                    role: "user".into(),
                    content: AnthropicContent::Text(msg.content.clone()),
                }),
                Role::Assistant if msg.tool_calls.is_empty() => result.push(AnthropicMessage {
                    role: "assistant".into(),
                    content: AnthropicContent::Text(msg.content.clone()),
                }),
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(ContentBlock::Text { text: msg.content.clone() });
                    }
                    for tc in &msg.tool_calls {
                        // Malformed arguments are replayed as an empty object
                        let input = serde_json::from_str(&tc.arguments)
                            .unwrap_or_else(|_| serde_json::json!({}));
                        blocks.push(ContentBlock::ToolUse {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            input,
                        });
                    }
                    result.push(AnthropicMessage {
                        role: "assistant".into(),
                        content: AnthropicContent::Blocks(blocks),
                    });
                }
                Role::Tool => {
                    let block = ContentBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                    };
                    match result.last_mut() {
                        Some(AnthropicMessage {
                            role,
                            content: AnthropicContent::Blocks(blocks),
                        }) if role.as_str() == "user" => blocks.push(block),
                        _ => result.push(AnthropicMessage {
                            role: "user".into(),
                            content: AnthropicContent::Blocks(vec![block]),
                        }),
                    }
                }
                Role::System => {} // handled separately
            }
        }

        result
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn request_body(&self, request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::extract_system(&request.messages);

        let mut body = serde_json::json!({
            "model": self.model.resolve(request),
            "messages": Self::to_api_messages(&messages),
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "temperature": request.temperature,
        });

        if stream {
            body["stream"] = serde_json::json!(true);
        }

        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }

    fn response_to_provider_response(resp: AnthropicResponse) -> ProviderResponse {
        let mut text_content = String::new();
        let mut tool_calls = Vec::new();

        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !text_content.is_empty() {
                        text_content.push('\n');
                    }
                    text_content.push_str(&text);
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall::new(id, name, input.to_string()));
                }
                ResponseContentBlock::Other => {}
            }
        }

        ProviderResponse {
            message: Message::assistant(text_content).with_tool_calls(tool_calls),
            usage: Some(Usage {
                prompt_tokens: resp.usage.input_tokens,
                completion_tokens: resp.usage.output_tokens,
                total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
            }),
            model: resp.model,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn current_model(&self) -> String {
        self.model.get()
    }

    fn set_model(&self, model: &str) {
        self.model.set(model);
    }

    async fn chat(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.request_body(&request, false);

        debug!(provider = "anthropic", model = %body["model"], "Sending completion request");

        let response = self.post(&url).json(&body).send().await.map_err(transport_error)?;
        let response = check_status("anthropic", response).await?;

        let api_resp: AnthropicResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse Anthropic response: {e}"),
        })?;

        Ok(Self::response_to_provider_response(api_resp))
    }

    async fn chat_stream(&self, request: ProviderRequest) -> Result<DeltaStream, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.request_body(&request, true);

        debug!(provider = "anthropic", model = %body["model"], "Sending streaming request");

        let response = self
            .post(&url)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status("anthropic", response).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = SseBuffer::new();
            let mut parser = EventParser::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::StreamInterrupted(e.to_string()))).await;
                        return;
                    }
                };

                for line in buffer.push(&bytes) {
                    let SseLine::Data(data) = line else { continue };
                    match parser.feed(&data) {
                        Ok(deltas) => {
                            for delta in deltas {
                                if tx.send(Ok(delta)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                    if parser.finished {
                        return;
                    }
                }
            }

            // Stream ended without message_stop
            let _ = tx.send(Ok(StreamDelta::finished())).await;
        });

        Ok(rx)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        // No listing endpoint needed; the known set is stable
        Ok(KNOWN_MODELS.iter().map(|m| m.to_string()).collect())
    }
}

/// Normalizes Anthropic's typed stream events.
///
/// Tool-use blocks are keyed by content block `index`; the id arrives once
/// in `content_block_start` and later `input_json_delta`s reuse it.
#[derive(Debug, Default)]
struct EventParser {
    block_ids: HashMap<u64, String>,
    input_tokens: u32,
    finished: bool,
}

impl EventParser {
    fn feed(&mut self, data: &str) -> Result<Vec<StreamDelta>, ProviderError> {
        let event: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data, "Ignoring unparseable Anthropic SSE");
                return Ok(Vec::new());
            }
        };

        let index = event["index"].as_u64().unwrap_or(0);

        let delta = match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                self.input_tokens = event["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
                None
            }
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() != Some("tool_use") {
                    return Ok(Vec::new());
                }
                let id = block["id"].as_str().unwrap_or_default().to_string();
                self.block_ids.insert(index, id.clone());
                Some(StreamDelta {
                    tool_calls: vec![ToolCallDelta {
                        id,
                        name: block["name"].as_str().map(String::from),
                        arguments: String::new(),
                    }],
                    ..Default::default()
                })
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => delta["text"]
                        .as_str()
                        .filter(|t| !t.is_empty())
                        .map(StreamDelta::text),
                    "input_json_delta" => {
                        let id = self
                            .block_ids
                            .get(&index)
                            .cloned()
                            .unwrap_or_else(|| format!("toolu_{index}"));
                        Some(StreamDelta {
                            tool_calls: vec![ToolCallDelta {
                                id,
                                name: None,
                                arguments: delta["partial_json"].as_str().unwrap_or_default().to_string(),
                            }],
                            ..Default::default()
                        })
                    }
                    _ => None,
                }
            }
            "message_delta" => event["usage"]["output_tokens"].as_u64().map(|out| StreamDelta {
                usage: Some(Usage {
                    prompt_tokens: self.input_tokens,
                    completion_tokens: out as u32,
                    total_tokens: self.input_tokens + out as u32,
                }),
                ..Default::default()
            }),
            "message_stop" => {
                self.finished = true;
                Some(StreamDelta::finished())
            }
            "error" => {
                let message = event["error"]["message"].as_str().unwrap_or("unknown error").to_string();
                return Err(ProviderError::StreamInterrupted(message));
            }
            _ => None,
        };

        Ok(delta.into_iter().collect())
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text { text: String },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
