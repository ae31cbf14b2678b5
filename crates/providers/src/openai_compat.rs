//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, xAI Grok, Ollama, and any endpoint that
//! speaks `/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling
//! - Model listing

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

const REQUEST_TIMEOUT_SECS: u64 = 120;

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    /// `None` for endpoints that need no credential (Ollama)
    api_key: Option<String>,
    model: ModelSlot,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: ModelSlot::new(model),
            max_tokens: None,
            client: build_client(REQUEST_TIMEOUT_SECS)?,
        })
    }

    /// Default `max_tokens` when a request carries none.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn request_body(&self, request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model.resolve(request),
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = serde_json::json!("auto");
        }

        body
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: (!m.tool_calls.is_empty()).then(|| {
                    m.tool_calls
                        .iter()
                        .map(|tc| ApiToolCall {
                            id: tc.id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: tc.name.clone(),
                                arguments: tc.arguments.clone(),
                            },
                        })
                        .collect()
                }),
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn current_model(&self) -> String {
        self.model.get()
    }

    fn set_model(&self, model: &str) {
        self.model.set(model);
    }

    async fn chat(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request, false);

        debug!(provider = %self.name, model = %body["model"], "Sending completion request");

        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(&self.name, response).await?;

        let api_response: ApiResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall::new(tc.id, tc.function.name, tc.function.arguments))
            .collect();

        let message = Message::assistant(choice.message.content.unwrap_or_default()).with_tool_calls(tool_calls);

        Ok(ProviderResponse {
            message,
            usage: api_response.usage.map(ApiUsage::into_usage),
            model: api_response.model,
        })
    }

    async fn chat_stream(&self, request: ProviderRequest) -> Result<DeltaStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request, true);

        debug!(provider = %self.name, model = %body["model"], "Sending streaming request");

        let response = self
            .authorized(self.client.post(&url))
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(&self.name, response).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = SseBuffer::new();
            let mut parser = StreamParser::default();

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
                    for delta in parser.feed(&provider_name, &data) {
                        if tx.send(Ok(delta)).await.is_err() {
                            return; // receiver dropped
                        }
                    }
                    if parser.finished {
                        return;
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(StreamDelta::finished())).await;
        });

        Ok(rx)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(&self.name, response).await?;

        let body: ModelList = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse model list: {e}"),
        })?;

        let mut models: Vec<String> = body.data.into_iter().map(|m| m.id).collect();
        models.sort();
        Ok(models)
    }
}

/// Turns `data:` payloads into normalized deltas.
///
/// OpenAI keys tool-call fragments by `index` and only sends the `id` in the
/// first fragment, so the parser remembers which id each index belongs to.
#[derive(Debug, Default)]
struct StreamParser {
    call_ids: HashMap<u32, String>,
    finished: bool,
}

impl StreamParser {
    fn feed(&mut self, provider: &str, data: &str) -> Vec<StreamDelta> {
        if data == "[DONE]" {
            self.finished = true;
            return vec![StreamDelta::finished()];
        }

        let parsed: StreamResponse = match serde_json::from_str(data) {
            Ok(p) => p,
            Err(e) => {
                trace!(provider, data, error = %e, "Ignoring unparseable SSE chunk");
                return Vec::new();
            }
        };

        let mut deltas = Vec::new();

        if let Some(choice) = parsed.choices.into_iter().next() {
            let mut delta = StreamDelta {
                content: choice.delta.content.filter(|c| !c.is_empty()),
                ..Default::default()
            };

            for fragment in choice.delta.tool_calls.unwrap_or_default() {
                let id = match fragment.id.filter(|id| !id.is_empty()) {
                    Some(id) => {
                        self.call_ids.insert(fragment.index, id.clone());
                        id
                    }
                    None => self
                        .call_ids
                        .entry(fragment.index)
                        .or_insert_with(|| format!("call_{}", fragment.index))
                        .clone(),
                };
                let (name, arguments) = match fragment.function {
                    Some(f) => (f.name.filter(|n| !n.is_empty()), f.arguments.unwrap_or_default()),
                    None => (None, String::new()),
                };
                delta.tool_calls.push(ToolCallDelta { id, name, arguments });
            }

            if delta.content.is_some() || !delta.tool_calls.is_empty() {
                deltas.push(delta);
            }
        }

        if let Some(usage) = parsed.usage {
            deltas.push(StreamDelta {
                usage: Some(usage.into_usage()),
                ..Default::default()
            });
        }

        deltas
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl ApiUsage {
    fn into_usage(self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

// --- Streaming SSE types ---

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: ApiStreamDelta,
}

#[derive(Debug, Deserialize)]
struct ApiStreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiCompatProvider {
        OpenAiCompatProvider::new("openai", "https://api.openai.com/v1/", Some("sk-test".into()), "gpt-4o").unwrap()
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        assert_eq!(provider().base_url(), "https://api.openai.com/v1");
    }

    #[test]
    fn set_model_changes_request_model() {
        let p = provider();
        p.set_model("gpt-4o-mini");
        let body = p.request_body(&ProviderRequest::new(vec![Message::user("hi")]), false);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(p.current_model(), "gpt-4o-mini");
    }

    #[test]
    fn stream_body_requests_usage_and_tools() {
        let p = provider().with_max_tokens(1024);
        let request = ProviderRequest::new(vec![Message::user("hi")]).with_tools(vec![ToolDefinition {
            name: "bash".into(),
            description: "Run a shell command".into(),
            parameters: serde_json::json!({"type": "object"}),
        }]);
        let body = p.request_body(&request, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["tools"][0]["function"]["name"], "bash");
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let msg = Message::assistant("").with_tool_calls(vec![ToolCall::new("call_1", "bash", r#"{"command":"ls"}"#)]);
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg, Message::tool_result("call_1", "a.txt")]);
        let tc = api_msgs[0].tool_calls.as_ref().unwrap();
        assert_eq!(tc[0].function.name, "bash");
        assert_eq!(api_msgs[1].role, "tool");
        assert_eq!(api_msgs[1].tool_call_id.as_deref(), Some("call_1"));
    }

    // --- SSE parsing tests ---

    #[test]
    fn parser_emits_content() {
        let mut parser = StreamParser::default();
        let deltas = parser.feed("openai", r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].content.as_deref(), Some("Hello"));
        assert!(!deltas[0].done);
    }

    #[test]
    fn parser_carries_id_across_fragments() {
        let mut parser = StreamParser::default();
        let first = parser.feed(
            "openai",
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_abc","function":{"name":"bash","arguments":""}}]}}]}"#,
        );
        let second = parser.feed(
            "openai",
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"command\":\"ls\"}"}}]}}]}"#,
        );

        assert_eq!(first[0].tool_calls[0].id, "call_abc");
        assert_eq!(first[0].tool_calls[0].name.as_deref(), Some("bash"));
        assert_eq!(second[0].tool_calls[0].id, "call_abc");
        assert!(second[0].tool_calls[0].name.is_none());
        assert_eq!(second[0].tool_calls[0].arguments, r#"{"command":"ls"}"#);
    }

    #[test]
    fn parser_synthesizes_missing_ids() {
        let mut parser = StreamParser::default();
        let deltas = parser.feed(
            "ollama",
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":"a","arguments":"{}"}},{"index":1,"function":{"name":"b","arguments":"{}"}}]}}]}"#,
        );
        let ids: Vec<&str> = deltas[0].tool_calls.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["call_0", "call_1"]);
    }

    #[test]
    fn parser_usage_and_done() {
        let mut parser = StreamParser::default();
        let usage = parser.feed(
            "openai",
            r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
        );
        assert_eq!(usage[0].usage.unwrap().total_tokens, 15);
        assert!(!parser.finished);

        let done = parser.feed("openai", "[DONE]");
        assert!(done[0].done);
        assert!(parser.finished);
    }

    #[test]
    fn parser_skips_empty_and_garbage() {
        let mut parser = StreamParser::default();
        assert!(parser.feed("openai", r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#).is_empty());
        assert!(parser.feed("openai", "not json").is_empty());
    }

    #[test]
    fn parse_model_list() {
        let list: ModelList = serde_json::from_str(r#"{"object":"list","data":[{"id":"gpt-4o"},{"id":"gpt-4o-mini"}]}"#).unwrap();
        assert_eq!(list.data.len(), 2);
        assert_eq!(list.data[1].id, "gpt-4o-mini");
    }
}
