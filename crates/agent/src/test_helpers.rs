//! Shared test helpers for agent tests.

use async_trait::async_trait;
use kestrel_core::confirmation::OperationCategory;
use kestrel_core::error::{ProviderError, ToolError};
use kestrel_core::message::{Message, ToolCall};
use kestrel_core::provider::{
    DeltaStream, ModelSlot, Provider, ProviderRequest, ProviderResolver, ProviderResponse, StreamDelta,
    ToolCallDelta,
};
use kestrel_core::tool::{Tool, ToolResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One scripted provider round.
#[derive(Clone)]
pub enum Step {
    /// Send these deltas, then close the stream
    Deltas(Vec<StreamDelta>),
    /// Send these deltas, then hold the stream open until the receiver drops
    Hang(Vec<StreamDelta>),
    /// Fail the request
    Fail(ProviderError),
}

impl Step {
    pub fn text(text: &str) -> Self {
        Self::Deltas(vec![StreamDelta::text(text), StreamDelta::finished()])
    }

    pub fn tool_call(id: &str, name: &str, arguments: &str) -> Self {
        Self::Deltas(vec![
            StreamDelta {
                tool_calls: vec![ToolCallDelta::from(ToolCall::new(id, name, arguments))],
                ..Default::default()
            },
            StreamDelta::finished(),
        ])
    }
}

/// A streaming provider that plays scripted rounds in sequence.
///
/// Once the script runs out, the last step repeats.
pub struct ScriptedProvider {
    name: String,
    model: ModelSlot,
    steps: Vec<Step>,
    requests: Mutex<Vec<ProviderRequest>>,
    models: Vec<String>,
    list_calls: Mutex<usize>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self::named("scripted", steps)
    }

    pub fn named(name: &str, steps: Vec<Step>) -> Self {
        Self {
            name: name.to_string(),
            model: ModelSlot::new(format!("{name}-model")),
            steps,
            requests: Mutex::new(Vec::new()),
            models: vec![format!("{name}-model"), format!("{name}-large")],
            list_calls: Mutex::new(0),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }

    fn next_step(&self, request: ProviderRequest) -> Step {
        let mut requests = self.requests.lock().unwrap();
        let index = requests.len().min(self.steps.len() - 1);
        requests.push(request);
        self.steps[index].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
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
        let deltas = match self.next_step(request) {
            Step::Deltas(deltas) | Step::Hang(deltas) => deltas,
            Step::Fail(e) => return Err(e),
        };
        let content: String = deltas.iter().filter_map(|d| d.content.clone()).collect();
        let calls = deltas
            .iter()
            .flat_map(|d| d.tool_calls.clone())
            .map(|d| ToolCall::new(d.id, d.name.unwrap_or_default(), d.arguments))
            .collect();
        Ok(ProviderResponse {
            message: Message::assistant(content).with_tool_calls(calls),
            usage: None,
            model: self.model.get(),
        })
    }

    async fn chat_stream(&self, request: ProviderRequest) -> Result<DeltaStream, ProviderError> {
        let (tx, rx) = mpsc::channel(16);
        let (deltas, hang) = match self.next_step(request) {
            Step::Deltas(deltas) => (deltas, false),
            Step::Hang(deltas) => (deltas, true),
            Step::Fail(e) => return Err(e),
        };
        tokio::spawn(async move {
            for delta in deltas {
                if tx.send(Ok(delta)).await.is_err() {
                    return;
                }
            }
            if hang {
                tx.closed().await;
            }
        });
        Ok(rx)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        *self.list_calls.lock().unwrap() += 1;
        Ok(self.models.clone())
    }
}

/// Resolves provider IDs from a fixed map.
#[derive(Default)]
pub struct MapResolver {
    providers: HashMap<String, Arc<dyn Provider>>,
    missing_credentials: HashMap<String, String>,
}

impl MapResolver {
    pub fn with(mut self, id: &str, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(id.to_string(), provider);
        self
    }

    pub fn with_missing_credential(mut self, id: &str, env_var: &str) -> Self {
        self.missing_credentials.insert(id.to_string(), env_var.to_string());
        self
    }
}

impl ProviderResolver for MapResolver {
    fn resolve(&self, provider_id: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        if let Some(env_var) = self.missing_credentials.get(provider_id) {
            return Err(ProviderError::MissingCredential {
                provider: provider_id.to_string(),
                env_var: env_var.clone(),
            });
        }
        self.providers
            .get(provider_id)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(provider_id.to_string()))
    }
}

/// A tool that records its invocations and echoes its arguments.
pub struct RecordingTool {
    name: String,
    category: Option<OperationCategory>,
    invocations: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl RecordingTool {
    pub fn new(name: &str, category: Option<OperationCategory>) -> Self {
        Self {
            name: name.to_string(),
            category,
            invocations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn invocations(&self) -> Arc<Mutex<Vec<serde_json::Value>>> {
        Arc::clone(&self.invocations)
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Records invocations"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    fn category(&self) -> Option<OperationCategory> {
        self.category
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let output = arguments.to_string();
        self.invocations.lock().unwrap().push(arguments);
        Ok(ToolResult::ok(output))
    }
}

pub struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "boom"
    }

    fn description(&self) -> &str {
        "Always panics"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        panic!("handler exploded");
    }
}
