//! Tool-call dispatcher.
//!
//! Executes a batch of model-requested calls in order, under confirmation
//! gate supervision, and folds each result back into the conversation.
//! Every call gets exactly one result, whatever happens.

use kestrel_core::confirmation::{ConfirmationGate, ConfirmationRequest};
use kestrel_core::event::{DomainEvent, EventBus};
use kestrel_core::message::{ChatEntry, ToolCall};
use kestrel_core::tool::{ToolRegistry, ToolResult};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::conversation::ConversationStore;
use crate::stream_chunk::{ChunkSink, StreamChunk};

pub const INVALID_ARGUMENTS: &str = "invalid arguments";
pub const TOOL_NOT_FOUND: &str = "tool not found";
pub const CANCELLED_BY_USER: &str = "cancelled by user";

pub struct Dispatcher {
    tools: Arc<ToolRegistry>,
    gate: Arc<dyn ConfirmationGate>,
    events: Arc<EventBus>,
}

impl Dispatcher {
    pub fn new(tools: Arc<ToolRegistry>, gate: Arc<dyn ConfirmationGate>, events: Arc<EventBus>) -> Self {
        Self { tools, gate, events }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn gate(&self) -> &Arc<dyn ConfirmationGate> {
        &self.gate
    }

    /// Run `calls` in order, appending one `tool_result` entry and emitting
    /// one `tool_result` chunk per call.
    ///
    /// Once `cancel` fires the remaining calls are not invoked; they receive
    /// a "cancelled by user" result instead. A dropped chunk receiver
    /// cancels the operation.
    pub async fn dispatch(
        &self,
        calls: &[ToolCall],
        store: &mut ConversationStore,
        sink: &ChunkSink,
        cancel: &CancellationToken,
    ) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            let start = Instant::now();
            let result = if cancel.is_cancelled() {
                ToolResult::failure(CANCELLED_BY_USER)
            } else {
                self.execute(call, cancel).await
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            if result.success {
                debug!(tool = %call.name, call_id = %call.id, duration_ms, "Tool succeeded");
            } else {
                warn!(
                    tool = %call.name,
                    call_id = %call.id,
                    error = result.error.as_deref().unwrap_or_default(),
                    "Tool failed"
                );
            }

            self.events.publish(DomainEvent::ToolExecuted {
                tool_name: call.name.clone(),
                call_id: call.id.clone(),
                success: result.success,
                duration_ms,
                timestamp: chrono::Utc::now(),
            });

            store.append(ChatEntry::tool_result(call.clone(), result.clone()));
            let delivered = sink
                .emit(StreamChunk::ToolResult {
                    tool_call: call.clone(),
                    tool_result: result.clone(),
                })
                .await;
            if !delivered {
                cancel.cancel();
            }

            results.push(result);
        }

        results
    }

    async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolResult {
        let arguments = match parse_arguments(&call.arguments) {
            Some(arguments) => arguments,
            None => return ToolResult::failure(INVALID_ARGUMENTS),
        };

        let Some(tool) = self.tools.get(&call.name) else {
            return ToolResult::failure(TOOL_NOT_FOUND);
        };

        if let Some(category) = tool.category()
            && !self.gate.session_flags().allows(category)
        {
            let request = ConfirmationRequest {
                category,
                operation: call.name.clone(),
                description: tool.describe(&arguments),
            };

            let decision = tokio::select! {
                decision = self.gate.request_confirmation(request) => decision,
                _ = cancel.cancelled() => return ToolResult::failure(CANCELLED_BY_USER),
            };

            if !decision.confirmed {
                let reason = decision
                    .feedback
                    .filter(|f| !f.trim().is_empty())
                    .unwrap_or_else(|| CANCELLED_BY_USER.to_string());
                return ToolResult::failure(reason);
            }
            if decision.dont_ask_again {
                self.gate.set_session_flag(category, true);
            }
        }

        // A separate task contains panics in the handler
        let handle = tokio::spawn(async move { tool.execute(arguments).await });
        match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => ToolResult::failure(e.to_string()),
            Err(e) if e.is_panic() => ToolResult::failure(format!("Tool '{}' panicked", call.name)),
            Err(e) => ToolResult::failure(e.to_string()),
        }
    }
}

/// Empty or whitespace-only arguments mean `{}`.
fn parse_arguments(raw: &str) -> Option<serde_json::Value> {
    if raw.trim().is_empty() {
        return Some(serde_json::json!({}));
    }
    serde_json::from_str(raw).ok()
}
