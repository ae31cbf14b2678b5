//! The streaming output protocol.
//!
//! A streamed operation yields an ordered sequence of [`StreamChunk`]s over a
//! tokio mpsc channel. Exactly one `done` chunk terminates every stream, and
//! a `tool_calls` chunk always precedes the `tool_result` chunks for the same
//! calls.

use kestrel_core::message::ToolCall;
use kestrel_core::tool::ToolResult;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Why an operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model produced a final answer
    Completed,
    /// The user aborted the operation
    Cancelled,
    /// The tool round limit was hit
    #[serde(rename = "round_limit")]
    RoundLimitReached,
    /// The provider failed
    Error,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::RoundLimitReached => "round_limit",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by the agent during streaming execution.
///
/// - `content`: partial assistant text
/// - `token_count`: estimated size of the conversation
/// - `tool_calls`: the calls the model requested this round
/// - `tool_result`: one call finished
/// - `done`: the stream is complete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Content { content: String },

    TokenCount { token_count: usize },

    ToolCalls { tool_calls: Vec<ToolCall> },

    ToolResult {
        tool_call: ToolCall,
        tool_result: ToolResult,
    },

    Done { reason: StopReason },
}

impl StreamChunk {
    /// Wire name for this chunk type.
    pub fn chunk_type(&self) -> &'static str {
        match self {
            Self::Content { .. } => "content",
            Self::TokenCount { .. } => "token_count",
            Self::ToolCalls { .. } => "tool_calls",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
        }
    }
}

/// Where an operation sends its chunks.
///
/// The non-streaming entry point runs with [`ChunkSink::discard`].
#[derive(Debug, Clone)]
pub struct ChunkSink {
    tx: Option<mpsc::Sender<StreamChunk>>,
}

impl ChunkSink {
    pub fn channel(tx: mpsc::Sender<StreamChunk>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn discard() -> Self {
        Self { tx: None }
    }

    /// Send a chunk. Returns `false` once the receiver has been dropped.
    pub async fn emit(&self, chunk: StreamChunk) -> bool {
        match &self.tx {
            Some(tx) => tx.send(chunk).await.is_ok(),
            None => true,
        }
    }

    /// Resolves once the receiver has been dropped. Never resolves for a
    /// discarding sink.
    pub async fn closed(&self) {
        match &self.tx {
            Some(tx) => tx.closed().await,
            None => std::future::pending().await,
        }
    }
}
