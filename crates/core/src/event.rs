//! Domain event system: decoupled observation of agent activity.
//!
//! The agent publishes events when something interesting happens. Other
//! components (status lines, usage counters, logs) subscribe without
//! coupling to the loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The agent finished a provider round
    ResponseGenerated {
        provider: String,
        model: String,
        round: u32,
        estimated_tokens: usize,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed (or refused)
    ToolExecuted {
        tool_name: String,
        call_id: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The active provider changed
    ProviderSwitched {
        from: String,
        to: String,
        model: String,
        timestamp: DateTime<Utc>,
    },

    /// A user operation reached a terminal state
    OperationFinished {
        reason: String,
        rounds: u32,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
