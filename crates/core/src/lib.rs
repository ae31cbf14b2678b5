//! # Kestrel Core
//!
//! Domain types, traits, and error definitions for the Kestrel coding agent.
//! This crate defines the contracts the agent loop is written against:
//! providers, tools, and the confirmation gate. Implementations live in
//! their respective crates, so tests can swap in scripted stand-ins.

pub mod confirmation;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use confirmation::{
    ConfirmationGate, ConfirmationRequest, ConfirmationResult, OperationCategory, SessionFlags,
};
pub use error::{ProviderError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{ChatEntry, ChatEntryKind, Message, Role, ToolCall};
pub use provider::{
    DeltaStream, ModelSlot, Provider, ProviderRequest, ProviderResolver, ProviderResponse, StreamDelta,
    ToolCallDelta, ToolDefinition, Usage,
};
pub use tool::{Tool, ToolRegistry, ToolResult, ToolSource};
