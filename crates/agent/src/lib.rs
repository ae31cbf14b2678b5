//! The core agent loop: the heart of Kestrel.
//!
//! The agent follows a **Request → Stream → Dispatch** cycle:
//!
//! 1. **Receive** a user message and append it to the conversation
//! 2. **Prune** the history to the context budget
//! 3. **Stream** a completion from the active provider
//! 4. **If tool calls**: confirm, execute, append results, loop back to step 2
//! 5. **If text only**: the turn is done
//!
//! The loop also stops at the tool round limit, on a provider error, or when
//! the user aborts. Each stop leaves a readable assistant entry and emits
//! exactly one `done` chunk.

pub mod confirmation;
pub mod conversation;
pub mod dispatcher;
pub mod loop_runner;
pub mod prompt;
pub mod stream_chunk;
pub mod token;

pub use confirmation::{flags_from_config, PendingConfirmation, SessionConfirmation};
pub use conversation::{ConversationStore, PruneReport};
pub use dispatcher::Dispatcher;
pub use loop_runner::{AgentBuilder, AgentSettings, CodingAgent, CANCELLED_MARKER};
pub use prompt::{compose_system_prompt, DEFAULT_SYSTEM_PROMPT};
pub use stream_chunk::{ChunkSink, StopReason, StreamChunk};

#[cfg(test)]
pub(crate) mod test_helpers;
