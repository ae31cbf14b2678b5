//! LLM provider implementations for Kestrel.
//!
//! All providers implement the `kestrel_core::Provider` trait.
//! The [`ProviderFactory`] builds the right one for a provider ID.

pub mod anthropic;
pub mod factory;
mod http;
pub mod openai_compat;
mod sse;

pub use anthropic::AnthropicProvider;
pub use factory::{ProviderFactory, ProviderKind};
pub use openai_compat::OpenAiCompatProvider;
