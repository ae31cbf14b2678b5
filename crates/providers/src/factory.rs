//! Provider factory: builds a provider from configuration by ID.
//!
//! The set of supported back-ends is closed ([`ProviderKind`]); any other ID
//! is accepted only when the config gives it an `api_url`, in which case it
//! is treated as an OpenAI-compatible custom endpoint.

use std::sync::Arc;

use kestrel_config::{credential_env_var, AppConfig};
use kestrel_core::error::ProviderError;
use kestrel_core::provider::{Provider, ProviderResolver};
use tracing::debug;

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// The back-ends Kestrel knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    OpenRouter,
    Grok,
    Ollama,
    Custom,
}

impl ProviderKind {
    /// Classify a provider ID. Unrecognized IDs are custom only when they
    /// have a configured endpoint.
    pub fn from_id(provider_id: &str, config: &AppConfig) -> Option<Self> {
        match provider_id {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "openrouter" => Some(Self::OpenRouter),
            "grok" | "xai" => Some(Self::Grok),
            "ollama" => Some(Self::Ollama),
            other => config
                .providers
                .get(other)
                .and_then(|p| p.api_url.as_ref())
                .map(|_| Self::Custom),
        }
    }

    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Anthropic => Some(crate::anthropic::DEFAULT_BASE_URL),
            Self::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Self::Grok => Some("https://api.x.ai/v1"),
            Self::Ollama => Some("http://localhost:11434/v1"),
            Self::Custom => None,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o",
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::OpenRouter => "anthropic/claude-sonnet-4",
            Self::Grok => "grok-4",
            Self::Ollama => "llama3.1",
            Self::Custom => "default",
        }
    }

    /// Whether a non-empty API key must be present.
    pub fn requires_credential(self) -> bool {
        !matches!(self, Self::Ollama | Self::Custom)
    }
}

/// Builds providers from an [`AppConfig`].
#[derive(Debug, Clone)]
pub struct ProviderFactory {
    config: AppConfig,
}

impl ProviderFactory {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// The provider named by `default_provider`.
    pub fn build_default(&self) -> Result<Arc<dyn Provider>, ProviderError> {
        self.resolve(&self.config.default_provider)
    }

    fn model_for(&self, provider_id: &str, kind: ProviderKind) -> String {
        self.config
            .providers
            .get(provider_id)
            .and_then(|p| p.default_model.clone())
            .or_else(|| (provider_id == self.config.default_provider).then(|| self.config.default_model.clone()))
            .unwrap_or_else(|| kind.default_model().to_string())
    }
}

impl ProviderResolver for ProviderFactory {
    fn resolve(&self, provider_id: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        let kind = ProviderKind::from_id(provider_id, &self.config)
            .ok_or_else(|| ProviderError::UnknownProvider(provider_id.to_string()))?;

        let api_key = self.config.provider_api_key(provider_id);
        if kind.requires_credential() && api_key.is_none() {
            return Err(ProviderError::MissingCredential {
                provider: provider_id.to_string(),
                env_var: credential_env_var(provider_id).unwrap_or("KESTREL_API_KEY").to_string(),
            });
        }

        let configured_url = self.config.providers.get(provider_id).and_then(|p| p.api_url.clone());
        let base_url = configured_url
            .clone()
            .or_else(|| kind.default_base_url().map(String::from))
            .ok_or_else(|| ProviderError::NotConfigured(format!("No api_url for provider '{provider_id}'")))?;

        let model = self.model_for(provider_id, kind);
        let max_tokens = self.config.default_max_tokens;

        debug!(provider = provider_id, ?kind, model = %model, base_url = %base_url, "Building provider");

        let provider: Arc<dyn Provider> = match kind {
            ProviderKind::Anthropic => {
                let mut p = AnthropicProvider::new(api_key.unwrap_or_default(), model)?.with_max_tokens(max_tokens);
                if configured_url.is_some() {
                    p = p.with_base_url(base_url);
                }
                Arc::new(p)
            }
            _ => Arc::new(OpenAiCompatProvider::new(provider_id, base_url, api_key, model)?.with_max_tokens(max_tokens)),
        };

        Ok(provider)
    }

    fn known_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = ["openai", "anthropic", "openrouter", "grok", "ollama"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for (id, provider) in &self.config.providers {
            if provider.api_url.is_some() && !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}
