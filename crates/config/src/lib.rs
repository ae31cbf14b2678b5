//! Configuration loading, validation, and management for Kestrel.
//!
//! Loads configuration from `~/.kestrel/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.kestrel/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the default provider (per-provider keys take precedence)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider used at startup
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model used at startup
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Initial confirmation flags for a session
    #[serde(default)]
    pub confirmation: ConfirmationConfig,

    /// Built-in tool settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Provider-specific configurations, keyed by provider ID
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("agent", &self.agent)
            .field("confirmation", &self.confirmation)
            .field("tools", &self.tools)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on tool rounds per user message
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    /// Estimated-token budget for the request context
    #[serde(default = "default_context_token_limit")]
    pub context_token_limit: usize,

    /// Replaces the built-in system prompt entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Extra instructions appended to the system prompt (e.g. a project's
    /// `.kestrel/instructions.md`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions_file: Option<PathBuf>,
}

fn default_max_tool_rounds() -> u32 {
    400
}
fn default_context_token_limit() -> usize {
    128_000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            context_token_limit: default_context_token_limit(),
            system_prompt: None,
            instructions_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    #[serde(default)]
    pub file_operations: bool,

    #[serde(default)]
    pub bash_commands: bool,

    #[serde(default)]
    pub all_operations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_bash_timeout")]
    pub bash_timeout_secs: u64,

    /// Command allowlist for `bash`. Empty allows any command.
    #[serde(default)]
    pub allowed_commands: Vec<String>,

    /// Roots file tools may touch. Empty allows any path outside `forbidden_paths`.
    #[serde(default)]
    pub allowed_roots: Vec<String>,

    #[serde(default)]
    pub forbidden_paths: Vec<String>,
}

fn default_bash_timeout() -> u64 {
    30
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            bash_timeout_secs: default_bash_timeout(),
            allowed_commands: vec![],
            allowed_roots: vec![],
            forbidden_paths: vec![
                "/etc".into(),
                "/proc".into(),
                "/sys".into(),
                "~/.ssh".into(),
                "~/.gnupg".into(),
                "~/.aws".into(),
            ],
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// Environment variable holding the API key for a well-known provider.
pub fn credential_env_var(provider_id: &str) -> Option<&'static str> {
    match provider_id {
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        "grok" | "xai" => Some("XAI_API_KEY"),
        _ => None,
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.kestrel/config.toml).
    ///
    /// Environment overrides are applied afterwards, see
    /// [`AppConfig::apply_env_overrides`].
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`:
    /// - `KESTREL_API_KEY` fills `api_key`
    /// - `KESTREL_PROVIDER` / `KESTREL_MODEL` replace the defaults
    /// - per-provider keys (`OPENAI_API_KEY`, ...) fill missing provider keys
    ///
    /// Values in the config file win over per-provider environment keys so
    /// the provider factory sees one settled view.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("KESTREL_API_KEY") {
            self.api_key = Some(key);
        }

        if let Some(provider) = lookup("KESTREL_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("KESTREL_MODEL") {
            self.default_model = model;
        }

        for id in ["openai", "anthropic", "openrouter", "grok"] {
            let Some(var) = credential_env_var(id) else { continue };
            let Some(key) = lookup(var).filter(|k| !k.trim().is_empty()) else { continue };
            let entry = self.providers.entry(id.to_string()).or_default();
            if entry.api_key.is_none() {
                entry.api_key = Some(key);
            }
        }
    }

    /// The API key for a provider: its own entry first, then the top-level
    /// key when it is the default provider. Blank keys count as absent.
    pub fn provider_api_key(&self, provider_id: &str) -> Option<String> {
        let present = |key: &Option<String>| key.clone().filter(|k| !k.trim().is_empty());
        let own = self.providers.get(provider_id).and_then(|p| present(&p.api_key));
        let fallback = if provider_id == self.default_provider {
            present(&self.api_key)
        } else {
            None
        };
        own.or(fallback)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".kestrel")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_rounds must be at least 1".into(),
            ));
        }

        if self.agent.context_token_limit == 0 {
            return Err(ConfigError::ValidationError(
                "agent.context_token_limit must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            agent: AgentConfig::default(),
            confirmation: ConfirmationConfig::default(),
            tools: ToolsConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}
