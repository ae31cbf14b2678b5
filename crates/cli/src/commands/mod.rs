//! Subcommand implementations and the shared agent wiring.

pub mod chat;
pub mod init;
pub mod models;

use std::sync::Arc;

use kestrel_agent::{flags_from_config, CodingAgent, PendingConfirmation, SessionConfirmation};
use kestrel_config::AppConfig;
use kestrel_core::confirmation::SessionFlags;
use kestrel_providers::ProviderFactory;
use kestrel_tools::TodoState;
use tokio::sync::mpsc;

/// Command-line overrides for a chat session.
#[derive(Debug, Default, Clone)]
pub struct ChatOptions {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_rounds: Option<u32>,
    pub auto_approve: bool,
}

/// Everything a terminal session needs to drive the agent.
pub struct Session {
    pub agent: Arc<CodingAgent>,
    pub confirmations: mpsc::Receiver<PendingConfirmation>,
    pub todos: TodoState,
}

/// Load the config and apply command-line overrides.
pub fn load_config(options: &ChatOptions) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(provider) = &options.provider {
        config.default_provider = provider.clone();
    }
    if let Some(rounds) = options.max_rounds {
        config.agent.max_tool_rounds = rounds.max(1);
    }
    Ok(config)
}

/// Build the agent with the configured provider, built-in tools and a
/// confirmation gate answered from the terminal.
pub fn build_session(config: &AppConfig, options: &ChatOptions) -> Result<Session, Box<dyn std::error::Error>> {
    let factory = Arc::new(ProviderFactory::new(config.clone()));
    let provider = factory.build_default().map_err(|e| {
        format!(
            "Cannot start provider '{}': {e}\n  Run `kestrel init` and edit {}",
            config.default_provider,
            AppConfig::config_dir().join("config.toml").display()
        )
    })?;

    let (tools, todos) = kestrel_tools::default_registry(&config.tools);

    let flags = if options.auto_approve {
        SessionFlags::all()
    } else {
        flags_from_config(&config.confirmation)
    };
    let (gate, confirmations) = SessionConfirmation::new(flags);

    let agent = CodingAgent::builder(provider)
        .config(config)
        .resolver(factory)
        .tools(tools)
        .confirmation(Arc::new(gate))
        .build();

    if let Some(model) = &options.model {
        agent.set_model(model);
    }

    Ok(Session {
        agent,
        confirmations,
        todos,
    })
}
