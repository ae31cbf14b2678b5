//! `kestrel models`: List the models a provider offers.

use super::{build_session, load_config, ChatOptions};

pub async fn run(provider: Option<String>, refresh: bool) -> Result<(), Box<dyn std::error::Error>> {
    let options = ChatOptions {
        provider,
        ..ChatOptions::default()
    };
    let config = load_config(&options)?;
    let session = build_session(&config, &options)?;
    let agent = session.agent;

    let models = agent.fetch_available_models(refresh).await?;
    let current = agent.current_model();

    println!("Models for {}:", agent.provider_name());
    for model in models {
        let marker = if model == current { "*" } else { " " };
        println!("  {marker} {model}");
    }

    Ok(())
}
