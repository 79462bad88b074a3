//! `auspex serve`: start the HTTP gateway.

use crate::runtime;
use auspex_gateway::GatewayState;
use std::path::Path;
use std::sync::Arc;

pub async fn run(
    config_path: Option<&Path>,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = runtime::load_config(config_path)?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    if !config.has_api_key() {
        tracing::warn!("No API key configured; generation requests will fail");
    }
    if config.admission.fingerprint_secret.is_none() {
        tracing::warn!(
            "No fingerprint secret configured; using a per-process secret, so throttling state resets on restart"
        );
    }

    println!("Auspex Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Prompt preview: {}", config.gateway.enable_prompt_preview);

    let pipeline = Arc::new(runtime::build_pipeline(&config).await?);
    let state = Arc::new(GatewayState::new(pipeline, config.gateway.clone()));
    auspex_gateway::serve(state).await?;

    Ok(())
}
