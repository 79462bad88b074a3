//! Wiring shared by the commands: config loading, store and pipeline assembly.

use auspex_config::AppConfig;
use auspex_core::knowledge::VectorStore;
use auspex_pipeline::{GuidancePipeline, PipelineDeps};
use auspex_retrieval::{InMemoryVectorStore, Retriever, SqliteVectorStore};
use auspex_security::SecurityLog;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Load from `--config` when given, otherwise from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(p) => AppConfig::load_with_env(p),
        None => AppConfig::load(),
    }
    .map_err(|e| format!("Failed to load config: {e}"))?;
    Ok(config)
}

/// Open the configured knowledge store, creating the SQLite file if needed.
pub async fn open_store(
    config: &AppConfig,
) -> Result<Arc<dyn VectorStore>, Box<dyn std::error::Error>> {
    match config.retrieval.store.as_str() {
        "memory" => Ok(Arc::new(InMemoryVectorStore::new())),
        "sqlite" => {
            let url = &config.retrieval.database_url;
            let file = url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(file).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let store = SqliteVectorStore::new(url).await?;
            info!(path = %file, "Opened SQLite knowledge store");
            Ok(Arc::new(store))
        }
        other => Err(format!("Unknown retrieval.store '{other}' (use 'sqlite' or 'memory')").into()),
    }
}

/// Assemble the full guidance pipeline from configuration.
pub async fn build_pipeline(
    config: &AppConfig,
) -> Result<GuidancePipeline, Box<dyn std::error::Error>> {
    let router = auspex_providers::router::build_from_config(config);
    let generator = router
        .default()
        .ok_or("No default generation provider configured")?;

    let log = Arc::new(SecurityLog::from_config(&config.security_log));
    let store = open_store(config).await?;
    let embedder = auspex_providers::router::build_embedder(config);
    let retriever = Retriever::new(
        embedder,
        store,
        log.clone(),
        config.retrieval.enabled,
        config.retrieval.top_k,
    )
    .with_timeout(Duration::from_secs(config.retrieval.timeout_secs));

    info!(
        provider = generator.name(),
        model = %config.generation.model,
        retrieval = retriever.is_enabled(),
        "Pipeline ready"
    );

    let deps = PipelineDeps::new(config, generator, retriever, log);
    Ok(GuidancePipeline::new(config, deps))
}
