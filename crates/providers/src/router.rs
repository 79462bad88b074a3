//! Provider router: selects generation and embedding backends from config.
//!
//! Selection happens once at startup; nothing branches on provider name per call.

use crate::anthropic::AnthropicProvider;
use crate::embedding::{HashingEmbedder, OpenAiCompatEmbedder};
use crate::openai_compat::OpenAiCompatProvider;
use auspex_config::AppConfig;
use auspex_core::embedding::Embedder;
use auspex_core::provider::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Holds the configured generation providers.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }
}

fn api_key_for(config: &AppConfig, name: &str) -> String {
    config
        .providers
        .get(name)
        .and_then(|p| p.api_key.clone())
        .or_else(|| config.api_key.clone())
        .unwrap_or_default()
}

fn base_url_for(config: &AppConfig, name: &str) -> String {
    config
        .providers
        .get(name)
        .and_then(|p| p.api_url.clone())
        .unwrap_or_else(|| default_base_url(name))
}

fn build_provider(config: &AppConfig, name: &str) -> Arc<dyn Provider> {
    let api_key = api_key_for(config, name);
    let timeout = Duration::from_secs(config.generation.timeout_secs);

    if name == "anthropic" {
        let mut p = AnthropicProvider::new(&api_key).with_timeout(timeout);
        if let Some(url) = config.providers.get(name).and_then(|p| p.api_url.as_deref()) {
            p = p.with_base_url(url);
        }
        Arc::new(p)
    } else {
        Arc::new(
            OpenAiCompatProvider::new(name, base_url_for(config, name), &api_key)
                .with_timeout(timeout),
        )
    }
}

/// Build generation providers from configuration.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.generation.provider);

    for name in config.providers.keys() {
        router.register(name.clone(), build_provider(config, name));
    }

    // Ensure the default provider exists (even if not explicitly configured)
    if router.get(&config.generation.provider).is_none() {
        router.register(
            config.generation.provider.clone(),
            build_provider(config, &config.generation.provider),
        );
    }

    router
}

/// Build the embedding backend named by `retrieval.embedding_provider`.
///
/// Returns `None` for `"none"`, in which case retrieval always degrades.
pub fn build_embedder(config: &AppConfig) -> Option<Arc<dyn Embedder>> {
    let retrieval = &config.retrieval;
    let name = retrieval.embedding_provider.as_str();
    let timeout = Duration::from_secs(retrieval.timeout_secs);

    match name {
        "none" | "" => None,
        "hashing" => Some(Arc::new(HashingEmbedder::new(retrieval.embedding_dimensions))),
        "ollama" => Some(Arc::new(
            OpenAiCompatEmbedder::new(
                name,
                base_url_for(config, name),
                "ollama",
                &retrieval.embedding_model,
                retrieval.embedding_dimensions,
            )
            .with_timeout(timeout),
        )),
        _ => Some(Arc::new(
            OpenAiCompatEmbedder::new(
                name,
                base_url_for(config, name),
                api_key_for(config, name),
                &retrieval.embedding_model,
                retrieval.embedding_dimensions,
            )
            .with_timeout(timeout),
        )),
    }
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "anthropic" => "https://api.anthropic.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
