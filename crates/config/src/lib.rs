//! Configuration loading, validation, and management for Auspex.
//!
//! Loads configuration from `~/.auspex/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.auspex/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Fingerprinting, rate limits, and cooldowns
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Content and behaviour heuristics
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Embedding + vector store
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Text generation backend
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Prompt fusion
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Incremental delivery
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Security event log
    #[serde(default)]
    pub security_log: SecurityLogConfig,
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
            .field("gateway", &self.gateway)
            .field("admission", &self.admission)
            .field("classifier", &self.classifier)
            .field("retrieval", &self.retrieval)
            .field("generation", &self.generation)
            .field("providers", &self.providers)
            .field("prompt", &self.prompt)
            .field("streaming", &self.streaming)
            .field("security_log", &self.security_log)
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

impl std::fmt::Debug for AdmissionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionConfig")
            .field("fingerprint_secret", &redact(&self.fingerprint_secret))
            .field("max_body_bytes", &self.max_body_bytes)
            .field("cooldown_ms", &self.cooldown_ms)
            .field("bot_cooldown_ms", &self.bot_cooldown_ms)
            .field("pacing_cooldown_ms", &self.pacing_cooldown_ms)
            .field("guidance", &self.guidance)
            .field("preview", &self.preview)
            .field("max_tracked_keys", &self.max_tracked_keys)
            .finish()
    }
}

fn default_true() -> bool {
    true
}

// ── Gateway ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Take the client IP from the first `X-Forwarded-For` hop.
    /// Only enable behind a trusted reverse proxy.
    #[serde(default)]
    pub trust_forwarded_headers: bool,

    /// Expose `POST /v1/guidance/preview`
    #[serde(default)]
    pub enable_prompt_preview: bool,

    /// Allowed CORS origins. Empty = same-origin only.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            trust_forwarded_headers: false,
            enable_prompt_preview: false,
            cors_origins: vec![],
        }
    }
}

// ── Admission ─────────────────────────────────────────────────────────────

/// A fixed-window limit for one endpoint class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitRule {
    /// Requests allowed per window
    pub limit: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// HMAC key for fingerprints. Unset = random per process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint_secret: Option<String>,

    /// Hard ceiling on request body size, checked before parsing
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Standard cooldown imposed after a rate-limit hit
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Punitive cooldown imposed after bot detection
    #[serde(default = "default_bot_cooldown_ms")]
    pub bot_cooldown_ms: u64,

    /// Minimum spacing between admitted requests (0 = off)
    #[serde(default)]
    pub pacing_cooldown_ms: u64,

    #[serde(default = "default_guidance_rule")]
    pub guidance: RateLimitRule,

    #[serde(default = "default_preview_rule")]
    pub preview: RateLimitRule,

    /// Soft cap on tracked keys before expired entries are evicted
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: usize,
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}
fn default_cooldown_ms() -> u64 {
    30_000
}
fn default_bot_cooldown_ms() -> u64 {
    15 * 60 * 1000
}
fn default_guidance_rule() -> RateLimitRule {
    RateLimitRule {
        limit: 10,
        window_ms: 60_000,
    }
}
fn default_preview_rule() -> RateLimitRule {
    RateLimitRule {
        limit: 30,
        window_ms: 60_000,
    }
}
fn default_max_tracked_keys() -> usize {
    10_000
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            fingerprint_secret: None,
            max_body_bytes: default_max_body_bytes(),
            cooldown_ms: default_cooldown_ms(),
            bot_cooldown_ms: default_bot_cooldown_ms(),
            pacing_cooldown_ms: 0,
            guidance: default_guidance_rule(),
            preview: default_preview_rule(),
            max_tracked_keys: default_max_tracked_keys(),
        }
    }
}

// ── Classifier ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Longest accepted message after sanitization, in characters
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    /// A run of one repeated character this long is flooding
    #[serde(default = "default_flood_run_len")]
    pub flood_run_len: usize,

    /// More links than this is spam
    #[serde(default = "default_max_links")]
    pub max_links: usize,

    /// Requests inside `burst_window_ms` that mark a caller as automated
    #[serde(default = "default_burst_threshold")]
    pub burst_threshold: usize,

    #[serde(default = "default_burst_window_ms")]
    pub burst_window_ms: u64,

    /// Identical messages inside `history_window_ms` that mark a caller as automated
    #[serde(default = "default_repeat_threshold")]
    pub repeat_threshold: usize,

    #[serde(default = "default_history_window_ms")]
    pub history_window_ms: u64,

    /// Treat automation user-agents (curl, headless browsers) as bots
    #[serde(default = "default_true")]
    pub block_automation_agents: bool,
}

fn default_max_message_chars() -> usize {
    2_000
}
fn default_flood_run_len() -> usize {
    20
}
fn default_max_links() -> usize {
    3
}
fn default_burst_threshold() -> usize {
    5
}
fn default_burst_window_ms() -> u64 {
    3_000
}
fn default_repeat_threshold() -> usize {
    3
}
fn default_history_window_ms() -> u64 {
    60_000
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
            flood_run_len: default_flood_run_len(),
            max_links: default_max_links(),
            burst_threshold: default_burst_threshold(),
            burst_window_ms: default_burst_window_ms(),
            repeat_threshold: default_repeat_threshold(),
            history_window_ms: default_history_window_ms(),
            block_automation_agents: true,
        }
    }
}

// ── Retrieval ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Administrative switch; disabled = always degraded
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// "openai", "ollama", "hashing", or "none"
    #[serde(default = "default_embedding_provider")]
    pub embedding_provider: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    /// "memory" or "sqlite"
    #[serde(default = "default_store")]
    pub store: String,

    /// SQLite URL or path for the "sqlite" store
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Document-type tag every retrievable chunk carries
    #[serde(default = "default_doc_type")]
    pub doc_type: String,

    /// HTTP timeout for the embedding client
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_provider() -> String {
    "hashing".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_embedding_dimensions() -> usize {
    384
}
fn default_store() -> String {
    "sqlite".into()
}
fn default_database_url() -> String {
    AppConfig::config_dir()
        .join("knowledge.db")
        .display()
        .to_string()
}
fn default_top_k() -> usize {
    5
}
fn default_doc_type() -> String {
    "knowledge_base".into()
}
fn default_embedding_timeout_secs() -> u64 {
    10
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            embedding_provider: default_embedding_provider(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            store: default_store(),
            database_url: default_database_url(),
            top_k: default_top_k(),
            doc_type: default_doc_type(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

// ── Generation ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// HTTP timeout for the generation client
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_generation_timeout_secs() -> u64 {
    25
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

// ── Prompt ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Base instructions placed first in every fused prompt
    #[serde(default = "default_base_instructions")]
    pub base_instructions: String,

    /// Conversation turns kept from recent history
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Per-summary character cap
    #[serde(default = "default_max_summary_chars")]
    pub max_summary_chars: usize,

    /// Maximum number of summaries accepted per request
    #[serde(default = "default_max_summaries")]
    pub max_summaries: usize,
}

fn default_base_instructions() -> String {
    "You are a warm, thoughtful guide drawing on Vedic astrology, numerology and palmistry. \
     Offer reflective guidance, never certainties. Speak about tendencies and possibilities, \
     never fixed outcomes or dates. Do not give medical, legal or financial advice; suggest a \
     qualified professional instead. Keep answers concise and kind."
        .into()
}
fn default_history_turns() -> usize {
    10
}
fn default_max_summary_chars() -> usize {
    4_000
}
fn default_max_summaries() -> usize {
    8
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            base_instructions: default_base_instructions(),
            history_turns: default_history_turns(),
            max_summary_chars: default_max_summary_chars(),
            max_summaries: default_max_summaries(),
        }
    }
}

// ── Streaming ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Wall-clock ceiling measured from request start
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,

    /// Approximate characters per emitted chunk
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,

    /// Pause between chunks
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
}

fn default_deadline_ms() -> u64 {
    30_000
}
fn default_chunk_chars() -> usize {
    24
}
fn default_chunk_delay_ms() -> u64 {
    15
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            chunk_chars: default_chunk_chars(),
            chunk_delay_ms: default_chunk_delay_ms(),
        }
    }
}

// ── Security log ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityLogConfig {
    /// Events retained in memory
    #[serde(default = "default_log_capacity")]
    pub capacity: usize,

    /// Forward events to `tracing`
    #[serde(default = "default_true")]
    pub trace: bool,
}

fn default_log_capacity() -> usize {
    5_000
}

impl Default for SecurityLogConfig {
    fn default() -> Self {
        Self {
            capacity: default_log_capacity(),
            trace: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.auspex/config.toml).
    ///
    /// Also checks environment variables:
    /// - `AUSPEX_API_KEY` (highest priority), `OPENAI_API_KEY`, `OPENROUTER_API_KEY`
    /// - `AUSPEX_PROVIDER`, `AUSPEX_MODEL`
    /// - `AUSPEX_FINGERPRINT_SECRET`, `AUSPEX_DATABASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from an explicit path, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if self.api_key.is_none() {
            self.api_key = std::env::var("AUSPEX_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("AUSPEX_PROVIDER") {
            self.generation.provider = provider;
        }

        if let Ok(model) = std::env::var("AUSPEX_MODEL") {
            self.generation.model = model;
        }

        if let Ok(secret) = std::env::var("AUSPEX_FINGERPRINT_SECRET") {
            self.admission.fingerprint_secret = Some(secret);
        }

        if let Ok(url) = std::env::var("AUSPEX_DATABASE_URL") {
            self.retrieval.database_url = url;
        }
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

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".auspex")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.temperature < 0.0 || self.generation.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "generation.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        for (name, rule) in [
            ("guidance", &self.admission.guidance),
            ("preview", &self.admission.preview),
        ] {
            if rule.limit == 0 || rule.window_ms == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "admission.{name}: limit and window_ms must be > 0"
                )));
            }
        }

        if self.admission.bot_cooldown_ms <= self.admission.cooldown_ms {
            return Err(ConfigError::ValidationError(
                "admission.bot_cooldown_ms must be longer than admission.cooldown_ms".into(),
            ));
        }

        if self.admission.max_body_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "admission.max_body_bytes must be > 0".into(),
            ));
        }

        if !(1..=50).contains(&self.retrieval.top_k) {
            return Err(ConfigError::ValidationError(
                "retrieval.top_k must be between 1 and 50".into(),
            ));
        }

        if self.streaming.deadline_ms == 0 {
            return Err(ConfigError::ValidationError(
                "streaming.deadline_ms must be > 0".into(),
            ));
        }

        if self.streaming.chunk_chars == 0 {
            return Err(ConfigError::ValidationError(
                "streaming.chunk_chars must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some() || self.providers.values().any(|p| p.api_key.is_some())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            gateway: GatewayConfig::default(),
            admission: AdmissionConfig::default(),
            classifier: ClassifierConfig::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
            providers: HashMap::new(),
            prompt: PromptConfig::default(),
            streaming: StreamingConfig::default(),
            security_log: SecurityLogConfig::default(),
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

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
