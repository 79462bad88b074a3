//! The guidance pipeline.
//!
//! [`GuidancePipeline::prepare`] runs every gate and produces a filtered
//! answer; [`GuidancePipeline::deliver`] streams it. Stages, in order:
//!
//! fingerprint → admission → parse/validate → sanitize → suspicion → bot
//! → retrieval (degrades) → prompt → generation (fatal, deadline-bounded)
//! → safety filter.
//!
//! Nothing after admission runs for a rejected request, and nothing after
//! classification runs for a flagged one.

use crate::delivery::{DeliveryEvent, DeliveryState, StreamDelivery, chunk_text};
use crate::prompt::{ContextSummary, FusedPrompt, PromptBuilder, PromptInput};
use crate::safety::{EmotionalState, SafetyFilter, SafetyVerdict};
use auspex_config::{AppConfig, ClassifierConfig, GenerationConfig, StreamingConfig};
use auspex_core::knowledge::Mode;
use auspex_core::message::Message;
use auspex_core::provider::{Provider, ProviderRequest};
use auspex_core::security_event::SecurityEventKind;
use auspex_retrieval::{Retrieval, RetrievalQuery, Retriever};
use auspex_security::{
    AdmissionGate, AdmissionReason, BotDetector, Clock, Fingerprint, Fingerprinter,
    InMemoryThrottleStore, RequestSignals, Scope, SecurityLog, SystemClock, ThrottleStore,
    classify_suspicious, sanitize,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Shown to the caller when generation fails. Never includes the cause.
pub const GENERATION_APOLOGY: &str =
    "We're sorry, guidance is unavailable right now. Please try again in a moment.";

/// Generic message for classification rejections.
pub const REJECTED_MESSAGE: &str = "This request could not be processed.";

const MAX_INTENT_CHARS: usize = 200;

// ── Request ───────────────────────────────────────────────────────────────

/// The inbound request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidanceRequest {
    pub message: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default, alias = "context_summaries")]
    pub context_summaries: Vec<ContextSummary>,
    #[serde(default, alias = "recent_history")]
    pub recent_history: Vec<HistoryTurn>,
    #[serde(default)]
    pub intent: Option<String>,
}

fn default_mode() -> String {
    Mode::General.as_str().into()
}

/// One prior turn supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: HistoryRole,
    pub content: String,
}

/// Callers may only replay their own and the assistant's turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

// ── Errors ────────────────────────────────────────────────────────────────

/// Why a request ended before delivery.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Admission rejected: {reason}")]
    Admission {
        reason: AdmissionReason,
        retry_after_ms: Option<u64>,
    },

    #[error("Invalid request: {0}")]
    Validation(String),

    /// The string is the internal reason; callers only see [`REJECTED_MESSAGE`].
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The string is the internal cause; callers only see [`GENERATION_APOLOGY`].
    #[error("Generation failed: {0}")]
    Generation(String),
}

impl PipelineError {
    /// Text safe to show the caller.
    pub fn caller_message(&self) -> String {
        match self {
            PipelineError::Admission { reason, .. } => match reason {
                AdmissionReason::PayloadTooLarge => "Request body is too large.".into(),
                AdmissionReason::CooldownActive => {
                    "Please wait a little before asking again.".into()
                }
                AdmissionReason::RateLimited => {
                    "Too many requests. Please slow down and try again shortly.".into()
                }
            },
            PipelineError::Validation(msg) => msg.clone(),
            PipelineError::Rejected(_) => REJECTED_MESSAGE.into(),
            PipelineError::Generation(_) => GENERATION_APOLOGY.into(),
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            PipelineError::Admission { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}

// ── Outputs ───────────────────────────────────────────────────────────────

/// A generated, filtered answer waiting for delivery.
#[derive(Debug, Clone)]
pub struct PreparedAnswer {
    pub fingerprint: Fingerprint,
    pub mode: Mode,
    pub verdict: SafetyVerdict,
    pub retrieval_degraded: bool,
    pub chunks_used: usize,
    pub prompt: FusedPrompt,
    /// Absolute delivery deadline (request start + configured deadline).
    pub deadline: Instant,
}

impl PreparedAnswer {
    /// The text that will be streamed.
    pub fn text(&self) -> &str {
        self.verdict.deliverable()
    }
}

/// The fused prompt for a request, without generating.
#[derive(Debug, Clone, Serialize)]
pub struct PromptPreview {
    pub mode: Mode,
    pub retrieval_degraded: bool,
    pub emotional_state: EmotionalState,
    pub chunks: Vec<PreviewChunk>,
    pub prompt: FusedPrompt,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewChunk {
    pub id: String,
    pub label: String,
    pub score: f32,
}

/// A request that passed every gate.
struct Screened {
    fingerprint: Fingerprint,
    mode: Mode,
    message: String,
    summaries: Vec<ContextSummary>,
    history: Vec<Message>,
    intent: Option<String>,
    emotional_state: EmotionalState,
}

// ── Pipeline ──────────────────────────────────────────────────────────────

/// Collaborators the pipeline does not build itself.
pub struct PipelineDeps {
    pub generator: Arc<dyn Provider>,
    pub retriever: Retriever,
    pub log: Arc<SecurityLog>,
    pub throttle: Arc<dyn ThrottleStore>,
    pub clock: Arc<dyn Clock>,
}

impl PipelineDeps {
    /// Process-local throttle store and the system clock.
    pub fn new(
        config: &AppConfig,
        generator: Arc<dyn Provider>,
        retriever: Retriever,
        log: Arc<SecurityLog>,
    ) -> Self {
        Self {
            generator,
            retriever,
            log,
            throttle: Arc::new(InMemoryThrottleStore::new(config.admission.max_tracked_keys)),
            clock: Arc::new(SystemClock),
        }
    }
}

pub struct GuidancePipeline {
    fingerprinter: Fingerprinter,
    gate: AdmissionGate,
    classifier: ClassifierConfig,
    bots: BotDetector,
    retriever: Retriever,
    prompts: PromptBuilder,
    base_instructions: String,
    max_summaries: usize,
    generator: Arc<dyn Provider>,
    generation: GenerationConfig,
    safety: SafetyFilter,
    streaming: StreamingConfig,
    clock: Arc<dyn Clock>,
    log: Arc<SecurityLog>,
}

impl GuidancePipeline {
    pub fn new(config: &AppConfig, deps: PipelineDeps) -> Self {
        let admission = &config.admission;
        Self {
            fingerprinter: Fingerprinter::from_config(
                admission.fingerprint_secret.as_deref(),
                config.gateway.trust_forwarded_headers,
            ),
            gate: AdmissionGate::new(
                admission.clone(),
                deps.throttle,
                deps.clock.clone(),
                deps.log.clone(),
            ),
            classifier: config.classifier.clone(),
            bots: BotDetector::new(config.classifier.clone(), admission.max_tracked_keys),
            retriever: deps.retriever,
            prompts: PromptBuilder::from_config(&config.prompt),
            base_instructions: config.prompt.base_instructions.clone(),
            max_summaries: config.prompt.max_summaries,
            generator: deps.generator,
            generation: config.generation.clone(),
            safety: SafetyFilter::new(deps.log.clone()),
            streaming: config.streaming.clone(),
            clock: deps.clock,
            log: deps.log,
        }
    }

    pub fn security_log(&self) -> &Arc<SecurityLog> {
        &self.log
    }

    pub fn max_body_bytes(&self) -> usize {
        self.gate.max_body_bytes()
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.streaming.deadline_ms)
    }

    /// Run every stage up to and including the safety filter.
    pub async fn prepare(
        &self,
        signals: &RequestSignals,
        body: &[u8],
        started: Instant,
    ) -> Result<PreparedAnswer, PipelineError> {
        let deadline = started + self.deadline();
        let screened = self.screen(signals, body, Scope::Guidance).await?;
        let fp = screened.fingerprint.as_str();

        let retrieval = self.retrieve(&screened).await;
        let prompt = self.fuse(&screened, &retrieval);
        let raw = self.generate(&screened.fingerprint, &prompt, deadline).await?;
        let verdict = self
            .safety
            .filter(&raw, Some(screened.emotional_state), fp);

        info!(
            fingerprint = screened.fingerprint.short(),
            mode = %screened.mode,
            verdict = verdict.label(),
            degraded = retrieval.degraded,
            chunks = retrieval.chunks.len(),
            prompt_tokens = prompt.metadata.total_tokens,
            "Guidance prepared"
        );

        Ok(PreparedAnswer {
            fingerprint: screened.fingerprint,
            mode: screened.mode,
            verdict,
            retrieval_degraded: retrieval.degraded,
            chunks_used: retrieval.chunks.len(),
            prompt,
            deadline,
        })
    }

    /// Stream a prepared answer. Dropping the receiver stops the task.
    pub fn deliver(&self, prepared: PreparedAnswer) -> mpsc::Receiver<DeliveryEvent> {
        let (tx, rx) = mpsc::channel(32);
        let source = chunk_text(
            prepared.text(),
            self.streaming.chunk_chars,
            Duration::from_millis(self.streaming.chunk_delay_ms),
        );
        let log = self.log.clone();
        let deadline = prepared.deadline;
        let fingerprint = prepared.fingerprint;

        tokio::spawn(async move {
            let outcome = StreamDelivery::run(source, deadline, &tx).await;
            if outcome.state == DeliveryState::TimedOut {
                log.emit(
                    SecurityEventKind::StreamTimedOut,
                    fingerprint.as_str(),
                    format!("{} chunks delivered before deadline", outcome.chunks_sent),
                );
            }
            debug!(
                fingerprint = fingerprint.short(),
                state = ?outcome.state,
                chunks = outcome.chunks_sent,
                chars = outcome.chars_sent,
                "Delivery finished"
            );
        });

        rx
    }

    /// Same gates as [`prepare`](Self::prepare) under the preview scope,
    /// returning the fused prompt instead of generating.
    pub async fn preview(
        &self,
        signals: &RequestSignals,
        body: &[u8],
    ) -> Result<PromptPreview, PipelineError> {
        let screened = self.screen(signals, body, Scope::Preview).await?;
        let retrieval = self.retrieve(&screened).await;
        let prompt = self.fuse(&screened, &retrieval);

        Ok(PromptPreview {
            mode: screened.mode,
            retrieval_degraded: retrieval.degraded,
            emotional_state: screened.emotional_state,
            chunks: retrieval
                .chunks
                .iter()
                .map(|c| PreviewChunk {
                    id: c.chunk.id.clone(),
                    label: c.chunk.label().to_string(),
                    score: c.score,
                })
                .collect(),
            prompt,
        })
    }

    /// Record a body the transport refused to buffer. The gate sees a size
    /// just past its ceiling, so the reject is logged like any other.
    pub async fn reject_oversized(&self, signals: &RequestSignals, scope: Scope) -> PipelineError {
        let fingerprint = self.fingerprinter.derive(signals);
        let decision = self
            .gate
            .admit(&fingerprint, scope, self.max_body_bytes().saturating_add(1))
            .await;
        PipelineError::Admission {
            reason: decision.reason.unwrap_or(AdmissionReason::PayloadTooLarge),
            retry_after_ms: decision.retry_after_ms,
        }
    }

    // ── Stages ────────────────────────────────────────────────────────────

    async fn screen(
        &self,
        signals: &RequestSignals,
        body: &[u8],
        scope: Scope,
    ) -> Result<Screened, PipelineError> {
        let fingerprint = self.fingerprinter.derive(signals);

        let decision = self.gate.admit(&fingerprint, scope, body.len()).await;
        if !decision.allowed {
            return Err(PipelineError::Admission {
                reason: decision.reason.unwrap_or(AdmissionReason::RateLimited),
                retry_after_ms: decision.retry_after_ms,
            });
        }

        let request: GuidanceRequest = serde_json::from_slice(body)
            .map_err(|e| self.invalid(&fingerprint, format!("Invalid request body: {e}")))?;

        let mode = Mode::from_str(&request.mode)
            .map_err(|e| self.invalid(&fingerprint, e.to_string()))?;

        if request.context_summaries.len() > self.max_summaries {
            return Err(self.invalid(
                &fingerprint,
                format!("Too many context summaries (max {})", self.max_summaries),
            ));
        }

        let message = sanitize(&request.message);
        if message.is_empty() {
            return Err(self.invalid(&fingerprint, "Message must not be empty".into()));
        }
        let max_chars = self.classifier.max_message_chars;
        let length = message.chars().count();
        if length > max_chars {
            return Err(self.invalid(
                &fingerprint,
                format!("Message is too long ({length} characters, max {max_chars})"),
            ));
        }

        let suspicion = classify_suspicious(&message, &self.classifier);
        if let Some(reason) = suspicion.reason.filter(|_| suspicion.is_suspicious) {
            self.log
                .emit(SecurityEventKind::SuspiciousContent, fingerprint.as_str(), &reason);
            return Err(PipelineError::Rejected(reason));
        }

        let bot = self
            .bots
            .classify(&fingerprint, signals, &message, self.clock.now_ms());
        if let Some(reason) = bot.reason.filter(|_| bot.is_bot) {
            self.log
                .emit(SecurityEventKind::BotDetected, fingerprint.as_str(), &reason);
            self.gate.punish_bot(&fingerprint).await;
            return Err(PipelineError::Rejected(reason));
        }

        let summaries = request
            .context_summaries
            .into_iter()
            .map(|s| ContextSummary::new(s.kind, sanitize(&s.content)))
            .filter(|s| !s.content.is_empty())
            .collect();

        let history = request
            .recent_history
            .into_iter()
            .filter_map(|turn| {
                let content: String = sanitize(&turn.content).chars().take(max_chars).collect();
                if content.is_empty() {
                    return None;
                }
                Some(match turn.role {
                    HistoryRole::User => Message::user(content),
                    HistoryRole::Assistant => Message::assistant(content),
                })
            })
            .collect();

        let intent = request
            .intent
            .map(|i| sanitize(&i).chars().take(MAX_INTENT_CHARS).collect::<String>())
            .filter(|i| !i.is_empty());

        Ok(Screened {
            emotional_state: EmotionalState::detect(&message),
            fingerprint,
            mode,
            message,
            summaries,
            history,
            intent,
        })
    }

    async fn retrieve(&self, screened: &Screened) -> Retrieval {
        let mut query = RetrievalQuery::new(&screened.message, screened.mode);
        if let Some(lead) = ContextSummary::by_priority(&screened.summaries).next() {
            query = query.with_context_hint(&lead.content);
        }
        self.retriever
            .retrieve(&query, screened.fingerprint.as_str())
            .await
    }

    fn fuse(&self, screened: &Screened, retrieval: &Retrieval) -> FusedPrompt {
        self.prompts.build(&PromptInput {
            base_instructions: &self.base_instructions,
            intent: screened.intent.as_deref(),
            summaries: &screened.summaries,
            chunks: &retrieval.chunks,
            history: &screened.history,
            user_message: &screened.message,
        })
    }

    async fn generate(
        &self,
        fingerprint: &Fingerprint,
        prompt: &FusedPrompt,
        deadline: Instant,
    ) -> Result<String, PipelineError> {
        let request = ProviderRequest {
            model: self.generation.model.clone(),
            messages: prompt.to_messages(),
            temperature: self.generation.temperature,
            max_tokens: Some(self.generation.max_tokens),
            stop: vec![],
        };

        let failure = match tokio::time::timeout_at(deadline, self.generator.complete(request)).await
        {
            Ok(Ok(response)) if !response.message.content.trim().is_empty() => {
                return Ok(response.message.content);
            }
            Ok(Ok(_)) => "empty completion".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(_) => "deadline exceeded before generation finished".to_string(),
        };

        error!(
            fingerprint = fingerprint.short(),
            provider = self.generator.name(),
            error = %failure,
            "Generation failed"
        );
        self.log
            .emit(SecurityEventKind::GenerationFailed, fingerprint.as_str(), &failure);
        Err(PipelineError::Generation(failure))
    }

    fn invalid(&self, fingerprint: &Fingerprint, message: String) -> PipelineError {
        self.log
            .emit(SecurityEventKind::InvalidInput, fingerprint.as_str(), &message);
        PipelineError::Validation(message)
    }
}
