//! The Auspex guidance pipeline.
//!
//! Turns one admitted request into one delivered answer:
//! admission → validation → sanitization → classification → retrieval →
//! prompt fusion → generation → safety filter → paced delivery.

pub mod delivery;
pub mod orchestrator;
pub mod prompt;
pub mod safety;
pub mod token;

pub use delivery::{
    DeliveryEvent, DeliveryOutcome, DeliveryState, DeliveryStatus, StreamDelivery, chunk_text,
};
pub use orchestrator::{
    GENERATION_APOLOGY, GuidancePipeline, GuidanceRequest, HistoryRole, HistoryTurn, PipelineDeps,
    PipelineError, PreparedAnswer, PreviewChunk, PromptPreview, REJECTED_MESSAGE,
};
pub use prompt::{ContextSummary, FusedPrompt, PromptBuilder, PromptInput, SummaryKind};
pub use safety::{EmotionalState, FALLBACK_MESSAGE, SafetyFilter, SafetyVerdict};
