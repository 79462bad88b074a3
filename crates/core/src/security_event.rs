//! Security events: the append-only record of every gate decision.
//!
//! The pipeline produces these; consumers (alerting, audit storage) attach
//! through [`SecurityEventSink`] and never feed anything back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How risky the recorded decision is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Which gate or stage produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    /// Request passed the admission gate
    Admitted,
    /// Body exceeded the byte ceiling
    PayloadTooLarge,
    /// Caller is inside an active cooldown
    CooldownActive,
    /// Fixed-window limit exhausted
    RateLimited,
    /// Malformed body, unknown mode, or empty message
    InvalidInput,
    /// Content matched an abuse heuristic
    SuspiciousContent,
    /// Caller behaves like automation
    BotDetected,
    /// Retrieval fell back to context-free generation
    RetrievalDegraded,
    /// Safety filter rejected the completion
    UnsafeOutput,
    /// Generation provider failed or timed out
    GenerationFailed,
    /// Delivery hit the wall-clock deadline
    StreamTimedOut,
}

impl SecurityEventKind {
    /// Severity used when the caller does not choose one explicitly.
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::Admitted
            | Self::CooldownActive
            | Self::InvalidInput
            | Self::RetrievalDegraded
            | Self::StreamTimedOut => Severity::Low,
            Self::PayloadTooLarge
            | Self::RateLimited
            | Self::SuspiciousContent
            | Self::GenerationFailed => Severity::Medium,
            Self::BotDetected | Self::UnsafeOutput => Severity::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admitted => "admitted",
            Self::PayloadTooLarge => "payload_too_large",
            Self::CooldownActive => "cooldown_active",
            Self::RateLimited => "rate_limited",
            Self::InvalidInput => "invalid_input",
            Self::SuspiciousContent => "suspicious_content",
            Self::BotDetected => "bot_detected",
            Self::RetrievalDegraded => "retrieval_degraded",
            Self::UnsafeOutput => "unsafe_output",
            Self::GenerationFailed => "generation_failed",
            Self::StreamTimedOut => "stream_timed_out",
        }
    }
}

/// A single recorded gate decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub severity: Severity,
    /// Caller fingerprint (opaque, non-reversible)
    pub fingerprint: String,
    /// Internal detail; never shown to the caller
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    /// Build an event at the kind's default severity.
    pub fn new(kind: SecurityEventKind, fingerprint: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            fingerprint: fingerprint.into(),
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Write-only destination for security events.
pub trait SecurityEventSink: Send + Sync {
    fn record(&self, event: &SecurityEvent);
}
