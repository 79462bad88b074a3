//! Admission gate: payload ceiling, cooldown, then fixed-window rate limit.
//!
//! The checks run cheapest first. A caller in cooldown is turned away before
//! the rate limiter is touched, so an abusive burst does not also burn
//! window budget. Windows are fixed, not sliding: a caller can land `limit`
//! requests at the end of one window and `limit` more at the start of the
//! next. That double burst is an accepted limitation.

use crate::fingerprint::Fingerprint;
use crate::log::SecurityLog;
use crate::throttle::{Clock, ThrottleStore};
use auspex_config::{AdmissionConfig, RateLimitRule};
use auspex_core::SecurityEventKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Endpoint class; each has its own window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Guidance,
    Preview,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Guidance => "guidance",
            Scope::Preview => "preview",
        }
    }
}

/// Which admission check turned the request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionReason {
    PayloadTooLarge,
    CooldownActive,
    RateLimited,
}

impl AdmissionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PayloadTooLarge => "payload_too_large",
            Self::CooldownActive => "cooldown_active",
            Self::RateLimited => "rate_limited",
        }
    }
}

impl std::fmt::Display for AdmissionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub retry_after_ms: Option<u64>,
    pub reason: Option<AdmissionReason>,
}

impl AdmissionDecision {
    fn admit() -> Self {
        Self {
            allowed: true,
            retry_after_ms: None,
            reason: None,
        }
    }

    fn reject(reason: AdmissionReason, retry_after_ms: Option<u64>) -> Self {
        Self {
            allowed: false,
            retry_after_ms,
            reason: Some(reason),
        }
    }
}

/// The first gate every request passes through.
pub struct AdmissionGate {
    config: AdmissionConfig,
    store: Arc<dyn ThrottleStore>,
    clock: Arc<dyn Clock>,
    log: Arc<SecurityLog>,
}

impl AdmissionGate {
    pub fn new(
        config: AdmissionConfig,
        store: Arc<dyn ThrottleStore>,
        clock: Arc<dyn Clock>,
        log: Arc<SecurityLog>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            log,
        }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.config.max_body_bytes
    }

    fn rule(&self, scope: Scope) -> RateLimitRule {
        match scope {
            Scope::Guidance => self.config.guidance,
            Scope::Preview => self.config.preview,
        }
    }

    /// Decide whether a request may proceed. Every outcome is logged.
    pub async fn admit(
        &self,
        fingerprint: &Fingerprint,
        scope: Scope,
        payload_size: usize,
    ) -> AdmissionDecision {
        let fp = fingerprint.as_str();

        if payload_size > self.config.max_body_bytes {
            self.log.emit(
                SecurityEventKind::PayloadTooLarge,
                fp,
                format!(
                    "{payload_size} bytes > {} on {}",
                    self.config.max_body_bytes,
                    scope.as_str()
                ),
            );
            return AdmissionDecision::reject(AdmissionReason::PayloadTooLarge, None);
        }

        let now = self.clock.now_ms();

        if let Some(until) = self.store.cooldown_until(fp, now).await {
            let remaining = until - now;
            self.log.emit(
                SecurityEventKind::CooldownActive,
                fp,
                format!("{remaining}ms remaining on {}", scope.as_str()),
            );
            return AdmissionDecision::reject(AdmissionReason::CooldownActive, Some(remaining));
        }

        let rule = self.rule(scope);
        let key = format!("{fp}:{}", scope.as_str());
        let window = self
            .store
            .increment_and_check(&key, rule.limit, rule.window_ms, now)
            .await;

        if !window.allowed {
            let cooldown_until = now + self.config.cooldown_ms;
            self.store.extend_cooldown(fp, cooldown_until, now).await;
            self.log.emit(
                SecurityEventKind::RateLimited,
                fp,
                format!(
                    "{}/{} in {}ms window on {}",
                    window.count + 1,
                    rule.limit,
                    rule.window_ms,
                    scope.as_str()
                ),
            );
            let retry = window.retry_after_ms.max(self.config.cooldown_ms);
            return AdmissionDecision::reject(AdmissionReason::RateLimited, Some(retry));
        }

        if self.config.pacing_cooldown_ms > 0 {
            self.store
                .extend_cooldown(fp, now + self.config.pacing_cooldown_ms, now)
                .await;
        }

        self.log.emit(
            SecurityEventKind::Admitted,
            fp,
            format!("{}/{} on {}", window.count, rule.limit, scope.as_str()),
        );
        AdmissionDecision::admit()
    }

    /// Impose the extended bot cooldown on a caller.
    pub async fn punish_bot(&self, fingerprint: &Fingerprint) {
        let now = self.clock.now_ms();
        self.store
            .extend_cooldown(fingerprint.as_str(), now + self.config.bot_cooldown_ms, now)
            .await;
        tracing::debug!(
            fingerprint = fingerprint.short(),
            cooldown_ms = self.config.bot_cooldown_ms,
            "Bot cooldown applied"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::{InMemoryThrottleStore, ManualClock};
    use auspex_core::Severity;

    struct Harness {
        gate: AdmissionGate,
        clock: Arc<ManualClock>,
        log: Arc<SecurityLog>,
    }

    fn harness(limit: u32) -> Harness {
        let config = AdmissionConfig {
            max_body_bytes: 1_000,
            cooldown_ms: 5_000,
            bot_cooldown_ms: 900_000,
            guidance: RateLimitRule {
                limit,
                window_ms: 60_000,
            },
            ..Default::default()
        };
        let clock = Arc::new(ManualClock::new(1_000_000));
        let log = Arc::new(SecurityLog::new(100));
        let gate = AdmissionGate::new(
            config,
            Arc::new(InMemoryThrottleStore::default()),
            clock.clone(),
            log.clone(),
        );
        Harness { gate, clock, log }
    }

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::from(s)
    }

    #[tokio::test]
    async fn nth_request_admitted_iff_within_limit() {
        let h = harness(3);
        for _ in 0..3 {
            assert!(h.gate.admit(&fp("f"), Scope::Guidance, 10).await.allowed);
        }
        let d = h.gate.admit(&fp("f"), Scope::Guidance, 10).await;
        assert!(!d.allowed);
        assert_eq!(d.reason, Some(AdmissionReason::RateLimited));
        assert!(d.retry_after_ms.unwrap() > 0);
    }

    #[tokio::test]
    async fn cooldown_takes_priority_over_rate_limit() {
        let h = harness(1);
        assert!(h.gate.admit(&fp("f"), Scope::Guidance, 10).await.allowed);
        let limited = h.gate.admit(&fp("f"), Scope::Guidance, 10).await;
        assert_eq!(limited.reason, Some(AdmissionReason::RateLimited));

        // Every further attempt during the cooldown reports cooldown, not rate limit
        for _ in 0..5 {
            h.clock.advance(500);
            let d = h.gate.admit(&fp("f"), Scope::Guidance, 10).await;
            assert_eq!(d.reason, Some(AdmissionReason::CooldownActive));
        }
    }

    #[tokio::test]
    async fn cooldown_rejection_consumes_no_budget() {
        let h = harness(2);
        h.gate.punish_bot(&fp("f")).await;
        for _ in 0..10 {
            let d = h.gate.admit(&fp("f"), Scope::Guidance, 10).await;
            assert_eq!(d.reason, Some(AdmissionReason::CooldownActive));
        }

        h.clock.advance(900_000);
        assert!(h.gate.admit(&fp("f"), Scope::Guidance, 10).await.allowed);
        assert!(h.gate.admit(&fp("f"), Scope::Guidance, 10).await.allowed);
    }

    #[tokio::test]
    async fn cooldown_retry_is_remaining_time() {
        let h = harness(5);
        h.gate.punish_bot(&fp("f")).await;
        h.clock.advance(100_000);
        let d = h.gate.admit(&fp("f"), Scope::Guidance, 10).await;
        assert_eq!(d.retry_after_ms, Some(800_000));
    }

    #[tokio::test]
    async fn oversized_payload_rejected_first() {
        let h = harness(5);
        h.gate.punish_bot(&fp("f")).await;
        let d = h.gate.admit(&fp("f"), Scope::Guidance, 1_001).await;
        assert_eq!(d.reason, Some(AdmissionReason::PayloadTooLarge));
        assert_eq!(d.retry_after_ms, None);
    }

    #[tokio::test]
    async fn scopes_have_separate_windows() {
        let h = harness(1);
        assert!(h.gate.admit(&fp("f"), Scope::Guidance, 10).await.allowed);
        assert!(h.gate.admit(&fp("f"), Scope::Preview, 10).await.allowed);
    }

    #[tokio::test]
    async fn window_reset_after_cooldown_and_window_expire() {
        let h = harness(1);
        assert!(h.gate.admit(&fp("f"), Scope::Guidance, 10).await.allowed);
        assert!(!h.gate.admit(&fp("f"), Scope::Guidance, 10).await.allowed);
        h.clock.advance(60_000);
        assert!(h.gate.admit(&fp("f"), Scope::Guidance, 10).await.allowed);
    }

    #[tokio::test]
    async fn pacing_cooldown_spaces_requests() {
        let mut h = harness(10);
        h.gate.config.pacing_cooldown_ms = 2_000;
        assert!(h.gate.admit(&fp("f"), Scope::Guidance, 10).await.allowed);
        let d = h.gate.admit(&fp("f"), Scope::Guidance, 10).await;
        assert_eq!(d.reason, Some(AdmissionReason::CooldownActive));
        h.clock.advance(2_000);
        assert!(h.gate.admit(&fp("f"), Scope::Guidance, 10).await.allowed);
    }

    #[tokio::test]
    async fn every_decision_is_logged_with_gate_severity() {
        let h = harness(1);
        h.gate.admit(&fp("f"), Scope::Guidance, 10).await;
        h.gate.admit(&fp("f"), Scope::Guidance, 10).await;
        h.gate.admit(&fp("f"), Scope::Guidance, 10).await;
        h.gate.admit(&fp("f"), Scope::Guidance, 5_000).await;

        let kinds: Vec<_> = h.log.entries().iter().map(|e| (e.kind, e.severity)).collect();
        assert_eq!(
            kinds,
            vec![
                (SecurityEventKind::Admitted, Severity::Low),
                (SecurityEventKind::RateLimited, Severity::Medium),
                (SecurityEventKind::CooldownActive, Severity::Low),
                (SecurityEventKind::PayloadTooLarge, Severity::Medium),
            ]
        );
    }

    #[tokio::test]
    async fn callers_do_not_share_state() {
        let h = harness(1);
        assert!(h.gate.admit(&fp("a"), Scope::Guidance, 10).await.allowed);
        assert!(!h.gate.admit(&fp("a"), Scope::Guidance, 10).await.allowed);
        assert!(h.gate.admit(&fp("b"), Scope::Guidance, 10).await.allowed);
    }
}
