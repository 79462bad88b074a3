//! Abuse classification: content heuristics and per-caller behaviour.
//!
//! Both classifiers only ever see sanitized text. A positive result stops
//! the request before retrieval or generation; the reason is for the
//! security log, never for the caller.

use crate::fingerprint::{automation_marker, Fingerprint, RequestSignals};
use auspex_config::ClassifierConfig;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, RwLock};

/// Per-request abuse verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbuseSignal {
    pub is_bot: bool,
    pub is_suspicious: bool,
    /// Internal explanation; logged, not disclosed
    pub reason: Option<String>,
}

impl AbuseSignal {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn suspicious(reason: impl Into<String>) -> Self {
        Self {
            is_suspicious: true,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn bot(reason: impl Into<String>) -> Self {
        Self {
            is_bot: true,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn is_positive(&self) -> bool {
        self.is_bot || self.is_suspicious
    }
}

const INJECTION_MARKERS: &[&str] = &[
    "ignore previous instructions",
    "ignore all previous",
    "ignore the above",
    "disregard previous",
    "disregard your instructions",
    "forget your instructions",
    "reveal your system prompt",
    "system prompt",
    "you are now dan",
    "developer mode",
    "jailbreak",
    "<|im_start|>",
    "<|im_end|>",
    "<|endoftext|>",
    "[inst]",
    "[/inst]",
    "<<sys>>",
    "### instruction",
    "union select",
    "drop table",
    "; --",
    "' or '1'='1",
    "{{",
    "${",
];

/// Longest run of one repeated non-whitespace character.
fn longest_run(text: &str) -> usize {
    let mut best = 0;
    let mut run = 0;
    let mut prev: Option<char> = None;
    for c in text.chars() {
        if c.is_whitespace() {
            prev = None;
            run = 0;
            continue;
        }
        if Some(c) == prev {
            run += 1;
        } else {
            prev = Some(c);
            run = 1;
        }
        best = best.max(run);
    }
    best
}

fn count_links(lower: &str) -> usize {
    lower.matches("http://").count() + lower.matches("https://").count() + lower.matches("www.").count()
}

/// Share of characters that belong in ordinary prose.
fn prose_ratio(text: &str) -> f32 {
    let total = text.chars().count();
    if total == 0 {
        return 1.0;
    }
    let prose = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || ".,?!'\"-:;/()".contains(*c))
        .count();
    prose as f32 / total as f32
}

/// Content-only heuristics over sanitized text.
pub fn classify_suspicious(clean: &str, config: &ClassifierConfig) -> AbuseSignal {
    let run = longest_run(clean);
    if run >= config.flood_run_len {
        return AbuseSignal::suspicious(format!("character flooding (run of {run})"));
    }

    let lower = clean.to_lowercase();
    if let Some(marker) = INJECTION_MARKERS.iter().find(|m| lower.contains(*m)) {
        return AbuseSignal::suspicious(format!("injection marker '{marker}'"));
    }

    let links = count_links(&lower);
    if links > config.max_links {
        return AbuseSignal::suspicious(format!("{links} links"));
    }

    if clean.chars().count() >= 20 && prose_ratio(clean) < 0.5 {
        return AbuseSignal::suspicious("symbol-dominated text");
    }

    AbuseSignal::clean()
}

const MAX_HISTORY: usize = 64;

#[derive(Debug, Default)]
struct History {
    requests: VecDeque<u64>,
    messages: VecDeque<(u64, u64)>,
    last_seen_ms: u64,
}

fn message_hash(clean: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    clean.trim().to_lowercase().hash(&mut hasher);
    hasher.finish()
}

/// Behavioural bot detection keyed by fingerprint.
#[derive(Debug)]
pub struct BotDetector {
    config: ClassifierConfig,
    history: RwLock<HashMap<String, Arc<Mutex<History>>>>,
    max_keys: usize,
}

impl BotDetector {
    pub fn new(config: ClassifierConfig, max_keys: usize) -> Self {
        Self {
            config,
            history: RwLock::new(HashMap::new()),
            max_keys,
        }
    }

    fn entry(&self, key: &str, now_ms: u64) -> Arc<Mutex<History>> {
        if let Some(entry) = self
            .history
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
        {
            return entry.clone();
        }

        let mut map = self.history.write().unwrap_or_else(|e| e.into_inner());
        if map.len() >= self.max_keys && !map.contains_key(key) {
            let horizon = self.config.history_window_ms.max(self.config.burst_window_ms);
            map.retain(|_, h| match h.try_lock() {
                Ok(h) => now_ms.saturating_sub(h.last_seen_ms) < horizon,
                Err(_) => true,
            });
        }
        map.entry(key.to_string()).or_default().clone()
    }

    /// Record this request and classify the caller.
    pub fn classify(
        &self,
        fingerprint: &Fingerprint,
        signals: &RequestSignals,
        clean: &str,
        now_ms: u64,
    ) -> AbuseSignal {
        let entry = self.entry(fingerprint.as_str(), now_ms);
        let mut history = entry.lock().unwrap_or_else(|e| e.into_inner());
        history.last_seen_ms = now_ms;

        let burst_window = self.config.burst_window_ms;
        history
            .requests
            .retain(|&t| now_ms.saturating_sub(t) < burst_window);
        history.requests.push_back(now_ms);
        if history.requests.len() > MAX_HISTORY {
            history.requests.pop_front();
        }

        let history_window = self.config.history_window_ms;
        let hash = message_hash(clean);
        history
            .messages
            .retain(|&(t, _)| now_ms.saturating_sub(t) < history_window);
        history.messages.push_back((now_ms, hash));
        if history.messages.len() > MAX_HISTORY {
            history.messages.pop_front();
        }

        if self.config.block_automation_agents {
            if let Some(marker) = automation_marker(signals) {
                return AbuseSignal::bot(format!("automation user-agent ({marker})"));
            }
        }

        let burst = history.requests.len();
        if burst >= self.config.burst_threshold {
            return AbuseSignal::bot(format!(
                "{burst} requests within {}ms",
                self.config.burst_window_ms
            ));
        }

        let repeats = history.messages.iter().filter(|(_, h)| *h == hash).count();
        if repeats >= self.config.repeat_threshold {
            return AbuseSignal::bot(format!("identical message x{repeats}"));
        }

        AbuseSignal::clean()
    }

    /// Number of callers with recorded history.
    pub fn tracked(&self) -> usize {
        self.history.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
