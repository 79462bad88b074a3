//! Security event log: append-only record of every gate decision.
//!
//! Keeps a bounded in-memory tail for inspection and forwards each event to
//! any number of sinks (tracing, alerting, external audit storage).

use auspex_core::{SecurityEvent, SecurityEventKind, SecurityEventSink, Severity};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// In-memory security log with pluggable sinks.
pub struct SecurityLog {
    entries: Mutex<VecDeque<SecurityEvent>>,
    counts: Mutex<HashMap<SecurityEventKind, u64>>,
    capacity: usize,
    sinks: Vec<Box<dyn SecurityEventSink>>,
}

impl std::fmt::Debug for SecurityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityLog")
            .field("entry_count", &self.len())
            .field("capacity", &self.capacity)
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for SecurityLog {
    fn default() -> Self {
        Self::new(1_000)
    }
}

impl SecurityLog {
    /// Create a log that retains at most `capacity` events and has no sinks.
    pub fn new(capacity: usize) -> Self {
        Self::with_sinks(capacity, Vec::new())
    }

    pub fn with_sinks(capacity: usize, sinks: Vec<Box<dyn SecurityEventSink>>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            counts: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            sinks,
        }
    }

    /// Build from config: retained tail size and optional tracing sink.
    pub fn from_config(config: &auspex_config::SecurityLogConfig) -> Self {
        let mut sinks: Vec<Box<dyn SecurityEventSink>> = Vec::new();
        if config.trace {
            sinks.push(Box::new(TracingSink));
        }
        Self::with_sinks(config.capacity, sinks)
    }

    /// Record an event at its kind's default severity.
    pub fn emit(
        &self,
        kind: SecurityEventKind,
        fingerprint: &str,
        detail: impl Into<String>,
    ) -> SecurityEvent {
        let event = SecurityEvent::new(kind, fingerprint, detail);
        self.append(event.clone());
        event
    }

    /// Record a fully built event.
    pub fn append(&self, event: SecurityEvent) {
        for sink in &self.sinks {
            sink.record(&event);
        }

        *self
            .counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event.kind)
            .or_insert(0) += 1;

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(event);
    }

    /// Retained events, oldest first.
    pub fn entries(&self) -> Vec<SecurityEvent> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn entries_by_kind(&self, kind: SecurityEventKind) -> Vec<SecurityEvent> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Events of `kind` ever recorded, including ones rotated out of the tail.
    pub fn total(&self, kind: SecurityEventKind) -> u64 {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.counts.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl SecurityEventSink for SecurityLog {
    fn record(&self, event: &SecurityEvent) {
        self.append(event.clone());
    }
}

/// Forwards events to `tracing`, level chosen by severity.
pub struct TracingSink;

impl SecurityEventSink for TracingSink {
    fn record(&self, event: &SecurityEvent) {
        let fp = &event.fingerprint[..event.fingerprint.len().min(12)];
        match event.severity {
            Severity::Low => tracing::info!(
                kind = event.kind.as_str(),
                fingerprint = fp,
                detail = %event.detail,
                "SECURITY"
            ),
            Severity::Medium => tracing::warn!(
                kind = event.kind.as_str(),
                fingerprint = fp,
                detail = %event.detail,
                "SECURITY"
            ),
            Severity::High => tracing::error!(
                kind = event.kind.as_str(),
                fingerprint = fp,
                detail = %event.detail,
                "SECURITY"
            ),
        }
    }
}
