//! The degrading retriever.
//!
//! Retrieval enriches a prompt but is never required for one: when it is
//! switched off, or the embedder or store fails or runs past its budget,
//! [`Retriever::retrieve`] returns an empty, `degraded` result and the
//! pipeline carries on without knowledge context.

use auspex_core::embedding::Embedder;
use auspex_core::knowledge::{ChunkFilter, Mode, ScoredChunk, VectorStore};
use auspex_core::security_event::SecurityEventKind;
use auspex_security::SecurityLog;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The context hint is truncated to this many characters before embedding.
pub const CONTEXT_HINT_MAX_CHARS: usize = 500;

/// What to look up.
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    /// The sanitized user message
    pub text: String,
    /// Optional short summary appended to the embedded text
    pub context_hint: Option<String>,
    pub mode: Mode,
    /// Overrides the retriever default when set
    pub top_k: Option<usize>,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>, mode: Mode) -> Self {
        Self {
            text: text.into(),
            context_hint: None,
            mode,
            top_k: None,
        }
    }

    pub fn with_context_hint(mut self, hint: impl Into<String>) -> Self {
        self.context_hint = Some(hint.into());
        self
    }

    /// Text that is actually sent to the embedder.
    pub fn embedding_text(&self) -> String {
        match self.context_hint.as_deref().map(str::trim) {
            Some(hint) if !hint.is_empty() => {
                let hint: String = hint.chars().take(CONTEXT_HINT_MAX_CHARS).collect();
                format!("{}\n{}", self.text, hint)
            }
            _ => self.text.clone(),
        }
    }
}

/// Chunks found for a query, or an empty degraded result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Retrieval {
    pub chunks: Vec<ScoredChunk>,
    pub degraded: bool,
}

impl Retrieval {
    pub fn degraded() -> Self {
        Self {
            chunks: Vec::new(),
            degraded: true,
        }
    }
}

/// Embeds a query and runs a mode-filtered similarity search.
pub struct Retriever {
    embedder: Option<Arc<dyn Embedder>>,
    store: Arc<dyn VectorStore>,
    log: Arc<SecurityLog>,
    enabled: bool,
    top_k: usize,
    timeout: Duration,
}

impl Retriever {
    pub fn new(
        embedder: Option<Arc<dyn Embedder>>,
        store: Arc<dyn VectorStore>,
        log: Arc<SecurityLog>,
        enabled: bool,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            log,
            enabled,
            top_k: top_k.max(1),
            timeout: Duration::from_secs(10),
        }
    }

    /// Bound the whole embed + query round trip.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.embedder.is_some()
    }

    /// Look up knowledge for `query`. Never fails.
    pub async fn retrieve(&self, query: &RetrievalQuery, fingerprint: &str) -> Retrieval {
        if !self.enabled {
            return self.degrade(fingerprint, "retrieval disabled");
        }
        let Some(embedder) = self.embedder.as_ref() else {
            return self.degrade(fingerprint, "no embedder configured");
        };

        let top_k = query.top_k.unwrap_or(self.top_k).max(1);
        let filter = ChunkFilter::new(query.mode);
        let text = query.embedding_text();

        let lookup = async {
            let embedding = embedder
                .embed(&text)
                .await
                .map_err(|e| format!("embedder '{}' failed: {e}", embedder.name()))?;
            self.store
                .query(&embedding, &filter, top_k)
                .await
                .map_err(|e| format!("store '{}' failed: {e}", self.store.name()))
        };

        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(chunks)) => {
                debug!(
                    mode = %query.mode,
                    hits = chunks.len(),
                    top_k,
                    "Retrieved knowledge chunks"
                );
                Retrieval {
                    chunks,
                    degraded: false,
                }
            }
            Ok(Err(reason)) => self.degrade(fingerprint, &reason),
            Err(_) => self.degrade(
                fingerprint,
                &format!("timed out after {}ms", self.timeout.as_millis()),
            ),
        }
    }

    fn degrade(&self, fingerprint: &str, reason: &str) -> Retrieval {
        warn!(reason, "Retrieval degraded; continuing without knowledge context");
        self.log
            .emit(SecurityEventKind::RetrievalDegraded, fingerprint, reason);
        Retrieval::degraded()
    }
}
