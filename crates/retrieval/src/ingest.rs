//! Offline knowledge ingestion from JSON Lines.
//!
//! Each line is one chunk:
//!
//! ```json
//! {"id": "venus-7th", "title": "Venus in the 7th", "content": "...", "source": "BPHS", "mode": "compatibility"}
//! ```
//!
//! `id`, `title`, `source` and `doc_type` are optional. Malformed lines,
//! unknown modes and empty content are skipped and reported; embedder or
//! store failures abort the run.

use auspex_core::embedding::Embedder;
use auspex_core::error::{Error, Result};
use auspex_core::knowledge::{KNOWLEDGE_DOC_TYPE, KnowledgeChunk, Mode, VectorStore};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct ChunkRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    content: String,
    #[serde(default)]
    source: Option<String>,
    mode: String,
    #[serde(default)]
    doc_type: Option<String>,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub ingested: usize,
    pub skipped: usize,
    /// `line N: reason` for every skipped line
    pub errors: Vec<String>,
}

fn parse_line(line: &str) -> std::result::Result<KnowledgeChunk, String> {
    let record: ChunkRecord =
        serde_json::from_str(line).map_err(|e| format!("invalid JSON: {e}"))?;
    let mode = Mode::from_str(&record.mode).map_err(|e| e.to_string())?;
    let content = record.content.trim();
    if content.is_empty() {
        return Err("empty content".into());
    }

    Ok(KnowledgeChunk {
        id: record
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        title: record.title,
        content: content.to_string(),
        source: record.source,
        mode,
        doc_type: record
            .doc_type
            .unwrap_or_else(|| KNOWLEDGE_DOC_TYPE.to_string()),
        embedding: Vec::new(),
    })
}

/// Embed and upsert every chunk in a JSONL file.
pub async fn ingest_jsonl(
    path: &Path,
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
) -> Result<IngestReport> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Internal(format!("Cannot read {}: {e}", path.display())))?;

    let mut report = IngestReport::default();

    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut chunk = match parse_line(line) {
            Ok(chunk) => chunk,
            Err(reason) => {
                warn!(line = index + 1, %reason, "Skipping knowledge line");
                report.skipped += 1;
                report.errors.push(format!("line {}: {reason}", index + 1));
                continue;
            }
        };

        let text = match &chunk.title {
            Some(title) => format!("{title}\n{}", chunk.content),
            None => chunk.content.clone(),
        };
        chunk.embedding = embedder.embed(&text).await?;
        store.upsert(chunk).await?;
        report.ingested += 1;
    }

    info!(
        ingested = report.ingested,
        skipped = report.skipped,
        store = store.name(),
        embedder = embedder.name(),
        "Knowledge ingestion finished"
    );
    Ok(report)
}
