//! Knowledge chunks and the vector store trait.
//!
//! Chunks are produced offline by ingestion, are immutable afterwards, and
//! are retrieved by cosine similarity under a [`Mode`] filter. A chunk
//! belongs to exactly one mode.

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Document-type tag applied to every chunk that is eligible for retrieval.
pub const KNOWLEDGE_DOC_TYPE: &str = "knowledge_base";

/// Topic category that scopes retrieval.
///
/// A closed set: an unrecognised mode is a parse error, never a silent
/// fallback to [`Mode::General`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    General,
    Career,
    Relationship,
    Health,
    Finance,
    Remedy,
    Nakshatra,
    Dasha,
    Compatibility,
}

impl Mode {
    /// Every mode, in declaration order.
    pub const ALL: [Mode; 9] = [
        Mode::General,
        Mode::Career,
        Mode::Relationship,
        Mode::Health,
        Mode::Finance,
        Mode::Remedy,
        Mode::Nakshatra,
        Mode::Dasha,
        Mode::Compatibility,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::General => "general",
            Mode::Career => "career",
            Mode::Relationship => "relationship",
            Mode::Health => "health",
            Mode::Finance => "finance",
            Mode::Remedy => "remedy",
            Mode::Nakshatra => "nakshatra",
            Mode::Dasha => "dasha",
            Mode::Compatibility => "compatibility",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a mode string is not one of [`Mode::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown mode '{0}'")]
pub struct UnknownMode(pub String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| UnknownMode(s.to_string()))
    }
}

/// A unit of retrievable knowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    /// Stable identifier
    pub id: String,

    /// Optional heading shown alongside the content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// The chunk text
    pub content: String,

    /// Where the chunk came from (book, article, URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Topic the chunk belongs to
    pub mode: Mode,

    /// Document-type tag (see [`KNOWLEDGE_DOC_TYPE`])
    #[serde(default = "default_doc_type")]
    pub doc_type: String,

    /// Embedding computed at ingestion time
    #[serde(default, skip_serializing)]
    pub embedding: Vec<f32>,
}

fn default_doc_type() -> String {
    KNOWLEDGE_DOC_TYPE.into()
}

impl KnowledgeChunk {
    /// Label used when the chunk is rendered into a prompt.
    pub fn label(&self) -> &str {
        self.title
            .as_deref()
            .or(self.source.as_deref())
            .unwrap_or(&self.id)
    }
}

/// A chunk paired with its similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: KnowledgeChunk,
    pub score: f32,
}

/// Metadata filter applied to every similarity query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFilter {
    pub mode: Mode,
    pub doc_type: String,
}

impl ChunkFilter {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            doc_type: KNOWLEDGE_DOC_TYPE.into(),
        }
    }

    pub fn matches(&self, chunk: &KnowledgeChunk) -> bool {
        chunk.mode == self.mode && chunk.doc_type == self.doc_type
    }
}

/// Nearest-neighbour search over embedded knowledge chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    /// Return at most `top_k` chunks matching `filter`, highest score first.
    async fn query(
        &self,
        embedding: &[f32],
        filter: &ChunkFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    /// Insert a chunk, replacing any chunk with the same id.
    async fn upsert(&self, chunk: KnowledgeChunk) -> Result<(), StoreError>;

    /// Number of stored chunks.
    async fn count(&self) -> Result<usize, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(mode: Mode) -> KnowledgeChunk {
        KnowledgeChunk {
            id: "c1".into(),
            title: None,
            content: "Venus governs partnership.".into(),
            source: Some("Brihat Samhita".into()),
            mode,
            doc_type: KNOWLEDGE_DOC_TYPE.into(),
            embedding: vec![],
        }
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Compatibility".parse::<Mode>().unwrap(), Mode::Compatibility);
        assert_eq!(" dasha ".parse::<Mode>().unwrap(), Mode::Dasha);
    }

    #[test]
    fn unknown_mode_is_rejected_not_coerced() {
        let err = "astrology".parse::<Mode>().unwrap_err();
        assert_eq!(err, UnknownMode("astrology".into()));
    }

    #[test]
    fn every_mode_round_trips_through_its_name() {
        for mode in Mode::ALL {
            assert_eq!(mode.as_str().parse::<Mode>().unwrap(), mode);
        }
    }

    #[test]
    fn serde_rejects_unknown_mode() {
        assert!(serde_json::from_str::<Mode>(r#""tarot""#).is_err());
        assert_eq!(
            serde_json::from_str::<Mode>(r#""remedy""#).unwrap(),
            Mode::Remedy
        );
    }

    #[test]
    fn filter_matches_mode_and_doc_type() {
        let filter = ChunkFilter::new(Mode::Relationship);
        assert!(filter.matches(&chunk(Mode::Relationship)));
        assert!(!filter.matches(&chunk(Mode::Career)));

        let mut other_type = chunk(Mode::Relationship);
        other_type.doc_type = "user_note".into();
        assert!(!filter.matches(&other_type));
    }

    #[test]
    fn label_prefers_title_then_source() {
        let mut c = chunk(Mode::General);
        assert_eq!(c.label(), "Brihat Samhita");
        c.title = Some("Seventh house".into());
        assert_eq!(c.label(), "Seventh house");
        c.title = None;
        c.source = None;
        assert_eq!(c.label(), "c1");
    }

    #[test]
    fn embedding_is_not_serialized() {
        let mut c = chunk(Mode::General);
        c.embedding = vec![0.1, 0.2];
        let json = serde_json::to_string(&c).unwrap();
        assert!(!json.contains("embedding"));
    }
}
