//! Knowledge retrieval for Auspex.
//!
//! Stores hold pre-embedded [`KnowledgeChunk`](auspex_core::knowledge::KnowledgeChunk)s;
//! the [`Retriever`] embeds a query, filters by mode and degrades to an
//! empty result instead of failing.

pub mod in_memory;
pub mod ingest;
pub mod retriever;
pub mod vector;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryVectorStore;
pub use ingest::{IngestReport, ingest_jsonl};
pub use retriever::{CONTEXT_HINT_MAX_CHARS, Retrieval, RetrievalQuery, Retriever};
pub use vector::{cosine_similarity, rank_chunks};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteVectorStore;
