//! In-memory vector store for tests and ephemeral deployments.

use crate::vector::rank_chunks;
use async_trait::async_trait;
use auspex_core::error::StoreError;
use auspex_core::knowledge::{ChunkFilter, KnowledgeChunk, ScoredChunk, VectorStore};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keeps every chunk in a `Vec`; queries are a linear scan.
pub struct InMemoryVectorStore {
    chunks: Arc<RwLock<Vec<KnowledgeChunk>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            chunks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Build a store pre-populated with chunks.
    pub fn with_chunks(chunks: Vec<KnowledgeChunk>) -> Self {
        Self {
            chunks: Arc::new(RwLock::new(chunks)),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn query(
        &self,
        embedding: &[f32],
        filter: &ChunkFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let chunks = self.chunks.read().await;
        Ok(rank_chunks(chunks.iter(), embedding, filter, top_k))
    }

    async fn upsert(&self, chunk: KnowledgeChunk) -> Result<(), StoreError> {
        let mut chunks = self.chunks.write().await;
        match chunks.iter_mut().find(|c| c.id == chunk.id) {
            Some(existing) => *existing = chunk,
            None => chunks.push(chunk),
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.chunks.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auspex_core::knowledge::{KNOWLEDGE_DOC_TYPE, Mode};

    fn chunk(id: &str, mode: Mode, embedding: Vec<f32>) -> KnowledgeChunk {
        KnowledgeChunk {
            id: id.into(),
            title: None,
            content: format!("About {id}"),
            source: None,
            mode,
            doc_type: KNOWLEDGE_DOC_TYPE.into(),
            embedding,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = InMemoryVectorStore::new();
        store.upsert(chunk("a", Mode::Health, vec![1.0, 0.0])).await.unwrap();
        store.upsert(chunk("a", Mode::Health, vec![0.0, 1.0])).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        let hits = store
            .query(&[0.0, 1.0], &ChunkFilter::new(Mode::Health), 5)
            .await
            .unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn query_applies_mode_filter() {
        let store = InMemoryVectorStore::with_chunks(vec![
            chunk("d1", Mode::Dasha, vec![1.0, 0.0]),
            chunk("f1", Mode::Finance, vec![1.0, 0.0]),
        ]);
        let hits = store
            .query(&[1.0, 0.0], &ChunkFilter::new(Mode::Dasha), 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "d1");
    }

    #[tokio::test]
    async fn empty_store_returns_nothing() {
        let store = InMemoryVectorStore::default();
        let hits = store
            .query(&[1.0], &ChunkFilter::new(Mode::General), 5)
            .await
            .unwrap();
        assert!(hits.is_empty());
        assert_eq!(store.name(), "in_memory");
    }
}
