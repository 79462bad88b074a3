//! Embedder trait: turns text into a fixed-length numeric vector.
//!
//! Backends are selected once from configuration; the retriever only ever
//! sees `Arc<dyn Embedder>`.

use crate::error::EmbeddingError;
use async_trait::async_trait;

/// A text-embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Short backend name used in logs (e.g., "openai", "hashing").
    fn name(&self) -> &str;

    /// Length of every vector this embedder returns.
    fn dimensions(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed several texts. The default calls [`Embedder::embed`] sequentially.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}
