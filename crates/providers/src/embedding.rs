//! Embedding backends.
//!
//! - [`OpenAiCompatEmbedder`]: any `/v1/embeddings` endpoint (OpenAI, Ollama, OpenRouter)
//! - [`HashingEmbedder`]: deterministic offline feature hashing, no network

use crate::openai_compat::http_client;
use async_trait::async_trait;
use auspex_core::embedding::Embedder;
use auspex_core::error::EmbeddingError;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

/// Embeddings over an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiCompatEmbedder {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    client: reqwest::Client,
}

impl OpenAiCompatEmbedder {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
            client: http_client(Duration::from_secs(10)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    fn request_body(&self, inputs: &[String]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": inputs,
            "encoding_format": "float",
        });
        // Only the v3 OpenAI models accept a target size
        if self.model.starts_with("text-embedding-3") {
            body["dimensions"] = serde_json::json!(self.dimensions);
        }
        body
    }

    fn check_dimensions(&self, vectors: &[Vec<f32>]) -> Result<(), EmbeddingError> {
        match vectors.iter().find(|v| v.len() != self.dimensions) {
            Some(v) => Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                actual: v.len(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiCompatEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingError::EmptyResponse)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);

        debug!(
            provider = %self.name,
            model = %self.model,
            count = texts.len(),
            "Sending embedding request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(texts))
            .send()
            .await
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_resp: EmbeddingApiResponse =
            response.json().await.map_err(|e| EmbeddingError::ApiError {
                status_code: 200,
                message: format!("Failed to parse embedding response: {e}"),
            })?;

        if api_resp.data.len() != texts.len() {
            return Err(EmbeddingError::EmptyResponse);
        }

        let mut data = api_resp.data;
        data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();
        self.check_dimensions(&vectors)?;
        Ok(vectors)
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Signed feature hashing over word unigrams and bigrams, L2-normalised.
///
/// Stable across processes and platforms (SHA-256 based), so vectors can be
/// stored at ingestion and compared at query time.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&digest[..8]);
        let h = u64::from_le_bytes(bucket);
        let index = (h % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }

    /// Embed synchronously; never fails.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lower = text.to_lowercase();
        let tokens: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        for token in &tokens {
            self.add_feature(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.add_feature(&mut vector, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn hashing_is_deterministic_and_normalised() {
        let e = HashingEmbedder::new(128);
        let a = e.embed("Venus in the seventh house").await.unwrap();
        let b = e.embed("Venus in the seventh house").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 128);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn related_texts_score_higher_than_unrelated() {
        let e = HashingEmbedder::new(256);
        let q = e.embed_text("when will I get married");
        let near = e.embed_text("marriage timing: when people get married in Venus dasha");
        let far = e.embed_text("stock portfolio rebalancing");
        assert!(cosine(&q, &near) > cosine(&q, &far));
    }

    #[test]
    fn empty_text_gives_zero_vector() {
        let e = HashingEmbedder::new(16);
        assert!(e.embed_text("  ...  ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn openai_body_requests_dimensions_for_v3_models() {
        let e = OpenAiCompatEmbedder::new("openai", "https://api.openai.com/v1", "k", "text-embedding-3-small", 384);
        let body = e.request_body(&["hi".into()]);
        assert_eq!(body["dimensions"], 384);
        assert_eq!(body["encoding_format"], "float");

        let e = OpenAiCompatEmbedder::new("ollama", "http://localhost:11434/v1", "", "nomic-embed-text", 768);
        assert!(e.request_body(&["hi".into()]).get("dimensions").is_none());
    }

    #[test]
    fn dimension_mismatch_detected() {
        let e = OpenAiCompatEmbedder::new("x", "http://x", "", "m", 3);
        assert!(e.check_dimensions(&[vec![0.1, 0.2, 0.3]]).is_ok());
        assert!(matches!(
            e.check_dimensions(&[vec![0.1]]),
            Err(EmbeddingError::DimensionMismatch { expected: 3, actual: 1 })
        ));
    }

    #[test]
    fn parse_embedding_response_orders_by_index() {
        let data = r#"{
            "data": [
                {"embedding": [0.4, 0.5], "index": 1},
                {"embedding": [0.1, 0.2], "index": 0}
            ],
            "model": "text-embedding-3-small"
        }"#;
        let mut parsed: EmbeddingApiResponse = serde_json::from_str(data).unwrap();
        parsed.data.sort_by_key(|d| d.index);
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn unreachable_embedder_is_network_error() {
        let e = OpenAiCompatEmbedder::new("dead", "http://127.0.0.1:9", "", "m", 3)
            .with_timeout(Duration::from_secs(2));
        assert!(matches!(
            e.embed("hello").await,
            Err(EmbeddingError::Network(_))
        ));
    }
}
