//! Cosine similarity and top-k ranking over knowledge chunks.

use auspex_core::knowledge::{ChunkFilter, KnowledgeChunk, ScoredChunk};

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1]. Returns 0.0 for empty, zero-norm or
/// mismatched-length inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Score every chunk that passes `filter` against `query`, highest first.
///
/// Chunks whose embedding length differs from the query are skipped rather
/// than scored as 0, so a half-migrated store never surfaces stale vectors.
pub fn rank_chunks<'a, I>(
    chunks: I,
    query: &[f32],
    filter: &ChunkFilter,
    top_k: usize,
) -> Vec<ScoredChunk>
where
    I: IntoIterator<Item = &'a KnowledgeChunk>,
{
    let mut scored: Vec<ScoredChunk> = chunks
        .into_iter()
        .filter(|chunk| filter.matches(chunk))
        .filter(|chunk| chunk.embedding.len() == query.len())
        .map(|chunk| ScoredChunk {
            score: cosine_similarity(&chunk.embedding, query),
            chunk: chunk.clone(),
        })
        .collect();

    sort_and_truncate(&mut scored, top_k);
    scored
}

/// Sort by descending score (ties broken by id for stable output) and keep `top_k`.
pub(crate) fn sort_and_truncate(scored: &mut Vec<ScoredChunk>, top_k: usize) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    scored.truncate(top_k);
}

#[cfg(test)]
mod tests {
    use super::*;
    use auspex_core::knowledge::{KNOWLEDGE_DOC_TYPE, Mode};

    fn chunk(id: &str, mode: Mode, embedding: Vec<f32>) -> KnowledgeChunk {
        KnowledgeChunk {
            id: id.into(),
            title: None,
            content: format!("Content for {id}"),
            source: None,
            mode,
            doc_type: KNOWLEDGE_DOC_TYPE.into(),
            embedding,
        }
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn cosine_known_value() {
        // 1 / sqrt(2)
        let sim = cosine_similarity(&[1.0, 1.0], &[1.0, 0.0]);
        assert!((sim - 0.7071).abs() < 0.001);
    }

    #[test]
    fn ranks_descending_and_truncates() {
        let query = vec![1.0, 0.0, 0.0];
        let chunks = vec![
            chunk("a", Mode::Career, vec![0.0, 1.0, 0.0]),
            chunk("b", Mode::Career, vec![1.0, 0.0, 0.0]),
            chunk("c", Mode::Career, vec![0.7, 0.7, 0.0]),
        ];
        let ranked = rank_chunks(&chunks, &query, &ChunkFilter::new(Mode::Career), 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].chunk.id, "b");
        assert_eq!(ranked[1].chunk.id, "c");
        assert!(ranked[0].score >= ranked[1].score);
    }

    #[test]
    fn other_modes_are_never_returned() {
        let query = vec![1.0, 0.0];
        let chunks = vec![
            chunk("career", Mode::Career, vec![1.0, 0.0]),
            chunk("love", Mode::Relationship, vec![0.9, 0.1]),
        ];
        let ranked = rank_chunks(&chunks, &query, &ChunkFilter::new(Mode::Relationship), 5);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].chunk.mode, Mode::Relationship);
    }

    #[test]
    fn dimension_mismatch_is_skipped() {
        let query = vec![1.0, 0.0];
        let chunks = vec![
            chunk("old", Mode::General, vec![1.0, 0.0, 0.0]),
            chunk("new", Mode::General, vec![1.0, 0.0]),
        ];
        let ranked = rank_chunks(&chunks, &query, &ChunkFilter::new(Mode::General), 5);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].chunk.id, "new");
    }
}
