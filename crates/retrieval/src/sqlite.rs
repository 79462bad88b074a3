//! SQLite-backed vector store.
//!
//! One `chunks` table; embeddings live in a BLOB column as little-endian
//! `f32`s. Queries narrow by `(mode, doc_type)` in SQL, then score the
//! remaining rows by cosine similarity in process.

use crate::vector::rank_chunks;
use async_trait::async_trait;
use auspex_core::error::StoreError;
use auspex_core::knowledge::{ChunkFilter, KnowledgeChunk, Mode, ScoredChunk, VectorStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// A persistent vector store on a single SQLite file.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Open (or create) the store at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite knowledge store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id         TEXT PRIMARY KEY NOT NULL,
                title      TEXT,
                content    TEXT NOT NULL,
                source     TEXT,
                mode       TEXT NOT NULL,
                doc_type   TEXT NOT NULL,
                embedding  BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("chunks table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_mode_doc_type ON chunks(mode, doc_type)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("mode index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeChunk, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let title: Option<String> = row
            .try_get("title")
            .map_err(|e| StoreError::QueryFailed(format!("title column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| StoreError::QueryFailed(format!("content column: {e}")))?;
        let source: Option<String> = row
            .try_get("source")
            .map_err(|e| StoreError::QueryFailed(format!("source column: {e}")))?;
        let mode_str: String = row
            .try_get("mode")
            .map_err(|e| StoreError::QueryFailed(format!("mode column: {e}")))?;
        let doc_type: String = row
            .try_get("doc_type")
            .map_err(|e| StoreError::QueryFailed(format!("doc_type column: {e}")))?;
        let blob: Vec<u8> = row
            .try_get("embedding")
            .map_err(|e| StoreError::QueryFailed(format!("embedding column: {e}")))?;

        let mode = Mode::from_str(&mode_str).map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        Ok(KnowledgeChunk {
            id,
            title,
            content,
            source,
            mode,
            doc_type,
            embedding: blob_to_embedding(&blob),
        })
    }
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn query(
        &self,
        embedding: &[f32],
        filter: &ChunkFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE mode = ?1 AND doc_type = ?2")
            .bind(filter.mode.as_str())
            .bind(&filter.doc_type)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Vector scan: {e}")))?;

        let chunks: Vec<KnowledgeChunk> = rows
            .iter()
            .filter_map(|row| match Self::row_to_chunk(row) {
                Ok(chunk) => Some(chunk),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable chunk row");
                    None
                }
            })
            .collect();

        Ok(rank_chunks(&chunks, embedding, filter, top_k))
    }

    async fn upsert(&self, chunk: KnowledgeChunk) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, title, content, source, mode, doc_type, embedding)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                source = excluded.source,
                mode = excluded.mode,
                doc_type = excluded.doc_type,
                embedding = excluded.embedding
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.title)
        .bind(&chunk.content)
        .bind(&chunk.source)
        .bind(chunk.mode.as_str())
        .bind(&chunk.doc_type)
        .bind(embedding_to_blob(&chunk.embedding))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT failed: {e}")))?;

        debug!(id = %chunk.id, mode = %chunk.mode, "Stored chunk");
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("COUNT: {e}")))?;

        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| StoreError::QueryFailed(format!("cnt column: {e}")))?;

        Ok(cnt as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auspex_core::knowledge::KNOWLEDGE_DOC_TYPE;

    async fn test_store() -> SqliteVectorStore {
        SqliteVectorStore::new("sqlite::memory:").await.unwrap()
    }

    fn make_chunk(id: &str, mode: Mode, embedding: Vec<f32>) -> KnowledgeChunk {
        KnowledgeChunk {
            id: id.into(),
            title: Some(format!("Title {id}")),
            content: format!("Content {id}"),
            source: Some("test".into()),
            mode,
            doc_type: KNOWLEDGE_DOC_TYPE.into(),
            embedding,
        }
    }

    #[tokio::test]
    async fn upsert_and_query() {
        let store = test_store().await;
        store
            .upsert(make_chunk("c1", Mode::Compatibility, vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert(make_chunk("c2", Mode::Compatibility, vec![0.6, 0.8, 0.0]))
            .await
            .unwrap();

        let hits = store
            .query(&[1.0, 0.0, 0.0], &ChunkFilter::new(Mode::Compatibility), 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.id, "c1");
        assert_eq!(hits[0].chunk.title.as_deref(), Some("Title c1"));
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn embedding_round_trip() {
        let store = test_store().await;
        store
            .upsert(make_chunk("e", Mode::Remedy, vec![0.1, 0.2, 0.3, 0.4]))
            .await
            .unwrap();
        let hits = store
            .query(&[0.1, 0.2, 0.3, 0.4], &ChunkFilter::new(Mode::Remedy), 1)
            .await
            .unwrap();
        let emb = &hits[0].chunk.embedding;
        assert_eq!(emb.len(), 4);
        assert!((emb[0] - 0.1).abs() < 1e-6);
        assert!((emb[3] - 0.4).abs() < 1e-6);
    }

    #[tokio::test]
    async fn upsert_on_conflict_replaces() {
        let store = test_store().await;
        store.upsert(make_chunk("x", Mode::Career, vec![1.0, 0.0])).await.unwrap();
        let mut updated = make_chunk("x", Mode::Finance, vec![0.0, 1.0]);
        updated.content = "Updated".into();
        store.upsert(updated).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let career = store
            .query(&[1.0, 0.0], &ChunkFilter::new(Mode::Career), 5)
            .await
            .unwrap();
        assert!(career.is_empty());
        let finance = store
            .query(&[0.0, 1.0], &ChunkFilter::new(Mode::Finance), 5)
            .await
            .unwrap();
        assert_eq!(finance[0].chunk.content, "Updated");
    }

    #[tokio::test]
    async fn doc_type_filter_applies() {
        let store = test_store().await;
        let mut note = make_chunk("n", Mode::Health, vec![1.0]);
        note.doc_type = "user_note".into();
        store.upsert(note).await.unwrap();
        store.upsert(make_chunk("k", Mode::Health, vec![1.0])).await.unwrap();

        let hits = store
            .query(&[1.0], &ChunkFilter::new(Mode::Health), 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "k");
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteVectorStore::new(path).await.unwrap();
            store.upsert(make_chunk("p", Mode::Nakshatra, vec![1.0, 0.0])).await.unwrap();
        }

        let reopened = SqliteVectorStore::new(path).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn count_empty_and_name() {
        let store = test_store().await;
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.name(), "sqlite");
    }
}
