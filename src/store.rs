//! SQLite-backed vector store.
//!
//! Embeddings live in the `chunks` table as little-endian f32 BLOBs and
//! similarity is computed in Rust at query time. Document inserts are
//! transactional: either the document row and every chunk land together
//! or nothing does.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::chunker::TextChunk;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, EmbeddingClient};
use crate::models::{Document, ScrapedPage, SearchResult, StoreStats};

pub struct VectorStore {
    pool: SqlitePool,
    embeddings: EmbeddingClient,
    batch_size: usize,
}

impl VectorStore {
    pub fn new(pool: SqlitePool, embeddings: EmbeddingClient, batch_size: usize) -> Self {
        Self {
            pool,
            embeddings,
            batch_size,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist one crawled page and its chunks, returning the document id.
    ///
    /// Chunk texts are embedded up front; failed embeddings come back as
    /// zero vectors and are stored as such, so those chunks never match a
    /// search. The URL must not already exist in the store.
    pub async fn add_document(&self, page: &ScrapedPage, chunks: &[TextChunk]) -> Result<String> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embeddings.embed_batch(&texts, self.batch_size).await;

        let doc_id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let doc_metadata = serde_json::to_string(&page.metadata)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO documents (id, url, title, content, metadata_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&doc_id)
        .bind(page.url.as_str())
        .bind(&page.title)
        .bind(&page.content)
        .bind(&doc_metadata)
        .bind(now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to insert document for {}", page.url))?;

        for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
            let mut metadata = serde_json::Map::new();
            for (k, v) in &page.metadata {
                metadata.insert(k.clone(), serde_json::Value::String(v.clone()));
            }
            metadata.insert("chunk_index".to_string(), serde_json::json!(chunk.index));
            metadata.insert("chunk_size".to_string(), serde_json::json!(chunk.size));
            metadata.insert("total_chunks".to_string(), serde_json::json!(chunk.total));

            sqlx::query(
                "INSERT INTO chunks (id, document_id, content, embedding, chunk_index, metadata_json, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&doc_id)
            .bind(&chunk.content)
            .bind(vec_to_blob(embedding))
            .bind(chunk.index as i64)
            .bind(serde_json::Value::Object(metadata).to_string())
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert chunk {} for {}", chunk.index, page.url))?;
        }

        tx.commit().await?;

        info!(url = %page.url, chunks = chunks.len(), "stored document");
        Ok(doc_id)
    }

    /// Rank stored chunks against the query by cosine similarity and
    /// return those at or above `threshold`, best first. Ties break on
    /// chunk id so results are stable across runs.
    pub async fn semantic_search(
        &self,
        query: &str,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<SearchResult>> {
        let query_vec = self.embeddings.embed_query(query).await?;

        let rows = sqlx::query(
            "SELECT c.id, c.content, c.embedding, d.url, d.title
             FROM chunks c JOIN documents d ON d.id = c.document_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(String, SearchResult)> = Vec::new();
        for row in rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let embedding = blob_to_vec(&blob);
            let similarity = f64::from(cosine_similarity(&query_vec, &embedding));
            if similarity >= threshold {
                scored.push((
                    row.try_get("id")?,
                    SearchResult {
                        content: row.try_get("content")?,
                        similarity,
                        document_url: row.try_get("url")?,
                        document_title: row.try_get("title")?,
                    },
                ));
            }
        }

        scored.sort_by(|(a_id, a), (b_id, b)| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a_id.cmp(b_id))
        });
        scored.truncate(limit);

        Ok(scored.into_iter().map(|(_, result)| result).collect())
    }

    /// Remove a document and its chunks. Returns false when the id is
    /// unknown.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }

    pub async fn get_document_by_url(&self, url: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, url, title, content, metadata_json, created_at
             FROM documents WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        row.map(document_from_row).transpose()
    }

    pub async fn list_documents(&self, skip: usize, limit: usize) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, url, title, content, metadata_json, created_at
             FROM documents ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(skip as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(document_from_row).collect()
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let total_documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;

        let avg = if total_documents > 0 {
            total_chunks as f64 / total_documents as f64
        } else {
            0.0
        };

        Ok(StoreStats {
            total_documents,
            total_chunks,
            avg_chunks_per_doc: (avg * 100.0).round() / 100.0,
        })
    }
}

fn document_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Document> {
    Ok(Document {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        metadata_json: row.try_get("metadata_json")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockProvider;
    use crate::migrate::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use url::Url;

    async fn store() -> VectorStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        let client = EmbeddingClient::new(Arc::new(MockProvider::new(64)));
        VectorStore::new(pool, client, 10)
    }

    fn page(url: &str, content: &str) -> ScrapedPage {
        let mut metadata = BTreeMap::new();
        metadata.insert("domain".to_string(), "example.com".to_string());
        ScrapedPage {
            url: Url::parse(url).unwrap(),
            title: "Test Page".to_string(),
            content: content.to_string(),
            metadata,
        }
    }

    fn chunks_of(texts: &[&str]) -> Vec<TextChunk> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| TextChunk {
                content: t.to_string(),
                index: i,
                size: t.chars().count(),
                total: texts.len(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_add_document_persists_chunks() {
        let store = store().await;
        let page = page("https://example.com/a", "full page text");
        let chunks = chunks_of(&["first chunk text", "second chunk text"]);

        let doc_id = store.add_document(&page, &chunks).await.unwrap();

        let doc = store
            .get_document_by_url("https://example.com/a")
            .await
            .unwrap()
            .expect("document should exist");
        assert_eq!(doc.id, doc_id);
        assert_eq!(doc.title, "Test Page");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(&doc_id)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_duplicate_url_rejected() {
        let store = store().await;
        let page = page("https://example.com/a", "text");
        let chunks = chunks_of(&["chunk"]);

        store.add_document(&page, &chunks).await.unwrap();
        assert!(store.add_document(&page, &chunks).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_no_partial_document() {
        let store = store().await;
        let page = page("https://example.com/a", "text");

        // Duplicate chunk_index violates UNIQUE(document_id, chunk_index).
        let mut chunks = chunks_of(&["one", "two"]);
        chunks[1].index = 0;

        assert!(store.add_document(&page, &chunks).await.is_err());

        assert!(store
            .get_document_by_url("https://example.com/a")
            .await
            .unwrap()
            .is_none());
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_search_finds_exact_text_first() {
        let store = store().await;
        store
            .add_document(
                &page("https://example.com/rust", "rust doc"),
                &chunks_of(&["ownership and borrowing in rust"]),
            )
            .await
            .unwrap();
        store
            .add_document(
                &page("https://example.com/cooking", "cooking doc"),
                &chunks_of(&["how to bake sourdough bread"]),
            )
            .await
            .unwrap();

        // The mock provider is deterministic per text, so the identical
        // query embeds to the same vector and scores 1.0.
        let results = store
            .semantic_search("ownership and borrowing in rust", 10, 0.99)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_url, "https://example.com/rust");
        assert!(results[0].similarity > 0.99);
    }

    #[tokio::test]
    async fn test_search_threshold_filters_everything() {
        let store = store().await;
        store
            .add_document(
                &page("https://example.com/a", "doc"),
                &chunks_of(&["some stored content here"]),
            )
            .await
            .unwrap();

        // Unrelated random-looking vectors almost never clear 0.99.
        let results = store
            .semantic_search("completely different query text", 10, 0.99)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_respects_limit() {
        let store = store().await;
        store
            .add_document(
                &page("https://example.com/a", "doc"),
                &chunks_of(&["alpha text", "bravo text", "charlie text"]),
            )
            .await
            .unwrap();

        let results = store.semantic_search("alpha text", 2, -1.0).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].similarity >= results[1].similarity);
    }

    #[tokio::test]
    async fn test_delete_document() {
        let store = store().await;
        let doc_id = store
            .add_document(&page("https://example.com/a", "doc"), &chunks_of(&["chunk"]))
            .await
            .unwrap();

        assert!(store.delete_document(&doc_id).await.unwrap());
        assert!(!store.delete_document(&doc_id).await.unwrap());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = store().await;
        let empty = store.stats().await.unwrap();
        assert_eq!(empty.total_documents, 0);
        assert!((empty.avg_chunks_per_doc - 0.0).abs() < f64::EPSILON);

        store
            .add_document(
                &page("https://example.com/a", "doc"),
                &chunks_of(&["one", "two", "three"]),
            )
            .await
            .unwrap();
        store
            .add_document(&page("https://example.com/b", "doc"), &chunks_of(&["one"]))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.total_chunks, 4);
        assert!((stats.avg_chunks_per_doc - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_list_documents_pagination() {
        let store = store().await;
        for i in 0..5 {
            store
                .add_document(
                    &page(&format!("https://example.com/{i}"), "doc"),
                    &chunks_of(&["chunk"]),
                )
                .await
                .unwrap();
        }

        let first = store.list_documents(0, 2).await.unwrap();
        let second = store.list_documents(2, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert!(first.iter().all(|d| second.iter().all(|e| e.id != d.id)));
    }
}
