//! Core data models used throughout webrag.
//!
//! These types represent the documents, crawl output, and search results
//! that flow through the ingestion and retrieval pipeline.

use std::collections::BTreeMap;

use serde::Serialize;
use url::Url;

/// A crawled page stored in SQLite. One row per unique URL.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub metadata_json: String,
    pub created_at: i64,
}

/// Raw crawler output for one page. Transient: consumed by the chunker
/// during ingestion and never persisted as-is.
#[derive(Debug, Clone)]
pub struct ScrapedPage {
    pub url: Url,
    pub title: String,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

/// A ranked hit returned from semantic search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub content: String,
    pub similarity: f64,
    pub document_url: String,
    pub document_title: String,
}

/// Read-only aggregate over the store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_documents: i64,
    pub total_chunks: i64,
    pub avg_chunks_per_doc: f64,
}
