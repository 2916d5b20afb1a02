//! Embedding provider abstraction and the retrying client on top of it.
//!
//! Two task intents exist: indexing (`Document`) and querying (`Query`).
//! The remote provider may treat them differently; the client interface is
//! the same for both.
//!
//! Also provides vector utilities for the SQLite-backed store:
//! - [`cosine_similarity`] — compute similarity between two embedding vectors
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes for BLOB storage
//! - [`blob_to_vec`] — decode a BLOB back into a `Vec<f32>`
//!
//! # Retry Strategy
//!
//! [`EmbeddingClient`] retries a failed provider call up to `max_retries`
//! attempts total, waiting an exponentially growing delay clamped to
//! [4s, 10s] between attempts. Batch embedding never fails wholesale: a
//! text whose embedding still fails after retries is replaced by a zero
//! vector so ingestion can proceed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::EmbeddingConfig;

/// Provider input-size guard: text is truncated to this many characters
/// before being sent.
pub const MAX_INPUT_CHARS: usize = 10_000;

const BACKOFF_MIN: Duration = Duration::from_secs(4);
const BACKOFF_MAX: Duration = Duration::from_secs(10);

/// What the embedding will be used for. Providers may encode documents
/// and queries differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Document,
    Query,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Document => "RETRIEVAL_DOCUMENT",
            TaskKind::Query => "RETRIEVAL_QUERY",
        }
    }
}

/// A text-in/vector-out embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text for the given task intent.
    async fn embed(&self, text: &str, task: TaskKind) -> Result<Vec<f32>>;
    /// Embedding vector dimensionality (e.g. `768`).
    fn dims(&self) -> usize;
    /// Model identifier (e.g. `"models/embedding-001"`).
    fn model_name(&self) -> &str;
}

/// Instantiate the provider named in the configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiProvider::new(config)?)),
        "mock" => Ok(Arc::new(MockProvider::new(config.dims))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Gemini provider ============

/// Embedding provider calling the Gemini `embedContent` endpoint.
///
/// Requires the `GOOGLE_API_KEY` environment variable.
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
}

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

impl GeminiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .map_err(|_| anyhow::anyhow!("GOOGLE_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            api_key,
            model: config.model.clone(),
            dims: config.dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    async fn embed(&self, text: &str, task: TaskKind) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "content": { "parts": [ { "text": text } ] },
            "taskType": task.as_str(),
        });

        let response = self
            .client
            .post(format!(
                "{}/v1beta/{}:embedContent?key={}",
                self.base_url, self.model, self.api_key
            ))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Gemini API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_gemini_response(&json)
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Extract the `embedding.values` array from an `embedContent` response.
fn parse_gemini_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let values = json
        .get("embedding")
        .and_then(|e| e.get("values"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing embedding.values"))?;

    Ok(values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ Mock provider ============

/// Deterministic offline provider for tests and local development.
///
/// Produces a pseudo-random unit vector derived from the input bytes, so
/// identical texts always map to identical embeddings.
pub struct MockProvider {
    dims: usize,
}

impl MockProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    async fn embed(&self, text: &str, _task: TaskKind) -> Result<Vec<f32>> {
        // FNV-1a seed, then a splitmix-style generator per component.
        let mut seed: u64 = 0xcbf2_9ce4_8422_2325;
        for b in text.bytes() {
            seed ^= u64::from(b);
            seed = seed.wrapping_mul(0x0000_0100_0000_01b3);
        }

        let mut vec = Vec::with_capacity(self.dims);
        let mut state = seed;
        for _ in 0..self.dims {
            state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            z ^= z >> 31;
            vec.push(((z as f64 / u64::MAX as f64) * 2.0 - 1.0) as f32);
        }

        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vec {
                *v /= norm;
            }
        }
        Ok(vec)
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

// ============ Client ============

/// Retrying wrapper over an [`EmbeddingProvider`].
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    max_retries: u32,
    backoff_min: Duration,
    backoff_max: Duration,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            max_retries: 3,
            backoff_min: BACKOFF_MIN,
            backoff_max: BACKOFF_MAX,
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let provider = create_provider(config)?;
        Ok(Self {
            provider,
            max_retries: config.max_retries.max(1),
            backoff_min: BACKOFF_MIN,
            backoff_max: BACKOFF_MAX,
        })
    }

    /// Override the retry backoff bounds. Tests use this to avoid
    /// multi-second sleeps.
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_min = min;
        self.backoff_max = max;
        self
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed a text for indexing.
    pub async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_retry(text, TaskKind::Document).await
    }

    /// Embed a search query.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed_with_retry(query, TaskKind::Query).await
    }

    async fn embed_with_retry(&self, text: &str, task: TaskKind) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            bail!("Cannot embed empty text");
        }

        let text = truncate_chars(text, MAX_INPUT_CHARS);

        let mut last_err = None;
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1u64 << attempt)
                    .clamp(self.backoff_min, self.backoff_max);
                tokio::time::sleep(delay).await;
            }

            match self.provider.embed(text, task).await {
                Ok(vec) => return Ok(vec),
                Err(e) => {
                    debug!(attempt, error = %e, "embedding attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }

    /// Embed many texts, `batch_size` at a time, preserving order.
    ///
    /// A text that cannot be embedded even after retries is replaced by a
    /// zero vector; the output length always equals the input length.
    pub async fn embed_batch(&self, texts: &[String], batch_size: usize) -> Vec<Vec<f32>> {
        let batch_size = batch_size.max(1);
        let total_batches = texts.len().div_ceil(batch_size);
        let mut embeddings = Vec::with_capacity(texts.len());

        for (batch_no, batch) in texts.chunks(batch_size).enumerate() {
            for text in batch {
                match self.embed_document(text).await {
                    Ok(vec) => embeddings.push(vec),
                    Err(e) => {
                        warn!(error = %e, "failed to embed text, substituting zero vector");
                        embeddings.push(vec![0.0; self.provider.dims()]);
                    }
                }
            }
            info!(batch = batch_no + 1, total = total_batches, "processed embedding batch");
        }

        embeddings
    }
}

/// Truncate to at most `max` characters without splitting a code point.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude operand (which is why zero-vector fallback chunks never
/// rank above the threshold).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
