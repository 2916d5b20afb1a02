use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlerConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Politeness pause between consecutive fetches, in milliseconds.
    #[serde(default = "default_fetch_delay_ms")]
    pub fetch_delay_ms: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            fetch_delay_ms: default_fetch_delay_ms(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_max_depth() -> usize {
    2
}
fn default_max_pages() -> usize {
    10
}
fn default_fetch_delay_ms() -> u64 {
    1000
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Pairwise cosine similarity above which adjacent pieces are merged.
    #[serde(default = "default_merge_threshold")]
    pub merge_similarity_threshold: f64,
    /// A merged chunk never exceeds `chunk_size * merge_size_factor`.
    #[serde(default = "default_merge_size_factor")]
    pub merge_size_factor: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            merge_similarity_threshold: default_merge_threshold(),
            merge_size_factor: default_merge_size_factor(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_merge_threshold() -> f64 {
    0.6
}
fn default_merge_size_factor() -> f64 {
    1.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `gemini` or `mock`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Override the provider base URL (used by tests; defaults to the
    /// public Gemini endpoint).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "models/embedding-001".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_batch_size() -> usize {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_max_results() -> usize {
    10
}
fn default_similarity_threshold() -> f64 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Generation model called for chat replies.
    #[serde(default = "default_chat_model")]
    pub model: String,
    /// Turns of history kept per conversation.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    /// Conversations kept in the session registry before LRU eviction.
    #[serde(default = "default_session_capacity")]
    pub session_capacity: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            history_turns: default_history_turns(),
            session_capacity: default_session_capacity(),
        }
    }
}

fn default_chat_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_history_turns() -> usize {
    10
}
fn default_session_capacity() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunk_size");
    }
    if config.chunking.merge_size_factor < 1.0 {
        anyhow::bail!("chunking.merge_size_factor must be >= 1.0");
    }
    if !(0.0..=1.0).contains(&config.chunking.merge_similarity_threshold) {
        anyhow::bail!("chunking.merge_similarity_threshold must be in [0.0, 1.0]");
    }

    if config.crawler.max_pages == 0 {
        anyhow::bail!("crawler.max_pages must be >= 1");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "gemini" | "mock" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be gemini or mock.",
            other
        ),
    }

    if !(0.0..=1.0).contains(&config.search.similarity_threshold) {
        anyhow::bail!("search.similarity_threshold must be in [0.0, 1.0]");
    }
    if config.search.max_results == 0 {
        anyhow::bail!("search.max_results must be >= 1");
    }
    if config.chat.session_capacity == 0 {
        anyhow::bail!("chat.session_capacity must be >= 1");
    }

    Ok(config)
}
