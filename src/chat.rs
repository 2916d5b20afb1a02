//! Retrieval-augmented chat engine.
//!
//! Each conversation is a bounded message list in an LRU session
//! registry; retrieval context is rebuilt per message from the vector
//! store. Internal failures never surface to the caller as errors, the
//! bot answers with a generic apology instead.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lru::LruCache;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ChatConfig;
use crate::store::VectorStore;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const APOLOGY: &str =
    "I apologize, but I encountered an error while processing your message. Please try again.";

/// Text generation backend for chat replies.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub fn create_generator(
    provider: &str,
    config: &ChatConfig,
) -> Result<Arc<dyn TextGenerator>> {
    match provider {
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config)?)),
        "mock" => Ok(Arc::new(MockGenerator)),
        other => anyhow::bail!("Unknown chat provider: '{}'. Must be gemini or mock.", other),
    }
}

/// Calls the Gemini `generateContent` endpoint.
pub struct GeminiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiGenerator {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .map_err(|_| anyhow::anyhow!("GOOGLE_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url: GEMINI_BASE_URL.to_string(),
            api_key,
            model: config.model.clone(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let value: serde_json::Value = response.json().await?;
        parse_gemini_reply(&value)
    }
}

fn parse_gemini_reply(value: &serde_json::Value) -> Result<String> {
    let parts = value
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .context("Malformed generateContent response: missing candidates")?;

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        anyhow::bail!("generateContent response contained no text");
    }
    Ok(text)
}

/// Deterministic offline generator, paired with the mock embedding
/// provider for local runs and tests.
pub struct MockGenerator;

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let chars = prompt.chars().count();
        Ok(format!("Mock reply based on a {} character prompt.", chars))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// One chat exchange as returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub sources: Vec<String>,
    pub conversation_id: Uuid,
}

pub struct RagChatbot {
    generator: Arc<dyn TextGenerator>,
    sessions: Mutex<LruCache<Uuid, Vec<ChatMessage>>>,
    history_turns: usize,
    max_results: usize,
    similarity_threshold: f64,
}

impl RagChatbot {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        config: &ChatConfig,
        max_results: usize,
        similarity_threshold: f64,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.session_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            generator,
            sessions: Mutex::new(LruCache::new(capacity)),
            history_turns: config.history_turns,
            max_results,
            similarity_threshold,
        }
    }

    /// Answer one user message.
    ///
    /// A missing or unknown conversation id starts a fresh conversation.
    /// Retrieval or generation failures are logged and answered with a
    /// generic apology and no sources; the caller always gets a reply.
    pub async fn chat(
        &self,
        store: &VectorStore,
        message: &str,
        conversation_id: Option<Uuid>,
    ) -> ChatReply {
        let conversation_id = conversation_id.unwrap_or_else(Uuid::new_v4);
        let history = self.history(&conversation_id).unwrap_or_default();

        let (response, sources) = match self.answer(store, message, &history).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(%conversation_id, error = %err, "chat turn failed");
                (APOLOGY.to_string(), Vec::new())
            }
        };

        self.record_turn(conversation_id, message, &response);
        info!(%conversation_id, sources = sources.len(), "chat turn answered");

        ChatReply {
            response,
            sources,
            conversation_id,
        }
    }

    async fn answer(
        &self,
        store: &VectorStore,
        message: &str,
        history: &[ChatMessage],
    ) -> Result<(String, Vec<String>)> {
        let results = store
            .semantic_search(message, self.max_results, self.similarity_threshold)
            .await?;

        let mut sources: Vec<String> = Vec::new();
        for result in &results {
            if !sources.contains(&result.document_url) {
                sources.push(result.document_url.clone());
            }
        }

        let prompt = build_prompt(message, history, &results);
        let response = self.generator.generate(&prompt).await?;
        Ok((response, sources))
    }

    fn record_turn(&self, conversation_id: Uuid, message: &str, response: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        let history = sessions.get_or_insert_mut(conversation_id, Vec::new);
        history.push(ChatMessage {
            role: "user".to_string(),
            content: message.to_string(),
        });
        history.push(ChatMessage {
            role: "assistant".to_string(),
            content: response.to_string(),
        });

        // One turn is a user/assistant pair.
        let max_messages = self.history_turns * 2;
        if history.len() > max_messages {
            let excess = history.len() - max_messages;
            history.drain(..excess);
        }
    }

    pub fn history(&self, conversation_id: &Uuid) -> Option<Vec<ChatMessage>> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.get(conversation_id).cloned()
    }

    /// Drop a conversation. Returns false when the id is unknown.
    pub fn clear_conversation(&self, conversation_id: &Uuid) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.pop(conversation_id).is_some()
    }
}

fn build_prompt(
    message: &str,
    history: &[ChatMessage],
    results: &[crate::models::SearchResult],
) -> String {
    let mut prompt = String::from(
        "You are a helpful assistant. Answer the user's question using the \
         context below. If the context does not contain the answer, say so \
         instead of guessing.\n\nContext:\n",
    );

    if results.is_empty() {
        prompt.push_str("(no relevant context found)\n");
    } else {
        for result in results {
            prompt.push_str(&format!(
                "[source: {}]\n{}\n\n",
                result.document_url, result.content
            ));
        }
    }

    if !history.is_empty() {
        prompt.push_str("\nConversation so far:\n");
        for msg in history {
            let role = if msg.role == "user" { "User" } else { "Assistant" };
            prompt.push_str(&format!("{}: {}\n", role, msg.content));
        }
    }

    prompt.push_str(&format!("\nUser: {}\nAssistant:", message));
    prompt
}
