//! HTTP API server.
//!
//! Exposes scraping, search, and chat over a JSON REST surface:
//!
//! - `POST /scrape/website` — start a crawl in the background (202)
//! - `GET /scrape/documents` — list stored documents
//! - `DELETE /scrape/documents/{id}` — remove a document and its chunks
//! - `POST /search/semantic` — similarity search over stored chunks
//! - `GET /search/stats` — store counters
//! - `POST /chat/message` — one retrieval-augmented chat turn
//! - `GET /chat/conversation/{id}` — conversation history
//! - `DELETE /chat/conversation/{id}` — drop a conversation
//! - `GET /health` — liveness probe

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::chat::{create_generator, ChatMessage, ChatReply, RagChatbot};
use crate::chunker::TextChunker;
use crate::config::Config;
use crate::crawler::WebCrawler;
use crate::embedding::EmbeddingClient;
use crate::ingest::run_ingest;
use crate::models::{SearchResult, StoreStats};
use crate::store::VectorStore;

/// Shared application state passed to all route handlers via Axum's
/// `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<VectorStore>,
    chatbot: Arc<RagChatbot>,
}

impl AppState {
    pub fn new(config: Arc<Config>, store: Arc<VectorStore>, chatbot: Arc<RagChatbot>) -> Self {
        Self {
            config,
            store,
            chatbot,
        }
    }
}

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::connect(&config.db).await?;
    crate::migrate::run_migrations(&pool).await?;

    let embeddings = EmbeddingClient::from_config(&config.embedding)?;
    let store = Arc::new(VectorStore::new(
        pool,
        embeddings,
        config.embedding.batch_size,
    ));
    let generator = create_generator(&config.embedding.provider, &config.chat)?;
    let chatbot = Arc::new(RagChatbot::new(
        generator,
        &config.chat,
        config.search.max_results,
        config.search.similarity_threshold,
    ));

    let bind_addr = config.server.bind.clone();
    let state = AppState::new(Arc::new(config.clone()), store, chatbot);
    let app = build_router(state);

    info!("server listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/scrape/website", post(handle_scrape_website))
        .route("/scrape/documents", get(handle_list_documents))
        .route("/scrape/documents/{id}", delete(handle_delete_document))
        .route("/search/semantic", post(handle_search))
        .route("/search/stats", get(handle_stats))
        .route("/chat/message", post(handle_chat_message))
        .route(
            "/chat/conversation/{id}",
            get(handle_get_conversation).delete(handle_clear_conversation),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal_error(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal_error".to_string(),
        message: err.to_string(),
    }
}

// ============ POST /scrape/website ============

#[derive(Deserialize)]
struct ScrapeRequest {
    url: String,
    max_depth: Option<usize>,
    max_pages: Option<usize>,
}

#[derive(Serialize)]
struct ScrapeAccepted {
    status: String,
    message: String,
}

/// Validates the request and rejects URLs already in the store, then
/// runs the crawl-and-store pipeline in a background task and answers
/// 202 immediately.
async fn handle_scrape_website(
    State(state): State<AppState>,
    Json(req): Json<ScrapeRequest>,
) -> Result<(StatusCode, Json<ScrapeAccepted>), AppError> {
    if req.url.trim().is_empty() {
        return Err(bad_request("url must not be empty"));
    }
    let start = url::Url::parse(&req.url)
        .map_err(|e| bad_request(format!("invalid url: {}", e)))?;
    if state
        .store
        .get_document_by_url(start.as_str())
        .await
        .map_err(internal_error)?
        .is_some()
    {
        return Err(bad_request(format!("URL already scraped: {}", start)));
    }

    let mut crawler_config = state.config.crawler.clone();
    if let Some(depth) = req.max_depth {
        crawler_config.max_depth = depth;
    }
    if let Some(pages) = req.max_pages {
        if pages == 0 {
            return Err(bad_request("max_pages must be >= 1"));
        }
        crawler_config.max_pages = pages;
    }

    let crawler = WebCrawler::new(&crawler_config).map_err(internal_error)?;
    let chunker = TextChunker::new(&state.config.chunking);
    let store = state.store.clone();
    let url = req.url.clone();

    tokio::spawn(async move {
        match run_ingest(&crawler, &chunker, &store, &url).await {
            Ok(report) => info!(
                url = %url,
                added = report.documents_added,
                skipped = report.documents_skipped,
                failed = report.pages_failed,
                "background scrape finished"
            ),
            Err(err) => error!(url = %url, error = %err, "background scrape failed"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ScrapeAccepted {
            status: "processing".to_string(),
            message: format!("Started scraping {}", req.url),
        }),
    ))
}

// ============ GET /scrape/documents ============

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_list_limit")]
    limit: usize,
}

fn default_list_limit() -> usize {
    20
}

#[derive(Serialize)]
struct DocumentSummary {
    id: String,
    url: String,
    title: String,
    created_at: i64,
}

#[derive(Serialize)]
struct DocumentList {
    documents: Vec<DocumentSummary>,
    count: usize,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<DocumentList>, AppError> {
    let docs = state
        .store
        .list_documents(params.skip, params.limit)
        .await
        .map_err(internal_error)?;

    let documents: Vec<DocumentSummary> = docs
        .into_iter()
        .map(|d| DocumentSummary {
            id: d.id,
            url: d.url,
            title: d.title,
            created_at: d.created_at,
        })
        .collect();
    let count = documents.len();

    Ok(Json(DocumentList { documents, count }))
}

// ============ DELETE /scrape/documents/{id} ============

#[derive(Serialize)]
struct DeleteResponse {
    status: String,
    id: String,
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = state
        .store
        .delete_document(&id)
        .await
        .map_err(internal_error)?;

    if !deleted {
        return Err(not_found(format!("document not found: {}", id)));
    }
    Ok(Json(DeleteResponse {
        status: "deleted".to_string(),
        id,
    }))
}

// ============ POST /search/semantic ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    max_results: Option<usize>,
    similarity_threshold: Option<f64>,
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    results: Vec<SearchResult>,
    count: usize,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let limit = req.max_results.unwrap_or(state.config.search.max_results);
    let threshold = req
        .similarity_threshold
        .unwrap_or(state.config.search.similarity_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(bad_request("threshold must be in [0.0, 1.0]"));
    }

    let results = state
        .store
        .semantic_search(&req.query, limit, threshold)
        .await
        .map_err(internal_error)?;
    let count = results.len();

    Ok(Json(SearchResponse {
        query: req.query,
        results,
        count,
    }))
}

// ============ GET /search/stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StoreStats>, AppError> {
    state.store.stats().await.map(Json).map_err(internal_error)
}

// ============ POST /chat/message ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    conversation_id: Option<Uuid>,
}

async fn handle_chat_message(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let reply = state
        .chatbot
        .chat(&state.store, &req.message, req.conversation_id)
        .await;
    Ok(Json(reply))
}

// ============ Conversations ============

#[derive(Serialize)]
struct ConversationResponse {
    conversation_id: Uuid,
    messages: Vec<ChatMessage>,
}

async fn handle_get_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationResponse>, AppError> {
    match state.chatbot.history(&id) {
        Some(messages) => Ok(Json(ConversationResponse {
            conversation_id: id,
            messages,
        })),
        None => Err(not_found(format!("conversation not found: {}", id))),
    }
}

#[derive(Serialize)]
struct ClearedResponse {
    status: String,
    conversation_id: Uuid,
}

async fn handle_clear_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ClearedResponse>, AppError> {
    if !state.chatbot.clear_conversation(&id) {
        return Err(not_found(format!("conversation not found: {}", id)));
    }
    Ok(Json(ClearedResponse {
        status: "cleared".to_string(),
        conversation_id: id,
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
