//! End-to-end pipeline tests against a local fixture website.
//!
//! A small axum app stands in for the crawled site so the whole
//! crawl → chunk → embed → store → search path runs without network
//! access. Embeddings come from the deterministic mock provider.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{http::StatusCode, response::Html, routing::get, Router};
use sqlx::sqlite::SqlitePoolOptions;

use webrag::chunker::TextChunker;
use webrag::config::{ChunkingConfig, CrawlerConfig};
use webrag::crawler::WebCrawler;
use webrag::embedding::{EmbeddingClient, MockProvider};
use webrag::ingest::run_ingest;
use webrag::migrate::run_migrations;
use webrag::store::VectorStore;

const HOME_TEXT: &str = "Welcome to the fixture site, the home page has plenty of text.";
const PAGE_A_TEXT: &str = "Page A explains the installation steps in careful detail.";
const PAGE_B_TEXT: &str = "Page B documents the configuration file format thoroughly.";
const DEEP_TEXT: &str = "The deep page is only reachable through two link hops.";

/// Serve the fixture site on an ephemeral port and return its base URL.
async fn fixture_site() -> String {
    let app = Router::new()
        .route(
            "/",
            get(|| async {
                Html(format!(
                    "<html><head><title>Home</title></head><body>\
                     <p>{HOME_TEXT}</p>\
                     <a href=\"/a\">A</a>\
                     <a href=\"/a#section\">A again</a>\
                     <a href=\"/b\">B</a>\
                     <a href=\"/broken\">Broken</a>\
                     <a href=\"/manual.pdf\">Manual</a>\
                     <a href=\"http://elsewhere.invalid/away\">Away</a>\
                     </body></html>"
                ))
            }),
        )
        .route(
            "/a",
            get(|| async {
                Html(format!(
                    "<html><head><title>Page A</title></head><body>\
                     <p>{PAGE_A_TEXT}</p>\
                     <a href=\"/deep\">Deep</a>\
                     </body></html>"
                ))
            }),
        )
        .route(
            "/b",
            get(|| async {
                Html(format!(
                    "<html><body><p>{PAGE_B_TEXT}</p></body></html>"
                ))
            }),
        )
        .route(
            "/deep",
            get(|| async {
                Html(format!(
                    "<html><head><title>Deep</title></head><body><p>{DEEP_TEXT}</p></body></html>"
                ))
            }),
        )
        .route(
            "/broken",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        )
        .route("/manual.pdf", get(|| async { "%PDF-1.4" }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

fn crawler(max_depth: usize, max_pages: usize) -> WebCrawler {
    WebCrawler::new(&CrawlerConfig {
        max_depth,
        max_pages,
        fetch_delay_ms: 0,
        fetch_timeout_secs: 5,
        user_agent: "webrag-test".to_string(),
    })
    .unwrap()
}

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

fn chunker() -> TextChunker {
    TextChunker::new(&ChunkingConfig::default())
}

#[tokio::test]
async fn test_crawl_stays_on_host_within_depth() {
    let base = fixture_site().await;
    let pages = crawler(1, 50).crawl(&base).await.unwrap();

    let urls: HashSet<String> = pages.iter().map(|p| p.url.to_string()).collect();
    assert!(urls.contains(&format!("{base}/")));
    assert!(urls.contains(&format!("{base}/a")));
    assert!(urls.contains(&format!("{base}/b")));
    // One hop past /a, the external site, the PDF, and the broken page
    // are all out.
    assert!(!urls.iter().any(|u| u.contains("/deep")));
    assert!(!urls.iter().any(|u| u.contains("elsewhere")));
    assert!(!urls.iter().any(|u| u.contains(".pdf")));
    assert!(!urls.iter().any(|u| u.contains("/broken")));
    assert_eq!(pages.len(), 3);
}

#[tokio::test]
async fn test_crawl_depth_two_reaches_linked_page() {
    let base = fixture_site().await;
    let pages = crawler(2, 50).crawl(&base).await.unwrap();

    let urls: HashSet<String> = pages.iter().map(|p| p.url.to_string()).collect();
    assert!(urls.contains(&format!("{base}/deep")));
    assert_eq!(pages.len(), 4);
}

#[tokio::test]
async fn test_crawl_respects_page_cap() {
    let base = fixture_site().await;
    let pages = crawler(2, 2).crawl(&base).await.unwrap();
    assert_eq!(pages.len(), 2);
}

#[tokio::test]
async fn test_page_cap_bounds_fetches_even_without_retrievable_text() {
    // Every page is nothing but short navigation lines, so all cleaned
    // content is empty. The cap must still stop the crawl after two
    // fetches instead of draining the whole frontier.
    let app = Router::new()
        .route(
            "/",
            get(|| async {
                Html(
                    "<html><body><p>Menu</p>\
                     <a href=\"/n1\">n1</a><a href=\"/n2\">n2</a><a href=\"/n3\">n3</a>\
                     </body></html>",
                )
            }),
        )
        .route("/n1", get(|| async { Html("<html><body><p>Home</p></body></html>") }))
        .route("/n2", get(|| async { Html("<html><body><p>About</p></body></html>") }))
        .route("/n3", get(|| async { Html("<html><body><p>Help</p></body></html>") }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let pages = crawler(3, 2).crawl(&base).await.unwrap();
    assert_eq!(pages.len(), 2);
    assert!(pages.iter().all(|p| p.content.is_empty()));

    // Downstream, chunk-less pages are counted but never stored.
    let store = store().await;
    let report = run_ingest(&crawler(3, 2), &chunker(), &store, &base)
        .await
        .unwrap();
    assert_eq!(report.pages_crawled, 2);
    assert_eq!(report.documents_added, 0);
    assert_eq!(report.documents_skipped, 2);
}

#[tokio::test]
async fn test_crawl_extracts_titles_and_fragment_dedupe() {
    let base = fixture_site().await;
    let pages = crawler(1, 50).crawl(&base).await.unwrap();

    let a_pages: Vec<_> = pages
        .iter()
        .filter(|p| p.url.as_str().ends_with("/a"))
        .collect();
    assert_eq!(a_pages.len(), 1, "fragment link must not duplicate /a");
    assert_eq!(a_pages[0].title, "Page A");
    assert_eq!(a_pages[0].content, PAGE_A_TEXT);

    let b = pages
        .iter()
        .find(|p| p.url.as_str().ends_with("/b"))
        .unwrap();
    assert_eq!(b.title, "Untitled");
    assert_eq!(b.content, PAGE_B_TEXT);
}

#[tokio::test]
async fn test_ingest_stores_pages_and_search_finds_them() {
    let base = fixture_site().await;
    let store = store().await;

    let report = run_ingest(&crawler(1, 50), &chunker(), &store, &base)
        .await
        .unwrap();
    assert_eq!(report.pages_crawled, 3);
    assert_eq!(report.documents_added, 3);
    assert_eq!(report.pages_failed, 0);
    assert!(report.chunks_added >= 3);

    // The mock provider embeds identical text identically, so querying
    // a stored page's exact text must rank it first with similarity 1.
    let results = store.semantic_search(PAGE_A_TEXT, 5, 0.99).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].document_url.ends_with("/a"));

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_documents, 3);
}

#[tokio::test]
async fn test_reingest_skips_already_stored_urls() {
    let base = fixture_site().await;
    let store = store().await;

    let first = run_ingest(&crawler(1, 50), &chunker(), &store, &base)
        .await
        .unwrap();
    assert_eq!(first.documents_added, 3);

    let second = run_ingest(&crawler(1, 50), &chunker(), &store, &base)
        .await
        .unwrap();
    assert_eq!(second.documents_added, 0);
    assert_eq!(second.documents_skipped, 3);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_documents, 3);
}

#[tokio::test]
async fn test_delete_removes_document_from_search() {
    let base = fixture_site().await;
    let store = store().await;
    run_ingest(&crawler(1, 50), &chunker(), &store, &base)
        .await
        .unwrap();

    let doc = store
        .get_document_by_url(&format!("{base}/a"))
        .await
        .unwrap()
        .expect("page A stored");
    assert!(store.delete_document(&doc.id).await.unwrap());

    let results = store.semantic_search(PAGE_A_TEXT, 5, 0.99).await.unwrap();
    assert!(results.is_empty());

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_documents, 2);
}

#[tokio::test]
async fn test_unreachable_start_url_errors() {
    let store = store().await;
    // Nothing listens on this port; the start URL itself failing still
    // yields an empty successful crawl, not an error past the fetch.
    let report = run_ingest(
        &crawler(1, 5),
        &chunker(),
        &store,
        "http://127.0.0.1:9/none",
    )
    .await
    .unwrap();
    assert_eq!(report.pages_crawled, 0);
    assert_eq!(report.documents_added, 0);
}

#[tokio::test]
async fn test_invalid_start_url_rejected() {
    let store = store().await;
    let result = run_ingest(&crawler(1, 5), &chunker(), &store, "not a url").await;
    assert!(result.is_err());
}
