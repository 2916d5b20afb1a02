//! Crawl-to-store pipeline.
//!
//! Drives the crawler over a site, chunks each page, and persists the
//! results. Failures are absorbed per page so one bad page never aborts
//! an ingestion run.

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::chunker::TextChunker;
use crate::crawler::WebCrawler;
use crate::store::VectorStore;

/// Counters summarizing one ingestion run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestReport {
    pub pages_crawled: usize,
    pub documents_added: usize,
    pub documents_skipped: usize,
    pub pages_failed: usize,
    pub chunks_added: usize,
}

/// Crawl `start_url` and store every new page.
///
/// Pages whose URL is already in the store are skipped, as are pages
/// whose cleaned text produces no chunks.
pub async fn run_ingest(
    crawler: &WebCrawler,
    chunker: &TextChunker,
    store: &VectorStore,
    start_url: &str,
) -> Result<IngestReport> {
    let pages = crawler.crawl(start_url).await?;

    let mut report = IngestReport {
        pages_crawled: pages.len(),
        ..Default::default()
    };

    for page in &pages {
        match store.get_document_by_url(page.url.as_str()).await {
            Ok(Some(_)) => {
                info!(url = %page.url, "document already stored, skipping");
                report.documents_skipped += 1;
                continue;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(url = %page.url, error = %err, "duplicate check failed");
                report.pages_failed += 1;
                continue;
            }
        }

        let chunks = chunker.chunk(&page.content);
        if chunks.is_empty() {
            info!(url = %page.url, "page produced no chunks, skipping");
            report.documents_skipped += 1;
            continue;
        }

        match store.add_document(page, &chunks).await {
            Ok(_) => {
                report.documents_added += 1;
                report.chunks_added += chunks.len();
            }
            Err(err) => {
                warn!(url = %page.url, error = %err, "failed to store page");
                report.pages_failed += 1;
            }
        }
    }

    info!(
        crawled = report.pages_crawled,
        added = report.documents_added,
        skipped = report.documents_skipped,
        failed = report.pages_failed,
        chunks = report.chunks_added,
        "ingestion finished"
    );
    Ok(report)
}
