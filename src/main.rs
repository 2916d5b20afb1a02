//! # webrag CLI
//!
//! The `webrag` binary drives the crawl/search/chat service from the
//! command line.
//!
//! ## Usage
//!
//! ```bash
//! webrag --config ./config/webrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `webrag init` | Create the SQLite database and run schema migrations |
//! | `webrag crawl <url>` | Crawl a website and index its pages |
//! | `webrag search "<query>"` | Semantic search over stored chunks |
//! | `webrag stats` | Print store counters |
//! | `webrag serve` | Start the JSON HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use webrag::chunker::TextChunker;
use webrag::crawler::WebCrawler;
use webrag::embedding::EmbeddingClient;
use webrag::store::VectorStore;
use webrag::{config, db, ingest, migrate, server};

/// webrag CLI — crawl websites into a local vector store and query them
/// with semantic search or retrieval-augmented chat.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/webrag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "webrag",
    about = "webrag — crawl websites into a local vector store and query them",
    version,
    long_about = "webrag crawls a website breadth-first, chunks and embeds each page, and \
    stores everything in SQLite. Stored chunks back cosine-similarity search and a \
    retrieval-augmented chatbot, exposed via this CLI and a JSON HTTP API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/webrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the documents and chunks
    /// tables. This command is idempotent — running it multiple times
    /// is safe.
    Init,

    /// Crawl a website and index its pages.
    ///
    /// Runs a breadth-first crawl scoped to the start URL's host, chunks
    /// and embeds every new page, and stores the results. Pages already
    /// in the store are skipped.
    Crawl {
        /// Start URL (http or https).
        url: String,

        /// Override the configured crawl depth.
        #[arg(long)]
        max_depth: Option<usize>,

        /// Override the configured page cap.
        #[arg(long)]
        max_pages: Option<usize>,
    },

    /// Semantic search over stored chunks.
    ///
    /// Embeds the query and ranks stored chunks by cosine similarity.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum similarity in [0.0, 1.0].
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Print document and chunk counters.
    Stats,

    /// Start the JSON HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and serves
    /// the scraping, search, and chat endpoints.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("webrag=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Crawl {
            url,
            max_depth,
            max_pages,
        } => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;

            let mut crawler_config = cfg.crawler.clone();
            if let Some(depth) = max_depth {
                crawler_config.max_depth = depth;
            }
            if let Some(pages) = max_pages {
                crawler_config.max_pages = pages;
            }

            let crawler = WebCrawler::new(&crawler_config)?;
            let chunker = TextChunker::new(&cfg.chunking);
            let embeddings = EmbeddingClient::from_config(&cfg.embedding)?;
            let store = VectorStore::new(pool, embeddings, cfg.embedding.batch_size);

            let report = ingest::run_ingest(&crawler, &chunker, &store, &url).await?;
            println!(
                "Crawled {} pages: {} added, {} skipped, {} failed ({} chunks).",
                report.pages_crawled,
                report.documents_added,
                report.documents_skipped,
                report.pages_failed,
                report.chunks_added
            );
        }
        Commands::Search {
            query,
            limit,
            threshold,
        } => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;

            let embeddings = EmbeddingClient::from_config(&cfg.embedding)?;
            let store = VectorStore::new(pool, embeddings, cfg.embedding.batch_size);

            let limit = limit.unwrap_or(cfg.search.max_results);
            let threshold = threshold.unwrap_or(cfg.search.similarity_threshold);
            let results = store.semantic_search(&query, limit, threshold).await?;

            if results.is_empty() {
                println!("No results above similarity {:.2}.", threshold);
            }
            for (i, result) in results.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} — {}",
                    i + 1,
                    result.similarity,
                    result.document_title,
                    result.document_url
                );
                let preview: String = result.content.chars().take(200).collect();
                println!("   {}", preview);
            }
        }
        Commands::Stats => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;

            let embeddings = EmbeddingClient::from_config(&cfg.embedding)?;
            let store = VectorStore::new(pool, embeddings, cfg.embedding.batch_size);
            let stats = store.stats().await?;

            println!("Documents: {}", stats.total_documents);
            println!("Chunks:    {}", stats.total_chunks);
            println!("Avg chunks per document: {:.2}", stats.avg_chunks_per_doc);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
