//! # webrag
//!
//! A web-scraping retrieval-augmented generation (RAG) service.
//!
//! webrag crawls a website breadth-first, splits each page into
//! semantically merged chunks, embeds them, and stores everything in
//! SQLite. Stored chunks back cosine-similarity search and a
//! retrieval-augmented chatbot, exposed via a CLI and a JSON HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────┐
//! │ Crawler  │──▶│   Pipeline   │──▶│  SQLite   │
//! │ BFS/host │   │ Chunk+Embed  │   │ f32 BLOBs │
//! └──────────┘   └──────────────┘   └────┬──────┘
//!                                        │
//!                    ┌───────────────────┤
//!                    ▼                   ▼
//!               ┌──────────┐       ┌──────────┐
//!               │   CLI    │       │   HTTP   │
//!               │ (webrag) │       │ (axum)   │
//!               └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! webrag init                               # create database
//! webrag crawl https://docs.example.com     # scrape and index a site
//! webrag search "deployment steps"          # semantic search
//! webrag stats                              # store counters
//! webrag serve                              # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`crawler`] | Domain-scoped BFS web crawler |
//! | [`chunker`] | Structural split + similarity merge chunking |
//! | [`embedding`] | Embedding provider abstraction and retry client |
//! | [`store`] | SQLite vector store and similarity search |
//! | [`ingest`] | Crawl-to-store pipeline |
//! | [`chat`] | Retrieval-augmented chat engine |
//! | [`server`] | JSON HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chat;
pub mod chunker;
pub mod config;
pub mod crawler;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod server;
pub mod store;
