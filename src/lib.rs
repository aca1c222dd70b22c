//! newsmill: a content intelligence pipeline for syndicated feeds.
//!
//! Raw RSS/Atom items flow through ingestion, deduplication, polite
//! content extraction, image caching, spam filtering, and explainable
//! scoring, ending up as `Article` records in SQLite.

pub mod config;
pub mod dedup;
pub mod extract;
pub mod image;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod runner;
pub mod score;
pub mod spam;
pub mod storage;
