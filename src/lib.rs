//! ```text
//! Raw text ──► normalize::clean_raw_text ──► overlapping windows
//!                                                  │
//!                       normalize::filter ◄────────┤ (quality screen)
//!                                                  │
//! ingest::hash ──► ingest::dedup ──► embedding ──► guard ──► ingest::delivery
//!                                                  │
//!                                    stores: SQLite (sqlite-vec + FTS5) / REST
//!
//! Question ──► embedding::cache ──► retrieve::HybridRetriever
//!                                       │
//!                        semantic ◄─────┴─────► lexical
//!                                       │
//!                          fused, deterministic top-K
//! ```
//!
//! # kbsmith
//!
//! Knowledge ingestion and hybrid retrieval engine for retrieval-augmented
//! assistants: raw documents and Q&A pairs become deduplicated, validated,
//! embedded records; questions are answered by fusing semantic (vector) and
//! lexical (full-text) relevance into one deterministic ranking.
//!
//! The engine is built around partial failure. On the write path every
//! chunk succeeds, is skipped, or fails on its own — a run never aborts
//! because one item failed. On the read path a failed signal degrades the
//! ranking instead of surfacing an error, down to an empty result when
//! nothing survives.
//!
//! ## Modules
//!
//! - [`normalize`] — cleaning transforms, windowed chunking, quality filter
//! - [`ingest`] — content hashing, dedup, retrying delivery, batched runs
//! - [`embedding`] — provider trait, query cache, dimension guard
//! - [`retrieve`] — hybrid fusion and the degradation chain
//! - [`store`] — `KnowledgeStore` trait with SQLite and REST backends
//! - [`config`] — engine configuration and env loading
//! - [`types`] — error taxonomy and diagnostics

pub mod config;
pub mod embedding;
pub mod ingest;
pub mod normalize;
pub mod retrieve;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use embedding::{
    EmbeddingCache, EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider, QueryEmbedder,
};
pub use ingest::{IngestReport, IngestionPipeline, QaPair};
pub use retrieve::HybridRetriever;
pub use store::{
    KnowledgeChunk, KnowledgeStore, NewChunk, RestKnowledgeStore, ScoredChunk,
    SqliteKnowledgeStore, StoreError,
};
pub use types::{IngestFailure, KbError};
