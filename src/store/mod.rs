//! Knowledge store collaborators: persistence for chunks, their vectors,
//! and the auto-maintained lexical index.
//!
//! The [`KnowledgeStore`] trait abstracts over the supported backends so the
//! ingestion pipeline and the hybrid retriever never depend on a specific
//! database:
//!
//! ```text
//!                    ┌────────────────────┐
//!                    │  KnowledgeStore    │
//!                    │  (async trait)     │
//!                    └─────────┬──────────┘
//!                              │
//!                   ┌──────────┴──────────┐
//!                   ▼                     ▼
//!            ┌─────────────┐       ┌─────────────┐
//!            │   SQLite    │       │    REST     │
//!            │ sqlite-vec  │       │   service   │
//!            │   + FTS5    │       │  (reqwest)  │
//!            └─────────────┘       └─────────────┘
//! ```
//!
//! Both backends honor the same semantics: at most one chunk per content
//! hash (UNIQUE constraint as the backstop behind the caller-side existence
//! check), a lexical index kept in sync on every content write, and vectors
//! queryable by cosine distance.

pub mod rest;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use rest::RestKnowledgeStore;
pub use sqlite::SqliteKnowledgeStore;

// ── Records ────────────────────────────────────────────────────────────

/// A chunk prepared for submission: validated, deduplicated, embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChunk {
    /// Flattened chunk text (single line, single spaces).
    pub content: String,
    /// Origin identifier: a document name or logical bucket.
    pub source: String,
    /// Open key/value metadata; always carries `contentHash`.
    pub metadata: serde_json::Value,
    /// Deterministic fingerprint of `content`; the deduplication identity.
    pub content_hash: String,
    /// Embedding vector, when one was computed.
    pub embedding: Option<Vec<f32>>,
}

impl NewChunk {
    /// Create a chunk record with empty metadata.
    pub fn new(
        content: impl Into<String>,
        source: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            metadata: serde_json::Value::Object(Default::default()),
            content_hash: content_hash.into(),
            embedding: None,
        }
    }

    /// Attach metadata. The `contentHash` key is filled in from the record's
    /// hash if the map does not already carry one.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self.ensure_hash_in_metadata();
        self
    }

    /// Attach the embedding vector.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub(crate) fn ensure_hash_in_metadata(&mut self) {
        if let serde_json::Value::Object(map) = &mut self.metadata {
            map.entry("contentHash".to_string())
                .or_insert_with(|| serde_json::Value::String(self.content_hash.clone()));
        }
    }
}

/// A chunk as persisted by a store. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeChunk {
    /// Store-assigned identifier; also the deterministic ranking tie-break.
    pub id: String,
    pub content: String,
    pub source: String,
    pub metadata: serde_json::Value,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A chunk paired with one retrieval signal's raw score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    #[serde(flatten)]
    pub chunk: KnowledgeChunk,
    /// Signal-specific relevance; higher is more relevant. Semantic scores
    /// are `1 - cosine_distance`; lexical scores are backend rank scores.
    pub score: f32,
}

// ── Errors ─────────────────────────────────────────────────────────────

/// Failure reported by a knowledge store collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The service answered with a non-success HTTP status.
    #[error("store request failed with status {status}: {message}")]
    Http {
        status: u16,
        message: String,
        body: Option<String>,
    },

    /// The request never produced a status (connect failure, timeout at the
    /// transport level, connection reset).
    #[error("store transport failure: {0}")]
    Transport(String),

    /// A chunk with the same content hash already exists. Not a true error:
    /// callers count it as a skipped duplicate.
    #[error("duplicate content hash {0}")]
    Conflict(String),

    /// Local storage failure (SQLite error, corrupt index state).
    #[error("storage error: {0}")]
    Storage(String),

    /// Payload could not be encoded or a response could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// HTTP status carried by this failure, when one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Response body carried by this failure, when one exists.
    pub fn body_snippet(&self) -> Option<&str> {
        match self {
            StoreError::Http { body, .. } => body.as_deref(),
            _ => None,
        }
    }

    /// Whether a delivery failing with this error should be retried.
    ///
    /// Retryable: request timeout (408), too-many-requests (429), the 5xx
    /// server-error family, and transport failures with no status at all.
    /// Everything else is terminal and surfaces immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Transport(_) => true,
            StoreError::Http { status, .. } => {
                matches!(status, 408 | 429) || (500..=599).contains(status)
            }
            _ => false,
        }
    }
}

// ── Trait ──────────────────────────────────────────────────────────────

/// Backend-agnostic interface to a knowledge store.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Persist a chunk. Fails with [`StoreError::Conflict`] when a chunk
    /// with the same content hash already exists.
    async fn submit(&self, chunk: NewChunk) -> Result<KnowledgeChunk, StoreError>;

    /// Whether a chunk with this content hash exists. Callers treat any
    /// failure of this check as `false` (fail-open).
    async fn exists(&self, content_hash: &str) -> Result<bool, StoreError>;

    /// Chunks with embeddings ranked by semantic similarity to the query
    /// vector (`1 - cosine_distance`, descending).
    async fn search_semantic(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    /// Chunks whose lexical index matches the query, ranked by the
    /// backend's full-text relevance (descending). Chunks with no match are
    /// simply absent.
    async fn search_lexical(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    /// Delete every chunk belonging to `source`; returns the deleted count.
    /// Used to safely re-ingest one source without disturbing the rest.
    async fn clear_source(&self, source: &str) -> Result<usize, StoreError>;

    /// Total number of stored chunks.
    async fn count(&self) -> Result<usize, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for status in [408u16, 429, 500, 503, 599] {
            let err = StoreError::Http {
                status,
                message: "boom".into(),
                body: None,
            };
            assert!(err.is_retryable(), "status {status} should be retryable");
        }
    }

    #[test]
    fn terminal_statuses() {
        for status in [400u16, 401, 404, 409, 422] {
            let err = StoreError::Http {
                status,
                message: "boom".into(),
                body: None,
            };
            assert!(!err.is_retryable(), "status {status} should be terminal");
        }
    }

    #[test]
    fn transport_failures_are_retryable() {
        assert!(StoreError::Transport("connection reset".into()).is_retryable());
    }

    #[test]
    fn conflicts_are_terminal() {
        assert!(!StoreError::Conflict("abc".into()).is_retryable());
    }

    #[test]
    fn metadata_always_carries_the_hash() {
        let mut chunk = NewChunk::new("texto", "manual", "deadbeef")
            .with_metadata(serde_json::json!({"topic": "velocidad"}));
        chunk.ensure_hash_in_metadata();
        assert_eq!(chunk.metadata["contentHash"], "deadbeef");
        assert_eq!(chunk.metadata["topic"], "velocidad");
    }

    #[test]
    fn existing_hash_in_metadata_is_preserved() {
        let chunk = NewChunk::new("texto", "manual", "deadbeef")
            .with_metadata(serde_json::json!({"contentHash": "caller-provided"}));
        assert_eq!(chunk.metadata["contentHash"], "caller-provided");
    }
}
