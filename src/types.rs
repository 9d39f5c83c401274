//! Crate-wide error taxonomy and shared diagnostic types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::embedding::provider::EmbedError;
use crate::store::StoreError;

/// Top-level error for knowledge-base operations.
///
/// Ingestion treats these classes very differently: validation failures and
/// duplicates are counted and skipped, transient upstream failures are
/// retried, and configuration failures abort the affected write loudly
/// without touching stored data.
#[derive(Debug, thiserror::Error)]
pub enum KbError {
    /// A chunk failed the quality heuristics; skipped, never delivered.
    #[error("chunk failed quality validation: {0}")]
    Validation(String),

    /// Fatal configuration-class failure (e.g. embedding dimension mismatch,
    /// missing credentials). Distinct from provider/network errors.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Failure reported by a knowledge store collaborator.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Failure reported by an embedding provider.
    #[error(transparent)]
    Embedding(#[from] EmbedError),

    /// An external call exceeded its explicit budget.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Diagnostic retained for the first failed item of an ingestion run.
///
/// Processing continues for the remaining items; this record exists purely
/// for operator visibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestFailure {
    /// Origin identifier of the document being ingested.
    pub source: String,
    /// Zero-based index of the failing chunk within its document.
    pub chunk_index: usize,
    /// HTTP status carried by the failure, when one exists.
    pub status: Option<u16>,
    /// Human-readable failure message.
    pub message: String,
    /// Truncated response body, when the failure carried one.
    pub body_snippet: Option<String>,
}

impl IngestFailure {
    /// Maximum retained length of a response body snippet.
    pub const MAX_BODY_SNIPPET: usize = 256;

    pub(crate) fn from_store_error(source: &str, chunk_index: usize, err: &StoreError) -> Self {
        Self {
            source: source.to_string(),
            chunk_index,
            status: err.status(),
            message: err.to_string(),
            body_snippet: err.body_snippet().map(|body| {
                let mut snippet = body.to_string();
                if snippet.len() > Self::MAX_BODY_SNIPPET {
                    let mut cut = Self::MAX_BODY_SNIPPET;
                    while cut > 0 && !snippet.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    snippet.truncate(cut);
                }
                snippet
            }),
        }
    }

    pub(crate) fn from_message(source: &str, chunk_index: usize, message: String) -> Self {
        Self {
            source: source.to_string(),
            chunk_index,
            status: None,
            message,
            body_snippet: None,
        }
    }
}
