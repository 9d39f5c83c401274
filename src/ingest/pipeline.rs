//! The batched ingestion run: raw text in, counters out.
//!
//! Items within a batch run concurrently and independently; a short pause
//! separates batches to respect upstream provider and store rate limits.
//! There is no cross-item transaction: partial completion is expected and
//! tracked purely through the saved/skipped/failed counters.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::embedding::guard::ensure_dimension;
use crate::embedding::provider::EmbeddingProvider;
use crate::ingest::dedup::Deduplicator;
use crate::ingest::delivery::{DeliveryPolicy, IngestionClient};
use crate::ingest::hash::content_hash;
use crate::normalize::{clean_chunk_text, clean_raw_text, split_into_windows, validate_chunk};
use crate::store::{KnowledgeStore, NewChunk, StoreError};
use crate::types::{IngestFailure, KbError};

/// Outcome counters of an ingestion run.
///
/// Each chunk lands in exactly one counter: stored, skipped (filtered or
/// duplicate), or failed after exhausting delivery attempts. The first
/// failure is retained for diagnostics while processing continues.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub first_error: Option<IngestFailure>,
}

impl IngestReport {
    /// Total chunks considered by the run.
    pub fn total(&self) -> usize {
        self.saved + self.skipped + self.failed
    }

    /// Fold another report into this one, keeping the earliest error.
    pub fn merge(&mut self, other: IngestReport) {
        self.saved += other.saved;
        self.skipped += other.skipped;
        self.failed += other.failed;
        if self.first_error.is_none() {
            self.first_error = other.first_error;
        }
    }
}

/// A curated question/answer pair ingested as a single record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

/// One chunk ready for the per-item stage.
struct PreparedChunk {
    index: usize,
    text: String,
    content_hash: String,
    metadata: serde_json::Value,
}

enum ItemOutcome {
    Saved,
    Skipped,
    Failed(IngestFailure),
}

/// Write-path orchestrator: normalize → dedup → guard → deliver.
pub struct IngestionPipeline {
    provider: Arc<dyn EmbeddingProvider>,
    client: IngestionClient,
    dedup: Deduplicator,
    store: Arc<dyn KnowledgeStore>,
    config: EngineConfig,
}

impl IngestionPipeline {
    /// Build a pipeline over a store and an embedding provider.
    ///
    /// Fails with a configuration error when the provider's dimension does
    /// not match the configured one — catching a model change before any
    /// write, rather than at the store boundary.
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: EngineConfig,
    ) -> Result<Self, KbError> {
        config.validate()?;
        if provider.dimension() != config.embedding_dimension {
            return Err(KbError::Configuration(format!(
                "embedding provider produces {}-dimensional vectors, configured dimension is {}",
                provider.dimension(),
                config.embedding_dimension
            )));
        }
        Ok(Self {
            provider,
            client: IngestionClient::new(
                store.clone(),
                DeliveryPolicy {
                    max_attempts: config.max_delivery_attempts,
                    base_delay: config.retry_base_delay,
                    max_jitter: config.retry_max_jitter,
                },
            ),
            dedup: Deduplicator::new(store.clone()),
            store,
            config,
        })
    }

    /// Ingest one raw document under `source`, attaching `base_metadata` to
    /// every stored chunk.
    pub async fn ingest_document(
        &self,
        raw: &str,
        source: &str,
        base_metadata: &serde_json::Value,
    ) -> IngestReport {
        let cleaned = clean_raw_text(raw);
        let windows = split_into_windows(
            &cleaned,
            self.config.chunk_target_chars,
            self.config.chunk_overlap_chars,
        );

        let mut report = IngestReport::default();
        let mut prepared = Vec::with_capacity(windows.len());

        for (index, window) in windows.iter().enumerate() {
            let text = clean_chunk_text(window);
            if let Err(rejection) = validate_chunk(&text) {
                debug!(source, index, %rejection, "chunk filtered");
                report.skipped += 1;
                continue;
            }

            let mut metadata = base_metadata.clone();
            if let serde_json::Value::Object(map) = &mut metadata {
                map.insert("chunkIndex".to_string(), json!(index));
            }
            let content_hash = content_hash(&text);
            prepared.push(PreparedChunk {
                index,
                text,
                content_hash,
                metadata,
            });
        }

        self.run_batches(source, prepared, &mut report).await;

        info!(
            source,
            saved = report.saved,
            skipped = report.skipped,
            failed = report.failed,
            "ingestion run finished"
        );
        report
    }

    /// Ingest curated question/answer pairs under `source`.
    ///
    /// Pairs bypass the prose quality heuristics (they are hand-written and
    /// often short) but flow through the same dedup, guard, and delivery
    /// stages as document chunks.
    pub async fn ingest_qa_pairs(&self, pairs: &[QaPair], source: &str) -> IngestReport {
        let mut report = IngestReport::default();
        let mut prepared = Vec::with_capacity(pairs.len());

        for (index, pair) in pairs.iter().enumerate() {
            let text = clean_chunk_text(&format!(
                "Pregunta: {}\nRespuesta: {}",
                pair.question, pair.answer
            ));
            if text.is_empty() {
                report.skipped += 1;
                continue;
            }
            let content_hash = content_hash(&text);
            prepared.push(PreparedChunk {
                index,
                text,
                content_hash,
                metadata: json!({ "kind": "qa", "question": pair.question.clone() }),
            });
        }

        self.run_batches(source, prepared, &mut report).await;
        info!(
            source,
            saved = report.saved,
            skipped = report.skipped,
            failed = report.failed,
            "qa ingestion finished"
        );
        report
    }

    /// Delete every chunk of `source` so it can be re-ingested from scratch.
    pub async fn clear_source(&self, source: &str) -> Result<usize, StoreError> {
        let deleted = self.store.clear_source(source).await?;
        info!(source, deleted, "cleared source");
        Ok(deleted)
    }

    async fn run_batches(
        &self,
        source: &str,
        prepared: Vec<PreparedChunk>,
        report: &mut IngestReport,
    ) {
        let batch_count = prepared.len().div_ceil(self.config.batch_size.max(1));
        for (batch_index, batch) in prepared.chunks(self.config.batch_size.max(1)).enumerate() {
            let outcomes = join_all(batch.iter().map(|item| self.process_item(source, item))).await;

            for outcome in outcomes {
                match outcome {
                    ItemOutcome::Saved => report.saved += 1,
                    ItemOutcome::Skipped => report.skipped += 1,
                    ItemOutcome::Failed(failure) => {
                        report.failed += 1;
                        if report.first_error.is_none() {
                            report.first_error = Some(failure);
                        }
                    }
                }
            }

            if batch_index + 1 < batch_count && !self.config.batch_pause.is_zero() {
                tokio::time::sleep(self.config.batch_pause).await;
            }
        }
    }

    async fn process_item(&self, source: &str, item: &PreparedChunk) -> ItemOutcome {
        if self.dedup.is_duplicate(&item.content_hash).await {
            debug!(source, index = item.index, "duplicate chunk skipped");
            return ItemOutcome::Skipped;
        }

        let embedding = match tokio::time::timeout(
            self.config.request_timeout,
            self.provider.embed(&item.text),
        )
        .await
        {
            Ok(Ok(embedding)) => embedding,
            Ok(Err(err)) => {
                warn!(source, index = item.index, error = %err, "embedding failed");
                return ItemOutcome::Failed(IngestFailure::from_message(
                    source,
                    item.index,
                    err.to_string(),
                ));
            }
            Err(_) => {
                warn!(source, index = item.index, "embedding timed out");
                return ItemOutcome::Failed(IngestFailure::from_message(
                    source,
                    item.index,
                    format!("embedding timed out after {:?}", self.config.request_timeout),
                ));
            }
        };

        if let Err(err) = ensure_dimension(&embedding, self.config.embedding_dimension) {
            // Configuration-class failure: abort this write before it can
            // reach the store, and say so loudly.
            error!(source, index = item.index, error = %err, "dimension guard rejected write");
            return ItemOutcome::Failed(IngestFailure::from_message(
                source,
                item.index,
                err.to_string(),
            ));
        }

        let chunk = NewChunk::new(item.text.clone(), source, item.content_hash.clone())
            .with_metadata(item.metadata.clone())
            .with_embedding(embedding);

        match self.client.deliver(chunk).await {
            Ok(_) => ItemOutcome::Saved,
            Err(StoreError::Conflict(_)) => {
                // The unique-hash backstop caught a duplicate that slipped
                // past the fail-open existence check.
                debug!(source, index = item.index, "store reported duplicate");
                ItemOutcome::Skipped
            }
            Err(err) => {
                warn!(source, index = item.index, error = %err, "delivery exhausted retries");
                ItemOutcome::Failed(IngestFailure::from_store_error(source, item.index, &err))
            }
        }
    }
}
