//! The fused ranking algorithm and its degradation chain.
//!
//! Semantic similarity captures paraphrase and conceptual overlap; lexical
//! matching captures exact technical terms (law numbers, acronyms,
//! thresholds) that embeddings blur together. Fusing both with a tunable
//! weight lets the balance be adjusted per corpus without re-embedding.

use rustc_hash::FxHashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::embedding::cache::QueryEmbedder;
use crate::store::{KnowledgeChunk, KnowledgeStore, ScoredChunk, StoreError};

/// Ranks stored chunks against a free-text question.
///
/// Failures never escape: a failed signal degrades the ranking to whatever
/// signal survives, and when nothing survives the result is simply empty.
/// Callers treat an empty result as "no relevant knowledge found" — a
/// normal outcome, not an error.
pub struct HybridRetriever {
    store: Arc<dyn KnowledgeStore>,
    embedder: QueryEmbedder,
    config: EngineConfig,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: QueryEmbedder,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Wire a retriever with a fresh query-embedding cache sized from the
    /// config. Reach the cache through [`HybridRetriever::embedder`] to
    /// spawn a sweeper or inspect it.
    pub fn with_provider(
        store: Arc<dyn KnowledgeStore>,
        provider: Arc<dyn crate::embedding::provider::EmbeddingProvider>,
        config: EngineConfig,
    ) -> Self {
        let cache = Arc::new(crate::embedding::cache::EmbeddingCache::new(
            config.cache_ttl,
            config.cache_capacity,
        ));
        let embedder = QueryEmbedder::new(provider, cache, config.request_timeout);
        Self::new(store, embedder, config)
    }

    /// The query embedder (and through it, the cache) in use.
    pub fn embedder(&self) -> &QueryEmbedder {
        &self.embedder
    }

    /// Top results for `query` using the configured default limit.
    pub async fn ask(&self, query: &str) -> Vec<KnowledgeChunk> {
        self.retrieve(query, self.config.top_k).await
    }

    /// Top `limit` results for `query`. Ranking order is the contract; raw
    /// scores stay internal.
    pub async fn retrieve(&self, query: &str, limit: usize) -> Vec<KnowledgeChunk> {
        self.retrieve_with_scores(query, limit)
            .await
            .into_iter()
            .map(|scored| scored.chunk)
            .collect()
    }

    /// Ranked results with their hybrid scores, for diagnostics and tests.
    pub async fn retrieve_with_scores(&self, query: &str, limit: usize) -> Vec<ScoredChunk> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }
        let pool = self.config.candidate_pool.max(limit);

        // Embedding-leg failure degrades to lexical-only ranking; an empty
        // vector is never sent to the store.
        let embedding = match self.embedder.embed_query(query).await {
            Ok(vector) => Some(vector),
            Err(err) => {
                warn!(error = %err, "query embedding failed; degrading to lexical-only");
                None
            }
        };

        let semantic = match &embedding {
            Some(vector) => {
                self.guarded("semantic", self.store.search_semantic(vector, pool))
                    .await
            }
            None => None,
        };
        let lexical = self
            .guarded("lexical", self.store.search_lexical(query, pool))
            .await;

        match (semantic, lexical) {
            (Some(semantic), Some(lexical)) => fuse(
                semantic,
                lexical,
                self.config.semantic_weight,
                limit,
            ),
            // One signal failed outright: rank purely by the survivor.
            (Some(single), None) | (None, Some(single)) => rank_single(single, limit),
            (None, None) => {
                warn!("all retrieval signals failed; returning empty result");
                Vec::new()
            }
        }
    }

    /// Run one store signal under the query-path timeout, converting any
    /// failure into signal absence for the degradation chain.
    async fn guarded(
        &self,
        signal: &str,
        call: impl Future<Output = Result<Vec<ScoredChunk>, StoreError>>,
    ) -> Option<Vec<ScoredChunk>> {
        match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(Ok(rows)) => {
                debug!(signal, candidates = rows.len(), "signal resolved");
                Some(rows)
            }
            Ok(Err(err)) => {
                warn!(signal, error = %err, "signal failed; degrading");
                None
            }
            Err(_) => {
                warn!(signal, "signal timed out; degrading");
                None
            }
        }
    }
}

/// Fuse the two candidate sets into one ranking.
///
/// Lexical scores are normalized by this query's own maximum, bounding the
/// lexical contribution to `[0, 1]` relative to the query; semantic scores
/// are used as-is. The candidate set is the union keyed by chunk id — one
/// non-zero signal is enough for eligibility. Ties break on the chunk id so
/// the ranking is deterministic.
fn fuse(
    semantic: Vec<ScoredChunk>,
    lexical: Vec<ScoredChunk>,
    semantic_weight: f32,
    limit: usize,
) -> Vec<ScoredChunk> {
    let lexical_max = lexical
        .iter()
        .map(|scored| scored.score)
        .fold(0.0f32, f32::max);

    let mut candidates: FxHashMap<String, (KnowledgeChunk, f32, f32)> = FxHashMap::default();
    for scored in semantic {
        candidates.insert(scored.chunk.id.clone(), (scored.chunk, scored.score, 0.0));
    }
    for scored in lexical {
        let normalized = if lexical_max > 0.0 {
            scored.score / lexical_max
        } else {
            0.0
        };
        candidates
            .entry(scored.chunk.id.clone())
            .and_modify(|(_, _, lex)| *lex = normalized)
            .or_insert((scored.chunk, 0.0, normalized));
    }

    let mut ranked: Vec<ScoredChunk> = candidates
        .into_values()
        .map(|(chunk, sem, lex)| ScoredChunk {
            chunk,
            score: semantic_weight * sem + (1.0 - semantic_weight) * lex,
        })
        .collect();

    sort_ranked(&mut ranked);
    ranked.truncate(limit);
    ranked
}

/// Pure single-signal ordering used when the other signal failed.
fn rank_single(mut candidates: Vec<ScoredChunk>, limit: usize) -> Vec<ScoredChunk> {
    sort_ranked(&mut candidates);
    candidates.truncate(limit);
    candidates
}

fn sort_ranked(ranked: &mut [ScoredChunk]) {
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}
