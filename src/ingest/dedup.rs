//! Duplicate detection: each distinct content string is stored at most once.

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::store::KnowledgeStore;

/// Decides whether a chunk already exists, combining an in-run seen-set
/// with the store's persistent existence check.
///
/// The persistent check is fail-open: when it errors, the chunk is treated
/// as new and the uncertainty is logged — ingestion availability outranks
/// strict duplicate prevention, and the store's unique hash constraint is
/// the backstop for anything that slips through.
pub struct Deduplicator {
    seen: Mutex<FxHashSet<String>>,
    store: Arc<dyn KnowledgeStore>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            seen: Mutex::new(FxHashSet::default()),
            store,
        }
    }

    /// Whether a chunk with this hash already exists.
    ///
    /// Regardless of the outcome the hash joins the in-run set, so a
    /// duplicate appearing twice in the same run is always caught locally
    /// without a second remote check.
    pub async fn is_duplicate(&self, content_hash: &str) -> bool {
        if self.seen.lock().contains(content_hash) {
            debug!(content_hash, "duplicate within the current run");
            return true;
        }

        let duplicate = match self.store.exists(content_hash).await {
            Ok(exists) => exists,
            Err(err) => {
                warn!(
                    content_hash,
                    error = %err,
                    "existence check failed; treating chunk as new (fail-open)"
                );
                false
            }
        };

        self.seen.lock().insert(content_hash.to_string());
        duplicate
    }

    /// Number of distinct hashes observed in this run.
    pub fn seen_count(&self) -> usize {
        self.seen.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KnowledgeChunk, NewChunk, ScoredChunk, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store double: configurable existence answer, counts remote checks.
    struct ExistsStore {
        answer: Result<bool, ()>,
        checks: AtomicUsize,
    }

    #[async_trait]
    impl KnowledgeStore for ExistsStore {
        async fn submit(&self, _chunk: NewChunk) -> Result<KnowledgeChunk, StoreError> {
            unimplemented!("not used by dedup tests")
        }

        async fn exists(&self, _hash: &str) -> Result<bool, StoreError> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            self.answer
                .map_err(|()| StoreError::Transport("connection refused".into()))
        }

        async fn search_semantic(
            &self,
            _embedding: &[f32],
            _limit: usize,
        ) -> Result<Vec<ScoredChunk>, StoreError> {
            Ok(Vec::new())
        }

        async fn search_lexical(
            &self,
            _query: &str,
            _limit: usize,
        ) -> Result<Vec<ScoredChunk>, StoreError> {
            Ok(Vec::new())
        }

        async fn clear_source(&self, _source: &str) -> Result<usize, StoreError> {
            Ok(0)
        }

        async fn count(&self) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn trusts_the_persistent_check() {
        let dedup = Deduplicator::new(Arc::new(ExistsStore {
            answer: Ok(true),
            checks: AtomicUsize::new(0),
        }));
        assert!(dedup.is_duplicate("abc").await);
    }

    #[tokio::test]
    async fn same_run_repeat_skips_the_remote_check() {
        let store = Arc::new(ExistsStore {
            answer: Ok(false),
            checks: AtomicUsize::new(0),
        });
        let dedup = Deduplicator::new(store.clone());

        assert!(!dedup.is_duplicate("abc").await);
        assert!(dedup.is_duplicate("abc").await);
        assert_eq!(store.checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn check_failure_is_fail_open() {
        let dedup = Deduplicator::new(Arc::new(ExistsStore {
            answer: Err(()),
            checks: AtomicUsize::new(0),
        }));
        assert!(!dedup.is_duplicate("abc").await);
        // The hash still joined the in-run set.
        assert!(dedup.is_duplicate("abc").await);
    }
}
