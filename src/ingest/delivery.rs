//! Reliable delivery of a single validated, non-duplicate chunk.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::store::{KnowledgeChunk, KnowledgeStore, NewChunk, StoreError};

/// Retry policy for chunk delivery.
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    /// Total attempts, first try included.
    pub max_attempts: u32,
    /// Base unit of the linearly increasing backoff.
    pub base_delay: Duration,
    /// Upper bound of the random jitter added to every delay, breaking up
    /// synchronized retry storms across concurrently failing chunks.
    pub max_jitter: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_millis(500),
            max_jitter: Duration::from_millis(200),
        }
    }
}

impl DeliveryPolicy {
    /// Delay before the attempt following `completed_attempts` failures:
    /// `base_delay * n + jitter`, so the minimum delay never decreases.
    fn delay_after(&self, completed_attempts: u32) -> Duration {
        let jitter_ms = if self.max_jitter.is_zero() {
            0
        } else {
            rand::rng().random_range(0..=self.max_jitter.as_millis() as u64)
        };
        self.base_delay * completed_attempts + Duration::from_millis(jitter_ms)
    }
}

/// Delivers chunks to a knowledge store with bounded, jittered retries.
pub struct IngestionClient {
    store: Arc<dyn KnowledgeStore>,
    policy: DeliveryPolicy,
}

impl IngestionClient {
    pub fn new(store: Arc<dyn KnowledgeStore>, policy: DeliveryPolicy) -> Self {
        Self { store, policy }
    }

    /// Deliver one chunk.
    ///
    /// Retryable failures (timeout, too-many-requests, 5xx, transport) are
    /// retried up to the policy's attempt budget with linearly increasing,
    /// jittered delays; any other failure is terminal and surfaces
    /// immediately. The sleep is scoped to this item and never blocks
    /// sibling items in the same batch.
    pub async fn deliver(&self, chunk: NewChunk) -> Result<KnowledgeChunk, StoreError> {
        let mut attempt = 1u32;
        loop {
            match self.store.submit(chunk.clone()).await {
                Ok(stored) => {
                    debug!(
                        content_hash = %stored.content_hash,
                        attempt,
                        "chunk delivered"
                    );
                    return Ok(stored);
                }
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        content_hash = %chunk.content_hash,
                        attempt,
                        status = ?err.status(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "delivery failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ScoredChunk;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Store double failing a fixed number of times before succeeding, or
    /// always failing with a fixed error.
    struct FlakyStore {
        attempts: AtomicU32,
        fail_first: u32,
        error: fn() -> StoreError,
    }

    impl FlakyStore {
        fn always(error: fn() -> StoreError) -> Self {
            Self {
                attempts: AtomicU32::new(0),
                fail_first: u32::MAX,
                error,
            }
        }

        fn failing_first(n: u32, error: fn() -> StoreError) -> Self {
            Self {
                attempts: AtomicU32::new(0),
                fail_first: n,
                error,
            }
        }
    }

    #[async_trait]
    impl KnowledgeStore for FlakyStore {
        async fn submit(&self, chunk: NewChunk) -> Result<KnowledgeChunk, StoreError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_first {
                return Err((self.error)());
            }
            Ok(KnowledgeChunk {
                id: "id-1".into(),
                content: chunk.content,
                source: chunk.source,
                metadata: chunk.metadata,
                content_hash: chunk.content_hash,
                created_at: Utc::now(),
            })
        }

        async fn exists(&self, _hash: &str) -> Result<bool, StoreError> {
            Ok(false)
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

    fn unavailable() -> StoreError {
        StoreError::Http {
            status: 503,
            message: "service unavailable".into(),
            body: None,
        }
    }

    fn bad_request() -> StoreError {
        StoreError::Http {
            status: 400,
            message: "bad request".into(),
            body: None,
        }
    }

    fn policy(base_ms: u64) -> DeliveryPolicy {
        DeliveryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(base_ms),
            max_jitter: Duration::from_millis(5),
        }
    }

    fn chunk() -> NewChunk {
        NewChunk::new("contenido", "manual", "hash-1")
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_uses_exactly_six_attempts() {
        let store = Arc::new(FlakyStore::always(unavailable));
        let client = IngestionClient::new(store.clone(), policy(10));

        let result = client.deliver(chunk()).await;
        assert!(result.is_err());
        assert_eq!(store.attempts.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_minimum_never_decreases() {
        let store = Arc::new(FlakyStore::always(unavailable));
        let client = IngestionClient::new(store.clone(), policy(10));

        let started = tokio::time::Instant::now();
        let _ = client.deliver(chunk()).await;
        // Five sleeps of at least base * n: 10+20+30+40+50 ms.
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_is_attempted_once() {
        let store = Arc::new(FlakyStore::always(bad_request));
        let client = IngestionClient::new(store.clone(), policy(10));

        let result = client.deliver(chunk()).await;
        assert!(matches!(
            result,
            Err(StoreError::Http { status: 400, .. })
        ));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let store = Arc::new(FlakyStore::failing_first(2, unavailable));
        let client = IngestionClient::new(store.clone(), policy(10));

        let stored = client.deliver(chunk()).await.unwrap();
        assert_eq!(stored.content_hash, "hash-1");
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_are_retried() {
        let store = Arc::new(FlakyStore::failing_first(1, || {
            StoreError::Transport("connection reset".into())
        }));
        let client = IngestionClient::new(store.clone(), policy(10));

        assert!(client.deliver(chunk()).await.is_ok());
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
    }
}
