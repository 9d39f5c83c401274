//! Query-embedding cache: derived state that trades memory for provider
//! calls on repeated questions.
//!
//! The cache is an explicit stateful component: it is constructed, shared
//! behind an `Arc`, optionally swept by a background task with a bounded,
//! cancellable lifetime, and dropped — never a process-wide singleton.
//! Losing it at any moment costs performance, never correctness.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::provider::{EmbedError, EmbeddingProvider};

struct CacheEntry {
    vector: Vec<f32>,
    expires_at: Instant,
    last_used: Instant,
}

/// Bounded TTL cache for query embeddings.
pub struct EmbeddingCache {
    entries: Mutex<FxHashMap<String, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
}

impl EmbeddingCache {
    /// Create a cache holding at most `capacity` entries for `ttl` each.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Canonical cache key: case-folded, trimmed query text.
    pub fn normalize_key(query: &str) -> String {
        query.trim().to_lowercase()
    }

    /// Cached vector for `key`, if present and not expired. An expired entry
    /// is evicted on the spot and never resurrected.
    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_used = now;
                trace!(key, "query embedding cache hit");
                Some(entry.vector.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a vector under `key`, evicting the least-recently-used entry
    /// when the cache is full.
    pub fn insert(&self, key: String, vector: Vec<f32>) {
        let mut entries = self.entries.lock();
        let now = Instant::now();

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                vector,
                expires_at: now + self.ttl,
                last_used: now,
            },
        );
    }

    /// Number of entries currently held (expired ones included until swept).
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "swept expired query embeddings");
        }
        removed
    }

    /// Spawn a background task sweeping the cache every `period`.
    ///
    /// The task holds only a weak reference: it ends on its own when the
    /// cache is dropped, and can be stopped earlier through the returned
    /// handle (explicitly or by dropping it).
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> SweeperHandle {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                cache.sweep();
            }
        });
        SweeperHandle { handle }
    }
}

/// Handle to a running cache sweeper. Aborts the task when dropped.
pub struct SweeperHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper explicitly.
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ── Cached query embedding ─────────────────────────────────────────────

/// Query-time embedding lookup: cache first, provider on miss.
///
/// Concurrent misses for the same key may both reach the provider; that
/// duplicate call is an accepted, bounded cost rather than a correctness
/// problem, so no single-flight coordination exists here.
#[derive(Clone)]
pub struct QueryEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    timeout: Duration,
}

impl QueryEmbedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<EmbeddingCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            cache,
            timeout,
        }
    }

    /// The embedding for `query`, served from cache when possible. The
    /// provider call carries an explicit timeout so a conversational caller
    /// never stalls indefinitely.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbedError> {
        let key = EmbeddingCache::normalize_key(query);
        if let Some(vector) = self.cache.get(&key) {
            return Ok(vector);
        }

        let vector = tokio::time::timeout(self.timeout, self.provider.embed(query))
            .await
            .map_err(|_| EmbedError::Timeout(self.timeout))??;

        self.cache.insert(key, vector.clone());
        Ok(vector)
    }

    /// Dimension of the underlying provider.
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// The cache backing this embedder.
    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::provider::MockEmbeddingProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        inner: MockEmbeddingProvider,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    #[test]
    fn key_normalization_folds_case_and_trims() {
        assert_eq!(
            EmbeddingCache::normalize_key("  ¿Cuál es el LÍMITE?  "),
            "¿cuál es el límite?"
        );
    }

    #[tokio::test]
    async fn hit_returns_cached_vector_without_provider_call() {
        let provider = Arc::new(CountingProvider {
            inner: MockEmbeddingProvider::new(8),
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(EmbeddingCache::new(Duration::from_secs(60), 16));
        let embedder = QueryEmbedder::new(provider.clone(), cache, Duration::from_secs(1));

        let first = embedder.embed_query("Velocidad máxima").await.unwrap();
        let second = embedder.embed_query("  velocidad MÁXIMA ").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_never_returned() {
        let cache = EmbeddingCache::new(Duration::from_secs(1), 16);
        cache.insert("clave".into(), vec![1.0]);
        assert!(cache.get("clave").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("clave").is_none());
        // The expired entry was evicted on access.
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let cache = EmbeddingCache::new(Duration::from_secs(60), 2);
        cache.insert("a".into(), vec![1.0]);
        cache.insert("b".into(), vec![2.0]);
        // Touch "a" so "b" becomes the eviction candidate.
        let _ = cache.get("a");
        cache.insert("c".into(), vec![3.0]);

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_drops_expired_entries_and_stops_with_cache() {
        let cache = Arc::new(EmbeddingCache::new(Duration::from_secs(1), 16));
        cache.insert("clave".into(), vec![1.0]);
        let sweeper = cache.spawn_sweeper(Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert!(cache.is_empty());

        sweeper.shutdown();
    }
}
