//! Engine configuration with builder-style setters and environment loading.
//!
//! All knobs have working defaults; `EngineConfig::default()` is enough for
//! local use with the SQLite collaborator. Deployments override via the
//! builder or `EngineConfig::from_env()`, which reads `KBSMITH_*` variables
//! after loading a `.env` file when one is present.

use std::env;
use std::time::Duration;

use crate::types::KbError;

/// Configuration for the ingestion pipeline and hybrid retriever.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Dimension every stored embedding must have. Changing the embedding
    /// model requires clearing and re-ingesting affected sources.
    pub embedding_dimension: usize,
    /// Weight of the semantic leg in hybrid fusion (`α`); the lexical leg
    /// receives `1 - α`. Must lie in `[0, 1]`.
    pub semantic_weight: f32,
    /// Default number of results returned by a query.
    pub top_k: usize,
    /// Candidates fetched per signal before fusion. Larger pools give the
    /// fused ordering more room to differ from either single signal.
    pub candidate_pool: usize,
    /// Target chunk window size in characters.
    pub chunk_target_chars: usize,
    /// Overlap between consecutive chunk windows in characters.
    pub chunk_overlap_chars: usize,
    /// Time-to-live for cached query embeddings.
    pub cache_ttl: Duration,
    /// Maximum number of cached query embeddings.
    pub cache_capacity: usize,
    /// Total delivery attempts per chunk, first try included.
    pub max_delivery_attempts: u32,
    /// Base delay unit for linear retry backoff.
    pub retry_base_delay: Duration,
    /// Upper bound of the random jitter added to each backoff delay.
    pub retry_max_jitter: Duration,
    /// Number of chunks processed concurrently per ingestion batch.
    pub batch_size: usize,
    /// Pause between ingestion batches, respecting upstream rate limits.
    pub batch_pause: Duration,
    /// Explicit timeout for every external call (embedding, store).
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: 768,
            semantic_weight: 0.6,
            top_k: 5,
            candidate_pool: 20,
            chunk_target_chars: 1_000,
            chunk_overlap_chars: 200,
            cache_ttl: Duration::from_secs(3_600),
            cache_capacity: 256,
            max_delivery_attempts: 6,
            retry_base_delay: Duration::from_millis(500),
            retry_max_jitter: Duration::from_millis(200),
            batch_size: 8,
            batch_pause: Duration::from_millis(250),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Create a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the required embedding dimension.
    #[must_use]
    pub fn embedding_dimension(mut self, dimension: usize) -> Self {
        self.embedding_dimension = dimension;
        self
    }

    /// Set the semantic fusion weight `α`.
    #[must_use]
    pub fn semantic_weight(mut self, weight: f32) -> Self {
        self.semantic_weight = weight;
        self
    }

    /// Set the default result count.
    #[must_use]
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the per-signal candidate pool size.
    #[must_use]
    pub fn candidate_pool(mut self, pool: usize) -> Self {
        self.candidate_pool = pool;
        self
    }

    /// Set chunk window size and overlap in characters.
    #[must_use]
    pub fn chunking(mut self, target_chars: usize, overlap_chars: usize) -> Self {
        self.chunk_target_chars = target_chars;
        self.chunk_overlap_chars = overlap_chars;
        self
    }

    /// Set query-embedding cache TTL and capacity.
    #[must_use]
    pub fn cache(mut self, ttl: Duration, capacity: usize) -> Self {
        self.cache_ttl = ttl;
        self.cache_capacity = capacity;
        self
    }

    /// Set the delivery retry policy.
    #[must_use]
    pub fn retries(mut self, max_attempts: u32, base_delay: Duration, max_jitter: Duration) -> Self {
        self.max_delivery_attempts = max_attempts;
        self.retry_base_delay = base_delay;
        self.retry_max_jitter = max_jitter;
        self
    }

    /// Set batch size and inter-batch pause.
    #[must_use]
    pub fn batching(mut self, batch_size: usize, pause: Duration) -> Self {
        self.batch_size = batch_size;
        self.batch_pause = pause;
        self
    }

    /// Set the timeout applied to every external call.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Load overrides from `KBSMITH_*` environment variables on top of the
    /// defaults. A `.env` file is honored when present.
    ///
    /// Recognized variables: `KBSMITH_EMBEDDING_DIMENSION`,
    /// `KBSMITH_SEMANTIC_WEIGHT`, `KBSMITH_TOP_K`, `KBSMITH_CHUNK_CHARS`,
    /// `KBSMITH_CHUNK_OVERLAP`, `KBSMITH_CACHE_TTL_SECS`,
    /// `KBSMITH_CACHE_CAPACITY`, `KBSMITH_BATCH_SIZE`,
    /// `KBSMITH_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, KbError> {
        let _ = dotenvy::dotenv();

        let mut config = Self::default();
        if let Some(value) = read_env("KBSMITH_EMBEDDING_DIMENSION")? {
            config.embedding_dimension = value;
        }
        if let Ok(raw) = env::var("KBSMITH_SEMANTIC_WEIGHT") {
            config.semantic_weight = raw.parse::<f32>().map_err(|err| {
                KbError::Configuration(format!("invalid KBSMITH_SEMANTIC_WEIGHT '{raw}': {err}"))
            })?;
        }
        if let Some(value) = read_env("KBSMITH_TOP_K")? {
            config.top_k = value;
        }
        if let Some(value) = read_env("KBSMITH_CHUNK_CHARS")? {
            config.chunk_target_chars = value;
        }
        if let Some(value) = read_env("KBSMITH_CHUNK_OVERLAP")? {
            config.chunk_overlap_chars = value;
        }
        if let Some(value) = read_env("KBSMITH_CACHE_TTL_SECS")? {
            config.cache_ttl = Duration::from_secs(value as u64);
        }
        if let Some(value) = read_env("KBSMITH_CACHE_CAPACITY")? {
            config.cache_capacity = value;
        }
        if let Some(value) = read_env("KBSMITH_BATCH_SIZE")? {
            config.batch_size = value;
        }
        if let Some(value) = read_env("KBSMITH_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(value as u64);
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate invariants the rest of the engine relies on.
    pub fn validate(&self) -> Result<(), KbError> {
        if self.embedding_dimension == 0 {
            return Err(KbError::Configuration(
                "embedding dimension must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.semantic_weight) {
            return Err(KbError::Configuration(format!(
                "semantic weight must lie in [0, 1], got {}",
                self.semantic_weight
            )));
        }
        if self.chunk_overlap_chars >= self.chunk_target_chars {
            return Err(KbError::Configuration(format!(
                "chunk overlap ({}) must be smaller than the chunk target size ({})",
                self.chunk_overlap_chars, self.chunk_target_chars
            )));
        }
        if self.max_delivery_attempts == 0 {
            return Err(KbError::Configuration(
                "at least one delivery attempt is required".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(KbError::Configuration("batch size must be positive".into()));
        }
        Ok(())
    }
}

fn read_env(name: &str) -> Result<Option<usize>, KbError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<usize>()
            .map(Some)
            .map_err(|err| KbError::Configuration(format!("invalid {name} '{raw}': {err}"))),
        Err(_) => Ok(None),
    }
}
