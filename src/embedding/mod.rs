//! Embedding providers, the query-embedding cache, and the dimension guard.

pub mod cache;
pub mod guard;
pub mod provider;

pub use cache::{EmbeddingCache, QueryEmbedder, SweeperHandle};
pub use guard::ensure_dimension;
pub use provider::{EmbedError, EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
