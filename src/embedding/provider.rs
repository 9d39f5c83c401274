//! Embedding providers: the external capability mapping text to vectors.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Failure reported by an embedding provider.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The provider call itself failed (network, auth, service error).
    #[error("embedding provider failure: {0}")]
    Provider(String),

    /// The provider answered with a payload that could not be interpreted.
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    /// The provider did not answer within the configured budget.
    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),
}

/// Maps text to a fixed-dimension vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Embed several texts. The default implementation embeds sequentially;
    /// providers with a batch endpoint override this.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Dimension of every vector this provider produces.
    fn dimension(&self) -> usize;
}

// ── Deterministic mock ─────────────────────────────────────────────────

/// Deterministic embedding provider for tests and offline runs.
///
/// Each token is hashed into a bucket of the output vector and the result
/// is L2-normalized, so texts sharing vocabulary land near each other under
/// cosine similarity while identical texts always produce identical
/// vectors. A cheap stand-in for a real model, not a semantic one.
#[derive(Debug, Clone)]
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn project(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let seed = hasher.finish();
            let bucket = (seed % self.dimension as u64) as usize;
            // Deterministic sign keeps distinct vocabularies separable.
            let sign = if seed & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.project(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ── HTTP provider ──────────────────────────────────────────────────────

/// Embedding provider speaking the common JSON embeddings contract:
/// `POST {endpoint}` with `{"model": ..., "input": [...]}` answered by
/// `{"data": [{"embedding": [...]}, ...]}`.
#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsDatum>,
}

#[derive(Deserialize)]
struct EmbeddingsDatum {
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    /// Create a provider for `endpoint` producing `dimension`-sized vectors.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbedError> {
        let client = Client::builder()
            .timeout(timeout)
            .use_rustls_tls()
            .build()
            .map_err(|err| EmbedError::Provider(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
            dimension,
        })
    }

    /// Attach a bearer token sent with every request.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    async fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "model": self.model, "input": inputs }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| EmbedError::Provider(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Provider(format!(
                "embedding endpoint answered {status}: {body}"
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|err| EmbedError::InvalidResponse(err.to_string()))?;

        if parsed.data.len() != inputs.len() {
            return Err(EmbedError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                parsed.data.len()
            )));
        }

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.request(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::InvalidResponse("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        self.request(&inputs).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
