//! REST knowledge store: a thin client for a remote knowledge service.
//!
//! Every request carries an explicit timeout, and every failure keeps its
//! HTTP status (when one exists) so the delivery retry policy can classify
//! it. Transport-level failures carry no status and are always retryable.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{KnowledgeChunk, KnowledgeStore, NewChunk, ScoredChunk, StoreError};

/// Knowledge store backed by a remote REST service.
#[derive(Clone)]
pub struct RestKnowledgeStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RestKnowledgeStore {
    /// Create a client for the service at `base_url` with the default
    /// request timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self, StoreError> {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    /// Create a client with an explicit per-request timeout. The timeout is
    /// a transport budget, distinct from the ingestion retry policy.
    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .use_rustls_tls()
            .build()
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        })
    }

    /// Attach a bearer token sent with every request.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, StoreError>
    where
        B: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let mut request = self.client.post(self.endpoint(path)).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet = (!body.is_empty()).then(|| {
                let mut cut = body.len().min(crate::types::IngestFailure::MAX_BODY_SNIPPET);
                while cut > 0 && !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body[..cut].to_string()
            });
            if status.as_u16() == 409 {
                return Err(StoreError::Conflict(snippet.unwrap_or_default()));
            }
            return Err(StoreError::Http {
                status: status.as_u16(),
                message: format!("POST /{} failed", path.trim_start_matches('/')),
                body: snippet,
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|err| StoreError::Serialization(err.to_string()))
    }
}

// ── Wire shapes ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SubmitRequest<'a> {
    content: &'a str,
    source: &'a str,
    metadata: &'a serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedding: Option<&'a [f32]>,
}

#[derive(Serialize)]
struct ExistsRequest<'a> {
    hash: &'a str,
}

#[derive(Deserialize)]
struct ExistsResponse {
    exists: bool,
}

#[derive(Serialize)]
struct SemanticSearchRequest<'a> {
    embedding: &'a [f32],
    limit: usize,
}

#[derive(Serialize)]
struct LexicalSearchRequest<'a> {
    query: &'a str,
    limit: usize,
}

#[derive(Serialize)]
struct ClearRequest<'a> {
    source: &'a str,
}

#[derive(Deserialize)]
struct ClearResponse {
    deleted: usize,
}

#[derive(Deserialize)]
struct CountResponse {
    count: usize,
}

#[async_trait::async_trait]
impl KnowledgeStore for RestKnowledgeStore {
    async fn submit(&self, mut chunk: NewChunk) -> Result<KnowledgeChunk, StoreError> {
        chunk.ensure_hash_in_metadata();
        let request = SubmitRequest {
            content: &chunk.content,
            source: &chunk.source,
            metadata: &chunk.metadata,
            embedding: chunk.embedding.as_deref(),
        };
        self.post_json("knowledge", &request).await
    }

    async fn exists(&self, content_hash: &str) -> Result<bool, StoreError> {
        let response: ExistsResponse = self
            .post_json("knowledge/exists", &ExistsRequest { hash: content_hash })
            .await?;
        Ok(response.exists)
    }

    async fn search_semantic(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        self.post_json(
            "knowledge/search/semantic",
            &SemanticSearchRequest { embedding, limit },
        )
        .await
    }

    async fn search_lexical(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        self.post_json(
            "knowledge/search/lexical",
            &LexicalSearchRequest { query, limit },
        )
        .await
    }

    async fn clear_source(&self, source: &str) -> Result<usize, StoreError> {
        let response: ClearResponse = self
            .post_json("knowledge/clear", &ClearRequest { source })
            .await?;
        Ok(response.deleted)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let mut request = self.client.get(self.endpoint("knowledge/count"));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Http {
                status: status.as_u16(),
                message: "GET /knowledge/count failed".into(),
                body: None,
            });
        }
        let counted: CountResponse = response
            .json()
            .await
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        Ok(counted.count)
    }
}
