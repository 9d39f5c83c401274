//! Integration tests for the REST collaborator: wire contracts and the
//! retry classification it feeds.

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use kbsmith::ingest::delivery::{DeliveryPolicy, IngestionClient};
use kbsmith::store::rest::RestKnowledgeStore;
use kbsmith::store::{KnowledgeStore, NewChunk, StoreError};
use serde_json::json;

fn sample_chunk() -> NewChunk {
    NewChunk::new(
        "Límite de velocidad en zona urbana: 40 km/h.",
        "manual",
        "abc123",
    )
    .with_metadata(json!({"topic": "velocidad"}))
    .with_embedding(vec![0.1, 0.2, 0.3])
}

fn stored_body() -> serde_json::Value {
    json!({
        "id": "chunk-1",
        "content": "Límite de velocidad en zona urbana: 40 km/h.",
        "source": "manual",
        "metadata": {"topic": "velocidad", "contentHash": "abc123"},
        "contentHash": "abc123",
        "createdAt": "2026-08-07T12:00:00Z"
    })
}

#[tokio::test]
async fn submit_round_trips_the_wire_contract() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/knowledge")
                .json_body_partial(r#"{"source": "manual", "metadata": {"contentHash": "abc123"}}"#);
            then.status(200).json_body(stored_body());
        })
        .await;

    let store = RestKnowledgeStore::new(server.base_url()).unwrap();
    let stored = store.submit(sample_chunk()).await.unwrap();

    mock.assert_async().await;
    assert_eq!(stored.id, "chunk-1");
    assert_eq!(stored.content_hash, "abc123");
    assert_eq!(stored.source, "manual");
}

#[tokio::test]
async fn conflict_status_maps_to_duplicate() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/knowledge");
            then.status(409).body("duplicate content hash");
        })
        .await;

    let store = RestKnowledgeStore::new(server.base_url()).unwrap();
    let result = store.submit(sample_chunk()).await;
    assert!(matches!(result, Err(StoreError::Conflict(_))));
}

#[tokio::test]
async fn error_statuses_are_preserved_for_classification() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/knowledge");
            then.status(429).body("slow down");
        })
        .await;

    let store = RestKnowledgeStore::new(server.base_url()).unwrap();
    let err = store.submit(sample_chunk()).await.unwrap_err();
    assert_eq!(err.status(), Some(429));
    assert!(err.is_retryable());
    assert_eq!(err.body_snippet(), Some("slow down"));
}

#[tokio::test]
async fn delivery_retries_a_flaky_service_six_times() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/knowledge");
            then.status(503).body("unavailable");
        })
        .await;

    let store = Arc::new(RestKnowledgeStore::new(server.base_url()).unwrap());
    let client = IngestionClient::new(
        store,
        DeliveryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(1),
            max_jitter: Duration::from_millis(1),
        },
    );

    let result = client.deliver(sample_chunk()).await;
    assert!(result.is_err());
    mock.assert_hits_async(6).await;
}

#[tokio::test]
async fn delivery_gives_up_immediately_on_client_errors() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/knowledge");
            then.status(400).body("malformed payload");
        })
        .await;

    let store = Arc::new(RestKnowledgeStore::new(server.base_url()).unwrap());
    let client = IngestionClient::new(store, DeliveryPolicy::default());

    let err = client.deliver(sample_chunk()).await.unwrap_err();
    assert_eq!(err.status(), Some(400));
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn exists_reads_the_boolean_answer() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/knowledge/exists")
                .json_body(json!({"hash": "abc123"}));
            then.status(200).json_body(json!({"exists": true}));
        })
        .await;

    let store = RestKnowledgeStore::new(server.base_url()).unwrap();
    assert!(store.exists("abc123").await.unwrap());
}

#[tokio::test]
async fn exists_failure_surfaces_for_the_caller_to_fail_open() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/knowledge/exists");
            then.status(500).body("boom");
        })
        .await;

    let store = RestKnowledgeStore::new(server.base_url()).unwrap();
    // The store reports the failure; the Deduplicator turns it into
    // exists=false. The store itself never guesses.
    assert!(store.exists("abc123").await.is_err());
}

#[tokio::test]
async fn lexical_search_posts_query_and_limit() {
    let server = MockServer::start_async().await;
    let mut scored = stored_body();
    scored["score"] = json!(3.5);
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/knowledge/search/lexical")
                .json_body(json!({"query": "40 km/h", "limit": 5}));
            then.status(200).json_body(json!([scored]));
        })
        .await;

    let store = RestKnowledgeStore::new(server.base_url()).unwrap();
    let results = store.search_lexical("40 km/h", 5).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!((results[0].score - 3.5).abs() < 1e-6);
    assert_eq!(results[0].chunk.id, "chunk-1");
}

#[tokio::test]
async fn clear_source_returns_the_deleted_count() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/knowledge/clear")
                .json_body(json!({"source": "manual"}));
            then.status(200).json_body(json!({"deleted": 7}));
        })
        .await;

    let store = RestKnowledgeStore::new(server.base_url()).unwrap();
    assert_eq!(store.clear_source("manual").await.unwrap(), 7);
}
