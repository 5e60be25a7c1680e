use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use httpmock::prelude::*;
use proptest::prelude::*;
use ragfuse_core::retry::RetryPolicy;
use ragfuse_core::settings::{CacheBackendKind, CacheConfig, EmbeddingConfig, EmbeddingProviderKind};
use ragfuse_core::traits::{EmbeddingProvider, KvCache};
use ragfuse_core::{Error, RemoteError};
use ragfuse_embed::{HashEmbedder, OllamaEmbedder, ResilientEmbedder};

fn ollama_config(base_url: String) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: EmbeddingProviderKind::Ollama,
        base_url,
        model: "nomic-embed-text".into(),
        timeout_ms: 2_000,
        retry: RetryPolicy { max_attempts: 2, initial_delay_ms: 1, max_delay_ms: 2, multiplier: 1.0 },
        ..EmbeddingConfig::default()
    }
}

#[tokio::test]
async fn ollama_embedding_is_normalized() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/embeddings")
                .json_body(serde_json::json!({"model": "nomic-embed-text", "prompt": "juros"}));
            then.status(200).json_body(serde_json::json!({"embedding": [3.0, 4.0]}));
        })
        .await;

    let embedder = OllamaEmbedder::new(&ollama_config(server.base_url())).expect("client");
    let v = embedder.embed("juros").await.expect("embedding");
    assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
    assert_eq!(embedder.embedder_id(), "ollama:nomic-embed-text");
    mock.assert_async().await;
}

#[tokio::test]
async fn ollama_empty_vector_is_decode_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/embeddings");
            then.status(200).json_body(serde_json::json!({"embedding": []}));
        })
        .await;

    let embedder = OllamaEmbedder::new(&ollama_config(server.base_url())).expect("client");
    assert!(matches!(embedder.embed("x").await, Err(RemoteError::Decode(_))));
}

#[tokio::test]
async fn server_errors_are_retried_then_hash_fallback_answers() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/embeddings");
            then.status(500);
        })
        .await;

    let config = ollama_config(server.base_url());
    let cache = CacheConfig { backend: CacheBackendKind::None, ..CacheConfig::default() };
    let embedder = ResilientEmbedder::from_config(&config, &cache).expect("embedder");

    let out = embedder.embed("prazo de financiamento").await;
    assert!(out.fell_back);
    assert_eq!(out.embedder_id, "hash:192");
    assert_eq!(out.vector, HashEmbedder::new(192).embed_sync("prazo de financiamento"));
    assert_eq!(embedder.fallback_count(), 1);
    mock.assert_calls_async(2).await;
}

struct BrokenCache;

#[async_trait]
impl KvCache for BrokenCache {
    fn backend_name(&self) -> &'static str {
        "broken"
    }

    async fn get(&self, _key: &str) -> ragfuse_core::Result<Option<Vec<u8>>> {
        Err(Error::Cache("down".into()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> ragfuse_core::Result<()> {
        Err(Error::Cache("down".into()))
    }
}

#[tokio::test]
async fn cache_failures_are_counted_not_raised() {
    let embedder = ResilientEmbedder::new(HashEmbedder::new(16)).with_cache(Arc::new(BrokenCache), "t", None);
    let out = embedder.embed("juros").await;
    assert_eq!(out.vector, HashEmbedder::new(16).embed_sync("juros"));
    assert_eq!(embedder.cache_error_count(), 2);
}

proptest! {
    #[test]
    fn hash_vectors_are_unit_or_zero(text in "\\PC{0,60}") {
        let v = HashEmbedder::new(48).embed_sync(&text);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        prop_assert!(norm == 0.0 || (norm - 1.0).abs() < 1e-4);
    }
}
