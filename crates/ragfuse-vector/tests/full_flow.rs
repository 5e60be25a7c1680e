use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use httpmock::prelude::*;
use proptest::prelude::*;
use ragfuse_core::settings::{VectorBackendKind, VectorConfig};
use ragfuse_core::traits::EmbeddingProvider;
use ragfuse_core::{DocumentChunk, RemoteError};
use ragfuse_embed::{HashEmbedder, ResilientEmbedder};
use ragfuse_vector::backend::QdrantBackend;
use ragfuse_vector::{BackendMatch, VectorBackend, VectorDocument, VectorIndex};

fn local_index(dim: usize) -> VectorIndex {
    VectorIndex::new(Arc::new(ResilientEmbedder::new(HashEmbedder::new(dim))))
}

fn corpus() -> Vec<DocumentChunk> {
    vec![
        DocumentChunk::new("c1", "Juros habitacionais seguem o art. 5. O prazo maximo e de trinta anos."),
        DocumentChunk::new("c2", "Multa por atraso de pagamento. Incide sobre a parcela."),
        DocumentChunk::new("c3", "Seguro obrigatorio do imovel."),
    ]
}

fn qdrant_config(url: String) -> VectorConfig {
    VectorConfig { backend: VectorBackendKind::Qdrant, url, collection: "test".into(), timeout_ms: 1_000, ..VectorConfig::default() }
}

#[tokio::test]
async fn sentence_hits_return_parent_chunk_once() {
    let index = local_index(192);
    let stats = index.build(&corpus()).await.expect("build");
    assert_eq!(stats.chunks, 3);
    assert_eq!(stats.sentences, 6);

    let result = index.retrieve("O prazo maximo e de trinta anos.", 3).await;
    assert_eq!(result.snippets[0].source, "c1");
    assert_eq!(result.snippets[0].content, corpus()[0].content);
    let keys: HashSet<(&str, &str)> = result.snippets.iter().map(|s| s.key()).collect();
    assert_eq!(keys.len(), result.snippets.len());
    assert!(!result.embedding_fallback && !result.backend_fallback);
}

#[tokio::test]
async fn query_without_shared_terms_still_returns_candidates() {
    let index = local_index(192);
    index.build(&corpus()).await.expect("build");
    let result = index.retrieve("financiamento residencial", 2).await;
    assert!(!result.snippets.is_empty());
    assert!(result.snippets.iter().all(|s| s.score > 0.0 && s.score <= 1.0));
}

#[tokio::test]
async fn qdrant_backend_serves_aggregated_hits() {
    let server = MockServer::start_async().await;
    let drop_mock = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/collections/test");
            then.status(404);
        })
        .await;
    let create = server
        .mock_async(|when, then| {
            when.method(PUT).path("/collections/test");
            then.status(200).json_body(serde_json::json!({"result": true}));
        })
        .await;
    let upsert = server
        .mock_async(|when, then| {
            when.method(PUT).path("/collections/test/points").query_param("wait", "true");
            then.status(200).json_body(serde_json::json!({"result": {"status": "completed"}}));
        })
        .await;
    let search = server
        .mock_async(|when, then| {
            when.method(POST).path("/collections/test/points/search");
            then.status(200).json_body(serde_json::json!({"result": [
                {"id": 0, "score": 0.8, "payload": {"source": "c1", "content": "s1", "parent_content": "P1"}},
                {"id": 1, "score": 0.2, "payload": {"source": "c1", "content": "s2", "parent_content": "P1"}},
                {"id": 2, "score": -0.5, "payload": {"source": "c2", "content": "s3", "parent_content": "P2"}}
            ]}));
        })
        .await;

    let backend = Arc::new(QdrantBackend::new(&qdrant_config(server.base_url())).expect("client"));
    let index = local_index(16).with_backend(backend);
    let stats = index.build(&corpus()).await.expect("build");
    assert!(stats.backend_synced);

    let result = index.retrieve("juros", 5).await;
    assert!(!result.backend_fallback);
    assert_eq!(result.snippets.len(), 2);
    assert_eq!(result.snippets[0].key(), ("c1", "P1"));
    assert!((result.snippets[0].score - 0.9).abs() < 1e-6);
    assert!((result.snippets[1].score - 0.25).abs() < 1e-6);

    drop_mock.assert_async().await;
    create.assert_async().await;
    upsert.assert_async().await;
    search.assert_async().await;
}

#[tokio::test]
async fn failing_qdrant_search_falls_back_to_local_scan() {
    let server = MockServer::start_async().await;
    for (method, path) in [
        (DELETE, "/collections/test"),
        (PUT, "/collections/test"),
        (PUT, "/collections/test/points"),
        (POST, "/collections/test/points/search"),
    ] {
        server
            .mock_async(|when, then| {
                when.method(method).path(path);
                then.status(200).json_body(serde_json::json!({"result": true}));
            })
            .await;
    }

    let backend = Arc::new(QdrantBackend::new(&qdrant_config(server.base_url())).expect("client"));
    let index = local_index(64).with_backend(backend);
    assert!(index.build(&corpus()).await.expect("build").backend_synced);

    // Search responses lack a usable `result` list of scored points.
    let result = index.retrieve("multa por atraso", 2).await;
    assert!(result.backend_fallback);
    assert_eq!(result.snippets[0].source, "c2");
    assert_eq!(index.backend_fallback_count(), 1);
}

#[tokio::test]
async fn unreachable_qdrant_never_blocks_indexing() {
    let backend = Arc::new(QdrantBackend::new(&qdrant_config("http://127.0.0.1:1".into())).expect("client"));
    let index = local_index(64).with_backend(backend);
    let stats = index.build(&corpus()).await.expect("build");
    assert!(!stats.backend_synced);

    let result = index.retrieve("seguro obrigatorio", 1).await;
    assert!(result.backend_fallback);
    assert_eq!(result.snippets[0].source, "c3");
}

struct StalledSearch;

#[async_trait]
impl VectorBackend for StalledSearch {
    fn name(&self) -> &'static str {
        "stalled"
    }

    async fn replace_all(&self, _documents: &[VectorDocument]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn search(&self, _query: &[f32], _limit: usize) -> anyhow::Result<Vec<BackendMatch>> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn stalled_backend_search_is_cut_at_deadline() {
    let index = local_index(64).with_backend(Arc::new(StalledSearch));
    assert!(index.build(&corpus()).await.expect("build").backend_synced);

    let deadline = tokio::time::Instant::now() + Duration::from_millis(100);
    let result = index.retrieve_before("multa por atraso", 2, Some(deadline)).await;
    assert!(result.backend_fallback);
    assert_eq!(result.snippets[0].source, "c2");
    assert_eq!(index.backend_fallback_count(), 1);
}

struct Switchable {
    down: AtomicBool,
    hash: HashEmbedder,
}

#[async_trait]
impl EmbeddingProvider for Switchable {
    fn embedder_id(&self) -> &str {
        "model:switchable"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RemoteError> {
        if self.down.load(Ordering::SeqCst) {
            Err(RemoteError::Timeout)
        } else {
            Ok(self.hash.embed_sync(&format!("{text} model")))
        }
    }
}

#[tokio::test]
async fn provider_outage_at_query_time_uses_hashed_corpus_copy() {
    let provider = Arc::new(Switchable { down: AtomicBool::new(false), hash: HashEmbedder::new(96) });
    let embedder = ResilientEmbedder::new(HashEmbedder::new(48)).with_primary(provider.clone());
    let index = VectorIndex::new(Arc::new(embedder));
    assert_eq!(index.build(&corpus()).await.expect("build").embedder_id, "model:switchable");

    provider.down.store(true, Ordering::SeqCst);
    let result = index.retrieve("Seguro obrigatorio do imovel.", 1).await;
    assert!(result.embedding_fallback);
    assert_eq!(result.snippets[0].source, "c3");
}

#[tokio::test]
async fn provider_outage_at_build_time_hashes_whole_corpus() {
    let provider = Arc::new(Switchable { down: AtomicBool::new(true), hash: HashEmbedder::new(96) });
    let embedder = ResilientEmbedder::new(HashEmbedder::new(48)).with_primary(provider.clone());
    let index = VectorIndex::new(Arc::new(embedder));
    assert_eq!(index.build(&corpus()).await.expect("build").embedder_id, "hash:48");

    let still_down = index.retrieve("Seguro obrigatorio do imovel.", 1).await;
    assert!(still_down.embedding_fallback);
    assert_eq!(still_down.snippets[0].source, "c3");

    provider.down.store(false, Ordering::SeqCst);
    let result = index.retrieve("Multa por atraso de pagamento.", 1).await;
    assert!(result.embedding_fallback);
    assert_eq!(result.snippets[0].source, "c2");
}

proptest! {
    #[test]
    fn results_are_bounded_and_distinct(
        docs in prop::collection::vec("[a-f]{1,6}( [a-f]{1,6}){0,5}(\\. [a-f]{1,6}){0,3}", 1..12),
        query in "[a-f ]{0,20}",
        top_k in 0usize..8,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
        let chunks: Vec<DocumentChunk> = docs.iter().enumerate().map(|(i, d)| DocumentChunk::new(format!("d{i}"), d.clone())).collect();
        let index = local_index(32);
        runtime.block_on(index.build(&chunks)).expect("build");
        let result = runtime.block_on(index.retrieve(&query, top_k));
        prop_assert!(result.snippets.len() <= top_k);
        let keys: HashSet<(&str, &str)> = result.snippets.iter().map(|s| s.key()).collect();
        prop_assert_eq!(keys.len(), result.snippets.len());
        for s in &result.snippets {
            prop_assert!(s.score > 0.0 && s.score <= 1.0);
        }
    }
}
