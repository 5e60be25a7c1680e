use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use ragfuse_cache::{build_cache, NoopCache};
use ragfuse_core::error::RemoteError;
use ragfuse_core::settings::{CacheConfig, EmbeddingConfig, EmbeddingProviderKind};
use ragfuse_core::traits::{EmbeddingProvider, KvCache};

use crate::codec::{decode_vector, encode_vector};
use crate::{HashEmbedder, OllamaEmbedder};

pub const DEFAULT_KEY_PREFIX: &str = "ragfuse:emb";

/// A vector together with the id of the embedder that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedded {
    pub vector: Vec<f32>,
    pub embedder_id: String,
    /// The remote provider failed and the hash embedder answered instead.
    pub fell_back: bool,
}

/// Cache, then primary provider, then deterministic hashing. Never fails.
pub struct ResilientEmbedder {
    primary: Option<Arc<dyn EmbeddingProvider>>,
    fallback: HashEmbedder,
    cache: Arc<dyn KvCache>,
    key_prefix: String,
    ttl: Option<Duration>,
    fallbacks: AtomicU64,
    cache_errors: AtomicU64,
}

impl ResilientEmbedder {
    /// Hash embedding only, no cache.
    pub fn new(fallback: HashEmbedder) -> Self {
        Self {
            primary: None,
            fallback,
            cache: Arc::new(NoopCache),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            ttl: None,
            fallbacks: AtomicU64::new(0),
            cache_errors: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_primary(mut self, primary: Arc<dyn EmbeddingProvider>) -> Self {
        self.primary = Some(primary);
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn KvCache>, key_prefix: impl Into<String>, ttl: Option<Duration>) -> Self {
        self.cache = cache;
        self.key_prefix = key_prefix.into();
        self.ttl = ttl;
        self
    }

    pub fn from_config(embedding: &EmbeddingConfig, cache: &CacheConfig) -> ragfuse_core::Result<Self> {
        let mut embedder = Self::new(HashEmbedder::new(embedding.dimensions)).with_cache(
            build_cache(cache),
            cache.prefix_or(DEFAULT_KEY_PREFIX),
            cache.ttl(),
        );
        if embedding.provider == EmbeddingProviderKind::Ollama {
            embedder = embedder.with_primary(Arc::new(OllamaEmbedder::new(embedding)?));
        }
        tracing::debug!(embedder = embedder.active_id(), cache = embedder.cache.backend_name(), "embedder ready");
        Ok(embedder)
    }

    pub fn fallback(&self) -> &HashEmbedder {
        &self.fallback
    }

    /// Id a healthy call produces.
    pub fn active_id(&self) -> &str {
        self.primary.as_ref().map_or(self.fallback.id(), |p| p.embedder_id())
    }

    pub async fn embed(&self, text: &str) -> Embedded {
        self.embed_before(text, None).await
    }

    /// Like [`embed`](Self::embed), with the provider call cut at `deadline`.
    /// A cut call falls back exactly like a failed one.
    pub async fn embed_before(&self, text: &str, deadline: Option<Instant>) -> Embedded {
        if let Some(primary) = &self.primary {
            let id = primary.embedder_id();
            if let Some(vector) = self.cached(id, text).await {
                return Embedded { vector, embedder_id: id.to_string(), fell_back: false };
            }
            let call = primary.embed(text);
            let result = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, call).await.unwrap_or(Err(RemoteError::Timeout)),
                None => call.await,
            };
            match result {
                Ok(vector) => {
                    self.store(id, text, &vector).await;
                    return Embedded { vector, embedder_id: id.to_string(), fell_back: false };
                }
                Err(err) => {
                    self.fallbacks.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(provider = id, error = %err, "embedding provider failed; using hash embedding");
                    let mut local = self.embed_local(text).await;
                    local.fell_back = true;
                    return local;
                }
            }
        }
        self.embed_local(text).await
    }

    pub async fn embed_local(&self, text: &str) -> Embedded {
        let id = self.fallback.id();
        let vector = match self.cached(id, text).await {
            Some(vector) if vector.len() == self.fallback.dim() => vector,
            _ => {
                let vector = self.fallback.embed_sync(text);
                self.store(id, text, &vector).await;
                vector
            }
        };
        Embedded { vector, embedder_id: id.to_string(), fell_back: false }
    }

    /// Embeds `texts` with at most `concurrency` calls in flight, output in input
    /// order. Stops calling the provider at the first fallback and returns
    /// `None`: a partly hashed corpus cannot share one vector space.
    pub async fn embed_many_uniform(&self, texts: &[String], concurrency: usize) -> Option<Vec<Embedded>> {
        let mut results = Vec::with_capacity(texts.len());
        let mut embedded = std::pin::pin!(stream::iter(texts.iter().map(|text| self.embed(text))).buffered(concurrency.max(1)));
        while let Some(next) = embedded.next().await {
            if next.fell_back {
                return None;
            }
            results.push(next);
        }
        Some(results)
    }

    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub fn cache_error_count(&self) -> u64 {
        self.cache_errors.load(Ordering::Relaxed)
    }

    /// `<prefix>:<blake3(embedder_id NUL text)>`.
    pub fn cache_key(&self, embedder_id: &str, text: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(embedder_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(text.as_bytes());
        format!("{}:{}", self.key_prefix, hasher.finalize().to_hex())
    }

    async fn cached(&self, embedder_id: &str, text: &str) -> Option<Vec<f32>> {
        match self.cache.get(&self.cache_key(embedder_id, text)).await {
            Ok(bytes) => bytes.as_deref().and_then(decode_vector),
            Err(err) => {
                self.cache_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(backend = self.cache.backend_name(), error = %err, "embedding cache read failed");
                None
            }
        }
    }

    async fn store(&self, embedder_id: &str, text: &str, vector: &[f32]) {
        let key = self.cache_key(embedder_id, text);
        if let Err(err) = self.cache.set(&key, encode_vector(vector), self.ttl).await {
            self.cache_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(backend = self.cache.backend_name(), error = %err, "embedding cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragfuse_cache::MemoryCache;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for Counting {
        fn embedder_id(&self) -> &str {
            "test:model"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(RemoteError::Connect("refused".into()))
            } else {
                Ok(vec![0.6, 0.8])
            }
        }
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let provider = Arc::new(Counting { calls: AtomicUsize::new(0), fail: false });
        let embedder = ResilientEmbedder::new(HashEmbedder::new(8))
            .with_primary(provider.clone())
            .with_cache(Arc::new(MemoryCache::new(16)), "t:emb", None);

        let first = embedder.embed("juros").await;
        let second = embedder.embed("juros").await;
        assert_eq!(first, second);
        assert_eq!(first.embedder_id, "test:model");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_provider_falls_back_to_hash() {
        let provider = Arc::new(Counting { calls: AtomicUsize::new(0), fail: true });
        let embedder = ResilientEmbedder::new(HashEmbedder::new(8)).with_primary(provider);

        let out = embedder.embed("juros").await;
        assert!(out.fell_back);
        assert_eq!(out.embedder_id, "hash:8");
        assert_eq!(out.vector, HashEmbedder::new(8).embed_sync("juros"));
        assert_eq!(embedder.fallback_count(), 1);
        assert_eq!(embedder.active_id(), "test:model");
    }

    struct Hung;

    #[async_trait]
    impl EmbeddingProvider for Hung {
        fn embedder_id(&self) -> &str {
            "test:hung"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, RemoteError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn hung_provider_is_cut_at_deadline_and_hashed() {
        let embedder = ResilientEmbedder::new(HashEmbedder::new(8)).with_primary(Arc::new(Hung));
        let deadline = Instant::now() + Duration::from_millis(50);

        let out = embedder.embed_before("juros", Some(deadline)).await;
        assert!(out.fell_back);
        assert_eq!(out.embedder_id, "hash:8");
        assert_eq!(embedder.fallback_count(), 1);
    }

    #[tokio::test]
    async fn uniform_batch_stops_at_first_fallback() {
        let provider = Arc::new(Counting { calls: AtomicUsize::new(0), fail: true });
        let embedder = ResilientEmbedder::new(HashEmbedder::new(8)).with_primary(provider.clone());
        let texts: Vec<String> = (0..20).map(|i| format!("frase {i}")).collect();

        assert!(embedder.embed_many_uniform(&texts, 1).await.is_none());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let healthy = ResilientEmbedder::new(HashEmbedder::new(8));
        assert_eq!(healthy.embed_many_uniform(&texts, 4).await.map(|v| v.len()), Some(20));
    }

    #[test]
    fn cache_keys_separate_embedders() {
        let embedder = ResilientEmbedder::new(HashEmbedder::new(8));
        let a = embedder.cache_key("hash:8", "text");
        let b = embedder.cache_key("ollama:x", "text");
        assert_ne!(a, b);
        assert!(a.starts_with("ragfuse:emb:"));
    }

    #[tokio::test]
    async fn batch_embedding_preserves_order() {
        let embedder = ResilientEmbedder::new(HashEmbedder::new(32));
        let texts: Vec<String> = ["alpha", "beta", "gamma"].iter().map(ToString::to_string).collect();
        let out = embedder.embed_many_uniform(&texts, 2).await.expect("no provider to fail");
        for (text, embedded) in texts.iter().zip(&out) {
            assert_eq!(embedded.vector, embedder.fallback().embed_sync(text));
        }
    }
}
