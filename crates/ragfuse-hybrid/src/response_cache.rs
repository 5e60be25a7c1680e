//! Memoized final answers keyed by a canonical request fingerprint.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ragfuse_cache::build_cache;
use ragfuse_core::settings::CacheConfig;
use ragfuse_core::traits::KvCache;

pub const DEFAULT_KEY_PREFIX: &str = "ragfuse:resp";

/// What determines an answer: the question, the generation backend and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerRequest {
    pub query: String,
    pub provider: String,
    pub model: Option<String>,
    pub params: BTreeMap<String, Value>,
}

impl AnswerRequest {
    pub fn new(query: impl Into<String>, provider: impl Into<String>) -> Self {
        Self { query: query.into(), provider: provider.into(), model: None, params: BTreeMap::new() }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// BLAKE3 of the canonical JSON form. Whitespace in the query is collapsed
    /// and the provider lowercased; everything else is compared verbatim.
    pub fn fingerprint(&self) -> String {
        let mut canonical = Map::new();
        canonical.insert("query".into(), Value::String(self.query.split_whitespace().collect::<Vec<_>>().join(" ")));
        canonical.insert("provider".into(), Value::String(self.provider.trim().to_lowercase()));
        canonical.insert("model".into(), self.model.clone().map_or(Value::Null, Value::String));
        canonical.insert("params".into(), Value::Object(self.params.clone().into_iter().collect()));
        // Rendering a `Value` cannot fail; params iterate in key order.
        blake3::hash(Value::Object(canonical).to_string().as_bytes()).to_hex().to_string()
    }
}

pub struct ResponseCache {
    cache: Arc<dyn KvCache>,
    prefix: String,
    ttl: Option<Duration>,
    errors: AtomicU64,
}

impl ResponseCache {
    pub fn new(cache: Arc<dyn KvCache>, prefix: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self { cache, prefix: prefix.into(), ttl, errors: AtomicU64::new(0) }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(build_cache(config), config.prefix_or(DEFAULT_KEY_PREFIX), config.ttl())
    }

    pub fn key(&self, request: &AnswerRequest) -> String {
        format!("{}:{}", self.prefix, request.fingerprint())
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Cached answer, if any. Backend errors and undecodable entries count as misses.
    pub async fn get(&self, request: &AnswerRequest) -> Option<String> {
        match self.cache.get(&self.key(request)).await {
            Ok(Some(bytes)) => match String::from_utf8(bytes) {
                Ok(answer) => Some(answer),
                Err(_) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(backend = self.cache.backend_name(), error = %err, "response cache read failed");
                None
            }
        }
    }

    /// Stores a complete answer; failures are logged and counted.
    pub async fn set(&self, request: &AnswerRequest, answer: &str) {
        if let Err(err) = self.cache.set(&self.key(request), answer.as_bytes().to_vec(), self.ttl).await {
            self.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(backend = self.cache.backend_name(), error = %err, "response cache write failed");
        }
    }

    /// Cached answer, or the result of `generate`. Only successful non-empty answers are stored.
    pub async fn get_or_generate<F, Fut, E>(&self, request: &AnswerRequest, generate: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        if let Some(answer) = self.get(request).await {
            tracing::debug!(provider = %request.provider, "response cache hit");
            return Ok(answer);
        }
        let answer = generate().await?;
        if !answer.trim().is_empty() {
            self.set(request, &answer).await;
        }
        Ok(answer)
    }
}
