//! Typed engine settings. Every field has a default so a partial (or absent)
//! `config.toml` still yields a runnable engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retrieval: RetrievalConfig,
    pub fusion: FusionConfig,
    pub lexical: LexicalConfig,
    pub embedding: EmbeddingConfig,
    pub vector: VectorConfig,
    pub rerank: RerankConfig,
    pub cache: CacheSettings,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.retrieval.validate()?;
        self.fusion.validate()?;
        self.lexical.validate()?;
        self.embedding.validate()?;
        self.vector.validate()?;
        self.rerank.validate()?;
        self.cache.embedding.validate("cache.embedding")?;
        self.cache.response.validate("cache.response")?;
        self.warn_on_remote_budget();
        Ok(())
    }

    /// Remote calls are cut at the query deadline either way; a call budget
    /// above it only means the cut, not the call's own timeout, ends it.
    fn warn_on_remote_budget(&self) {
        let deadline = self.retrieval.timeout();
        if self.embedding.provider == EmbeddingProviderKind::Ollama {
            let budget = self.embedding.retry.worst_case(self.embedding.timeout());
            if budget >= deadline {
                tracing::warn!(?budget, ?deadline, "embedding call budget exceeds retrieval.timeout_ms");
            }
        }
        if self.rerank.enabled && self.rerank.judge != JudgeKind::None {
            let budget = self.rerank.retry.worst_case(self.rerank.timeout());
            if budget >= deadline {
                tracing::warn!(?budget, ?deadline, "judge call budget exceeds retrieval.timeout_ms");
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Whole-pipeline deadline.
    pub timeout_ms: u64,
    pub batch_concurrency: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 6, timeout_ms: 8_000, batch_concurrency: 4 }
    }
}

impl RetrievalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(Error::InvalidConfig("retrieval.top_k must be at least 1".into()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig("retrieval.timeout_ms must be positive".into()));
        }
        if self.batch_concurrency == 0 {
            return Err(Error::InvalidConfig("retrieval.batch_concurrency must be at least 1".into()));
        }
        Ok(())
    }
}

/// Weighted Reciprocal Rank Fusion parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub weight_lexical: f32,
    pub weight_vector: f32,
    pub rrf_k: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { weight_lexical: 0.65, weight_vector: 0.35, rrf_k: 60.0 }
    }
}

impl FusionConfig {
    /// Negative or all-zero weights are caller errors; a non-positive K is a configuration error.
    pub fn validate(&self) -> Result<()> {
        if self.weight_lexical.is_nan() || self.weight_vector.is_nan() || self.weight_lexical < 0.0 || self.weight_vector < 0.0 {
            return Err(Error::InvalidInput("fusion weights must be non-negative".into()));
        }
        if self.weight_lexical + self.weight_vector <= 0.0 {
            return Err(Error::InvalidInput("at least one fusion weight must be positive".into()));
        }
        if !self.rrf_k.is_finite() || self.rrf_k <= 0.0 {
            return Err(Error::InvalidConfig("fusion.rrf_k must be a positive number".into()));
        }
        Ok(())
    }
}

/// BM25 parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalConfig {
    pub k1: f32,
    pub b: f32,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

impl LexicalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.k1.is_nan() || self.k1 < 0.0 {
            return Err(Error::InvalidConfig("lexical.k1 must be non-negative".into()));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(Error::InvalidConfig("lexical.b must lie in [0, 1]".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Hash,
    Ollama,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    /// Dimensions of the deterministic hash embedding (also the fallback).
    pub dimensions: usize,
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
    /// Parallel embedding calls while building the vector index.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Hash,
            dimensions: 192,
            base_url: "http://localhost:11434".into(),
            model: "nomic-embed-text".into(),
            timeout_ms: 2_000,
            concurrency: 4,
            retry: RetryPolicy { max_attempts: 2, initial_delay_ms: 200, ..RetryPolicy::default() },
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.dimensions == 0 {
            return Err(Error::InvalidConfig("embedding.dimensions must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(Error::InvalidConfig("embedding.concurrency must be at least 1".into()));
        }
        if self.provider == EmbeddingProviderKind::Ollama && self.base_url.trim().is_empty() {
            return Err(Error::InvalidConfig("embedding.base_url is required for the ollama provider".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackendKind {
    Disabled,
    #[default]
    Local,
    Qdrant,
    Lance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub backend: VectorBackendKind,
    pub url: String,
    pub collection: String,
    pub api_key: Option<String>,
    /// Lance database directory; `~` and `${VAR}` are expanded.
    pub path: String,
    pub table: String,
    pub timeout_ms: u64,
    /// Remote searches fetch `top_k * oversample` sentence hits before aggregation.
    pub oversample: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackendKind::Local,
            url: "http://localhost:6333".into(),
            collection: "ragfuse".into(),
            api_key: None,
            path: "~/.ragfuse/lance".into(),
            table: "sentences".into(),
            timeout_ms: 2_000,
            oversample: 4,
        }
    }
}

impl VectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.oversample == 0 {
            return Err(Error::InvalidConfig("vector.oversample must be at least 1".into()));
        }
        if self.backend == VectorBackendKind::Qdrant && (self.url.trim().is_empty() || self.collection.trim().is_empty()) {
            return Err(Error::InvalidConfig("vector.url and vector.collection are required for qdrant".into()));
        }
        if self.backend == VectorBackendKind::Lance && self.table.trim().is_empty() {
            return Err(Error::InvalidConfig("vector.table is required for lance".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JudgeKind {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub enabled: bool,
    pub judge: JudgeKind,
    pub candidate_cap: usize,
    pub max_selected: usize,
    /// Defaults per judge: `http://localhost:11434` for ollama, `https://api.openai.com` for openai.
    pub base_url: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            judge: JudgeKind::None,
            candidate_cap: 20,
            max_selected: 5,
            base_url: None,
            model: "llama3".into(),
            api_key: None,
            timeout_ms: 6_000,
            retry: RetryPolicy::none(),
        }
    }
}

impl RerankConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn judge_base_url(&self) -> String {
        match (&self.base_url, self.judge) {
            (Some(url), _) => url.clone(),
            (None, JudgeKind::OpenAi) => "https://api.openai.com".into(),
            (None, _) => "http://localhost:11434".into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.candidate_cap == 0 {
            return Err(Error::InvalidConfig("rerank.candidate_cap must be at least 1".into()));
        }
        if self.max_selected == 0 {
            return Err(Error::InvalidConfig("rerank.max_selected must be at least 1".into()));
        }
        if self.enabled && self.judge == JudgeKind::OpenAi && !self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty()) {
            return Err(Error::InvalidConfig("rerank.api_key is required for the openai judge".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    None,
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub redis_url: Option<String>,
    /// Namespace prepended to every key; each cache user supplies its own default.
    pub key_prefix: Option<String>,
    pub ttl_secs: Option<u64>,
    /// Entry bound of the in-process backend.
    pub capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { backend: CacheBackendKind::Memory, redis_url: None, key_prefix: None, ttl_secs: None, capacity: 10_000 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    pub fn prefix_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.key_prefix.as_deref().filter(|p| !p.is_empty()).unwrap_or(default)
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.backend == CacheBackendKind::Redis && !self.redis_url.as_deref().is_some_and(|u| !u.trim().is_empty()) {
            return Err(Error::InvalidConfig(format!("{section}.redis_url is required for the redis backend")));
        }
        if self.backend == CacheBackendKind::Memory && self.capacity == 0 {
            return Err(Error::InvalidConfig(format!("{section}.capacity must be at least 1")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub embedding: CacheConfig,
    pub response: CacheConfig,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            embedding: CacheConfig { ttl_secs: Some(7 * 24 * 3600), ..CacheConfig::default() },
            response: CacheConfig { ttl_secs: Some(3600), ..CacheConfig::default() },
        }
    }
}
