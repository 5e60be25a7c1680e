use async_trait::async_trait;
use std::time::Duration;

use crate::error::RemoteError;
use crate::types::ContextSnippet;

/// Producer of L2-normalized embedding vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier of the provider and model, e.g. `hash:192` or `ollama:nomic-embed-text`.
    /// Vectors with different ids are never compared.
    fn embedder_id(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RemoteError>;
}

/// Best-effort byte store. A miss is `Ok(None)`; an error never means data loss.
#[async_trait]
pub trait KvCache: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn get(&self, key: &str) -> crate::Result<Option<Vec<u8>>>;

    /// `ttl = None` keeps the entry until evicted.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> crate::Result<()>;
}

/// External text generator used to judge relevance (and, downstream, to answer).
#[async_trait]
pub trait RelevanceJudge: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, RemoteError>;
}

/// Entry point the answer-generation collaborator calls.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> crate::Result<Vec<ContextSnippet>>;
}
