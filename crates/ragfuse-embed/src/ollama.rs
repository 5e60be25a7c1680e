//! Embedding model served over the Ollama `/api/embeddings` endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ragfuse_core::error::RemoteError;
use ragfuse_core::http::{build_client, join_url, send_json};
use ragfuse_core::retry::RetryPolicy;
use ragfuse_core::settings::EmbeddingConfig;
use ragfuse_core::traits::EmbeddingProvider;

use crate::l2_normalize;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    retry: RetryPolicy,
    id: String,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, RemoteError> {
        Ok(Self {
            client: build_client(config.timeout())?,
            url: join_url(&config.base_url, "/api/embeddings"),
            model: config.model.clone(),
            retry: config.retry.clone(),
            id: format!("ollama:{}", config.model),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn embedder_id(&self) -> &str {
        &self.id
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RemoteError> {
        let body = EmbeddingRequest { model: &self.model, prompt: text };
        let response: EmbeddingResponse = send_json(&self.retry, || self.client.post(&self.url).json(&body)).await?;
        let mut vector = response.embedding;
        if vector.is_empty() {
            return Err(RemoteError::Decode("embedding service returned an empty vector".into()));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(RemoteError::Decode("embedding contains non-finite values".into()));
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }
}
