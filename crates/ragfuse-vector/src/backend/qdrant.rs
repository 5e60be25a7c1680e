//! Qdrant over its REST API.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};

use ragfuse_core::error::RemoteError;
use ragfuse_core::http::{build_client, join_url, send_json};
use ragfuse_core::retry::RetryPolicy;
use ragfuse_core::settings::VectorConfig;

use super::{remap_cosine, BackendMatch, VectorBackend};
use crate::document::VectorDocument;

const UPSERT_BATCH: usize = 256;

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Deserialize)]
struct Payload {
    source: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    parent_content: Option<String>,
}

pub struct QdrantBackend {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl QdrantBackend {
    pub fn new(config: &VectorConfig) -> Result<Self, RemoteError> {
        Ok(Self {
            client: build_client(config.timeout())?,
            base_url: config.url.clone(),
            collection: config.collection.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            // The index falls back to a local scan immediately; no retries here.
            retry: RetryPolicy::none(),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = join_url(&self.base_url, &format!("/collections/{}{}", self.collection, path));
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    fn name(&self) -> &'static str {
        "qdrant"
    }

    async fn replace_all(&self, documents: &[VectorDocument]) -> anyhow::Result<()> {
        let Some(first) = documents.first() else { return Ok(()) };
        let dim = first.embedding.len();

        match send_json::<Value, _>(&self.retry, || self.request(Method::DELETE, "")).await {
            Ok(_) | Err(RemoteError::Status { status: 404, .. }) => {}
            Err(err) => return Err(err).context("dropping qdrant collection"),
        }
        let schema = json!({"vectors": {"size": dim, "distance": "Cosine"}});
        send_json::<Value, _>(&self.retry, || self.request(Method::PUT, "").json(&schema))
            .await
            .context("creating qdrant collection")?;

        for (batch_index, batch) in documents.chunks(UPSERT_BATCH).enumerate() {
            let points: Vec<Value> = batch
                .iter()
                .enumerate()
                .map(|(offset, doc)| {
                    json!({
                        "id": batch_index * UPSERT_BATCH + offset,
                        "vector": doc.embedding,
                        "payload": {"source": doc.source, "content": doc.content, "parent_content": doc.parent_content},
                    })
                })
                .collect();
            let body = json!({ "points": points });
            send_json::<Value, _>(&self.retry, || self.request(Method::PUT, "/points?wait=true").json(&body))
                .await
                .with_context(|| format!("upserting qdrant batch {batch_index}"))?;
        }
        tracing::info!(collection = %self.collection, points = documents.len(), "qdrant collection replaced");
        Ok(())
    }

    async fn search(&self, query: &[f32], limit: usize) -> anyhow::Result<Vec<BackendMatch>> {
        let body = json!({"vector": query, "limit": limit, "with_payload": true});
        let response: SearchResponse = send_json(&self.retry, || self.request(Method::POST, "/points/search").json(&body))
            .await
            .context("qdrant search")?;
        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload?;
                let parent_content = payload.parent_content.unwrap_or(payload.content);
                Some(BackendMatch { source: payload.source, parent_content, score: remap_cosine(point.score) })
            })
            .collect())
    }
}
