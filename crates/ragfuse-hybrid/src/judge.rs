//! HTTP relevance judges.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use ragfuse_core::error::RemoteError;
use ragfuse_core::http::{build_client, join_url, send_json};
use ragfuse_core::retry::RetryPolicy;
use ragfuse_core::settings::{JudgeKind, RerankConfig};
use ragfuse_core::traits::RelevanceJudge;
use ragfuse_core::Result;

fn non_empty(text: String) -> std::result::Result<String, RemoteError> {
    if text.trim().is_empty() {
        Err(RemoteError::Decode("judge returned empty text".into()))
    } else {
        Ok(text)
    }
}

/// Ollama-compatible `/api/generate`, non-streaming.
pub struct OllamaJudge {
    client: reqwest::Client,
    base_url: String,
    model: String,
    retry: RetryPolicy,
    name: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaJudge {
    pub fn new(config: &RerankConfig) -> std::result::Result<Self, RemoteError> {
        Ok(Self {
            client: build_client(config.timeout())?,
            base_url: config.judge_base_url(),
            model: config.model.clone(),
            retry: config.retry.clone(),
            name: format!("ollama:{}", config.model),
        })
    }
}

#[async_trait]
impl RelevanceJudge for OllamaJudge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> std::result::Result<String, RemoteError> {
        let url = join_url(&self.base_url, "/api/generate");
        let body = json!({
            "model": self.model,
            "prompt": format!("{system_prompt}\n\n{user_prompt}"),
            "stream": false,
        });
        let reply: GenerateResponse = send_json(&self.retry, || self.client.post(&url).json(&body)).await?;
        non_empty(reply.response)
    }
}

/// OpenAI-compatible `/v1/responses`.
pub struct OpenAiJudge {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    retry: RetryPolicy,
    name: String,
}

#[derive(Deserialize)]
struct ResponsesReply {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Deserialize)]
struct OutputContent {
    #[serde(default)]
    text: Option<String>,
}

impl ResponsesReply {
    fn into_text(self) -> String {
        match self.output_text {
            Some(text) if !text.trim().is_empty() => text,
            _ => self.output.into_iter().flat_map(|item| item.content).filter_map(|c| c.text).collect(),
        }
    }
}

impl OpenAiJudge {
    pub fn new(config: &RerankConfig) -> std::result::Result<Self, RemoteError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| RemoteError::Unavailable("openai judge requires an api key".into()))?;
        Ok(Self {
            client: build_client(config.timeout())?,
            base_url: config.judge_base_url(),
            model: config.model.clone(),
            api_key,
            retry: config.retry.clone(),
            name: format!("openai:{}", config.model),
        })
    }
}

#[async_trait]
impl RelevanceJudge for OpenAiJudge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> std::result::Result<String, RemoteError> {
        let url = join_url(&self.base_url, "/v1/responses");
        let body = json!({
            "model": self.model,
            "input": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });
        let reply: ResponsesReply =
            send_json(&self.retry, || self.client.post(&url).bearer_auth(&self.api_key).json(&body)).await?;
        non_empty(reply.into_text())
    }
}

/// Judge selected by `config.judge`; `None` when reranking is off or no judge is configured.
pub fn build_judge(config: &RerankConfig) -> Result<Option<Arc<dyn RelevanceJudge>>> {
    if !config.enabled {
        return Ok(None);
    }
    let judge: Arc<dyn RelevanceJudge> = match config.judge {
        JudgeKind::None => return Ok(None),
        JudgeKind::Ollama => Arc::new(OllamaJudge::new(config)?),
        JudgeKind::OpenAi => Arc::new(OpenAiJudge::new(config)?),
    };
    tracing::debug!(judge = judge.name(), "relevance judge ready");
    Ok(Some(judge))
}
