use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ragfuse_core::settings::{EngineConfig, VectorBackendKind};
use ragfuse_core::traits::{RelevanceJudge, Retriever};
use ragfuse_core::{ContextSnippet, DocumentChunk, Error, Result};
use ragfuse_embed::ResilientEmbedder;
use ragfuse_text::{Bm25Index, LexicalBuildStats};
use ragfuse_vector::{VectorBackend, VectorBuildStats, VectorIndex};

use crate::fusion::{FusedHit, RrfFusion};
use crate::judge::build_judge;
use crate::rerank::{JudgeFallback, Reranker};
use crate::stats::{EngineStats, StatsSnapshot};

const MAX_FALLBACK_RESERVE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub lexical: LexicalBuildStats,
    pub vector: VectorBuildStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrieveOptions {
    pub top_k: usize,
    /// Overrides `retrieval.timeout_ms` for this call.
    pub timeout: Option<Duration>,
}

impl RetrieveOptions {
    pub fn new(top_k: usize) -> Self {
        Self { top_k, timeout: None }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Per-query account of what each stage produced and which fallbacks fired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetrievalDiagnostics {
    pub lexical_candidates: usize,
    pub vector_candidates: usize,
    pub fused_candidates: usize,
    pub embedding_fallback: bool,
    pub vector_backend_fallback: bool,
    pub vector_timed_out: bool,
    pub rerank_skipped: bool,
    pub judge_used: bool,
    pub judge_fallback_reason: Option<&'static str>,
    pub deadline_exceeded: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    pub snippets: Vec<ContextSnippet>,
    /// Fusion output before reranking, with per-list ranks and scores.
    pub candidates: Vec<FusedHit>,
    pub diagnostics: RetrievalDiagnostics,
}

/// Lexical and vector retrieval fused with RRF, optionally reranked, under one deadline.
pub struct HybridRetriever {
    config: EngineConfig,
    lexical: Arc<Bm25Index>,
    vector: VectorIndex,
    fusion: RrfFusion,
    reranker: Option<Reranker>,
    stats: EngineStats,
}

impl HybridRetriever {
    /// Builds every component from configuration. Remote collaborators that
    /// cannot be set up are replaced by their local fallbacks.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let embedder = Arc::new(ResilientEmbedder::from_config(&config.embedding, &config.cache.embedding)?);
        let vector = VectorIndex::from_config(&config.vector, embedder, config.embedding.concurrency);
        let judge = build_judge(&config.rerank)?;
        Self::assemble(config, vector, judge)
    }

    /// Same pipeline with caller-supplied collaborators.
    pub fn with_components(
        config: EngineConfig,
        embedder: Arc<ResilientEmbedder>,
        backend: Option<Arc<dyn VectorBackend>>,
        judge: Option<Arc<dyn RelevanceJudge>>,
    ) -> Result<Self> {
        config.validate()?;
        let vector = if config.vector.backend == VectorBackendKind::Disabled {
            VectorIndex::disabled(embedder)
        } else {
            let index = VectorIndex::new(embedder)
                .with_oversample(config.vector.oversample)
                .with_concurrency(config.embedding.concurrency);
            match backend {
                Some(backend) => index.with_backend(backend),
                None => index,
            }
        };
        Self::assemble(config, vector, judge)
    }

    fn assemble(config: EngineConfig, vector: VectorIndex, judge: Option<Arc<dyn RelevanceJudge>>) -> Result<Self> {
        let lexical = Arc::new(Bm25Index::new(config.lexical)?);
        let fusion = RrfFusion::new(&config.fusion)?;
        let reranker = config.rerank.enabled.then(|| Reranker::new(judge, &config.rerank));
        Ok(Self { config, lexical, vector, fusion, reranker, stats: EngineStats::default() })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.vector.embedder().cache_error_count())
    }

    /// Rebuilds both indexes from `chunks`. Queries running meanwhile see the
    /// previous snapshots until each swap completes.
    pub async fn index(&self, chunks: &[DocumentChunk]) -> Result<IndexReport> {
        let lexical = {
            let index = Arc::clone(&self.lexical);
            let owned = chunks.to_vec();
            tokio::task::spawn_blocking(move || index.build(&owned))
                .await
                .map_err(|e| Error::Internal(format!("lexical build panicked: {e}")))??
        };
        let vector = self.vector.build(chunks).await?;
        Ok(IndexReport { lexical, vector })
    }

    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ContextSnippet>> {
        Ok(self.retrieve_detailed(query, RetrieveOptions::new(top_k)).await?.snippets)
    }

    /// Full pipeline with diagnostics.
    ///
    /// Remote calls (embedding, vector backend, judge) are cut shortly before
    /// the deadline so their local fallbacks still run in time. Past the
    /// deadline itself the best list computed so far is returned: a vector
    /// lookup still running is abandoned and reranking is skipped.
    pub async fn retrieve_detailed(&self, query: &str, options: RetrieveOptions) -> Result<Retrieval> {
        let started = Instant::now();
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("query must not be empty".into()));
        }
        let top_k = options.top_k;
        if top_k == 0 {
            return Err(Error::InvalidInput("top_k must be at least 1".into()));
        }
        self.stats.record_query();
        let budget = options.timeout.unwrap_or_else(|| self.config.retrieval.timeout());
        let deadline = tokio::time::Instant::now() + budget;
        let cutoff = remote_cutoff(deadline, budget);
        let fetch_k = self.reranker.as_ref().map_or(top_k, |r| top_k.max(r.candidate_cap()));
        let mut diagnostics = RetrievalDiagnostics::default();

        let lexical_task = {
            let lexical = Arc::clone(&self.lexical);
            let query = query.to_string();
            tokio::task::spawn_blocking(move || lexical.retrieve(&query, fetch_k))
        };
        let vector_task = tokio::time::timeout_at(deadline, self.vector.retrieve_before(query, fetch_k, Some(cutoff)));
        let (lexical_joined, vector_outcome) = tokio::join!(lexical_task, vector_task);
        let lexical_hits = lexical_joined.map_err(|e| Error::Internal(format!("lexical lookup panicked: {e}")))?;

        let vector_hits = match vector_outcome {
            Ok(found) => {
                diagnostics.embedding_fallback = found.embedding_fallback;
                diagnostics.vector_backend_fallback = found.backend_fallback;
                found.snippets
            }
            Err(_) => {
                tracing::warn!(reason = "deadline", "vector lookup timed out; fusing lexical results only");
                diagnostics.vector_timed_out = true;
                diagnostics.deadline_exceeded = true;
                Vec::new()
            }
        };
        if diagnostics.embedding_fallback {
            self.stats.record_embedding_fallback();
        }
        if diagnostics.vector_backend_fallback {
            self.stats.record_vector_backend_fallback();
        }
        diagnostics.lexical_candidates = lexical_hits.len();
        diagnostics.vector_candidates = vector_hits.len();

        let candidates = self.fusion.fuse(&lexical_hits, &vector_hits, fetch_k);
        diagnostics.fused_candidates = candidates.len();
        let fused: Vec<ContextSnippet> = candidates.iter().map(FusedHit::to_snippet).collect();

        let mut snippets = match &self.reranker {
            None => fused,
            Some(_) if fused.is_empty() => fused,
            Some(_) if tokio::time::Instant::now() >= deadline => {
                tracing::warn!(reason = "deadline", "deadline reached before reranking; returning fused order");
                diagnostics.rerank_skipped = true;
                diagnostics.deadline_exceeded = true;
                fused
            }
            Some(reranker) => match tokio::time::timeout_at(deadline, reranker.rerank_before(query, &fused, Some(cutoff))).await {
                Ok(outcome) => {
                    diagnostics.judge_used = outcome.judge_used;
                    if let Some(fallback) = outcome.fallback {
                        diagnostics.judge_fallback_reason = Some(fallback.as_str());
                        if fallback != JudgeFallback::Disabled {
                            self.stats.record_judge_fallback();
                        }
                    }
                    outcome.snippets
                }
                Err(_) => {
                    tracing::warn!(reason = "deadline", "reranking timed out; returning fused order");
                    diagnostics.rerank_skipped = true;
                    diagnostics.deadline_exceeded = true;
                    fused
                }
            },
        };
        snippets.truncate(top_k);

        if diagnostics.deadline_exceeded {
            self.stats.record_deadline_exceeded();
        }
        diagnostics.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(
            lexical = diagnostics.lexical_candidates,
            vector = diagnostics.vector_candidates,
            fused = diagnostics.fused_candidates,
            returned = snippets.len(),
            elapsed_ms = diagnostics.elapsed_ms,
            "retrieval complete"
        );
        Ok(Retrieval { snippets, candidates, diagnostics })
    }

    /// Results for `queries` in input order, at most `retrieval.batch_concurrency`
    /// in flight. Each query fails or degrades on its own.
    pub fn retrieve_stream<'a>(
        &'a self,
        queries: &'a [String],
        top_k: usize,
    ) -> impl Stream<Item = Result<Vec<ContextSnippet>>> + 'a {
        stream::iter(queries.iter().map(move |query| self.retrieve(query, top_k)))
            .buffered(self.config.retrieval.batch_concurrency.max(1))
    }

    pub async fn retrieve_batch(&self, queries: &[String], top_k: usize) -> Vec<Result<Vec<ContextSnippet>>> {
        self.retrieve_stream(queries, top_k).collect().await
    }
}

/// Cut-off for remote calls: the deadline minus a reserve for local fallbacks.
fn remote_cutoff(deadline: tokio::time::Instant, budget: Duration) -> tokio::time::Instant {
    deadline.checked_sub((budget / 4).min(MAX_FALLBACK_RESERVE)).unwrap_or(deadline)
}

#[async_trait]
impl Retriever for HybridRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ContextSnippet>> {
        HybridRetriever::retrieve(self, query, top_k).await
    }
}
