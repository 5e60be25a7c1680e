use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::time::Instant;

use ragfuse_core::settings::{VectorBackendKind, VectorConfig};
use ragfuse_core::{ContextSnippet, DocumentChunk, Error, Result};
use ragfuse_embed::{HashEmbedder, ResilientEmbedder};

use crate::aggregate::best_per_parent;
use crate::backend::{build_backend, VectorBackend};
use crate::document::{sentence_units, VectorDocument};

#[derive(Default)]
struct Snapshot {
    documents: Vec<VectorDocument>,
    embedder_id: String,
    backend_synced: bool,
    /// Hash embeddings of `documents`, computed the first time a query had to fall back.
    fallback_vectors: OnceLock<Vec<Vec<f32>>>,
}

impl Snapshot {
    fn fallback_vectors(&self, hash: &HashEmbedder) -> &[Vec<f32>] {
        self.fallback_vectors
            .get_or_init(|| self.documents.iter().map(|d| hash.embed_sync(&d.content)).collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VectorBuildStats {
    pub chunks: usize,
    pub sentences: usize,
    pub embedder_id: String,
    pub backend_synced: bool,
}

/// Outcome of a vector query, with the degradations it went through.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorRetrieval {
    pub snippets: Vec<ContextSnippet>,
    /// Query and corpus vectors came from the hash embedder instead of the configured model.
    pub embedding_fallback: bool,
    /// The remote backend failed or was out of sync and the local scan answered.
    pub backend_fallback: bool,
}

pub struct VectorIndex {
    embedder: Arc<ResilientEmbedder>,
    backend: Option<Arc<dyn VectorBackend>>,
    enabled: bool,
    oversample: usize,
    concurrency: usize,
    current: RwLock<Arc<Snapshot>>,
    build_lock: tokio::sync::Mutex<()>,
    backend_fallbacks: AtomicU64,
}

impl VectorIndex {
    /// In-process index.
    pub fn new(embedder: Arc<ResilientEmbedder>) -> Self {
        Self {
            embedder,
            backend: None,
            enabled: true,
            oversample: 4,
            concurrency: 4,
            current: RwLock::new(Arc::new(Snapshot::default())),
            build_lock: tokio::sync::Mutex::new(()),
            backend_fallbacks: AtomicU64::new(0),
        }
    }

    /// Index that stores nothing and always answers with an empty list.
    pub fn disabled(embedder: Arc<ResilientEmbedder>) -> Self {
        Self { enabled: false, ..Self::new(embedder) }
    }

    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn VectorBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    #[must_use]
    pub fn with_oversample(mut self, oversample: usize) -> Self {
        self.oversample = oversample.max(1);
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// A backend that cannot be constructed is logged and replaced by the local scan.
    pub fn from_config(config: &VectorConfig, embedder: Arc<ResilientEmbedder>, concurrency: usize) -> Self {
        if config.backend == VectorBackendKind::Disabled {
            return Self::disabled(embedder);
        }
        let mut index = Self::new(embedder).with_oversample(config.oversample).with_concurrency(concurrency);
        match build_backend(config) {
            Ok(Some(backend)) => index = index.with_backend(backend),
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "vector backend unavailable; using local scan"),
        }
        index
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.snapshot().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn embedder(&self) -> &ResilientEmbedder {
        &self.embedder
    }

    pub fn backend_fallback_count(&self) -> u64 {
        self.backend_fallbacks.load(Ordering::Relaxed)
    }

    /// Embeds every sentence and swaps in the new snapshot. The remote backend,
    /// if any, is overwritten too; a failure there only disables it until the next build.
    pub async fn build(&self, chunks: &[DocumentChunk]) -> Result<VectorBuildStats> {
        if !self.enabled {
            return Ok(VectorBuildStats::default());
        }
        let _guard = self.build_lock.lock().await;
        let (distinct, units) = sentence_units(chunks);
        if units.is_empty() {
            return Err(Error::EmptyCorpus);
        }

        let texts: Vec<String> = units.iter().map(|(_, sentence, _)| (*sentence).to_string()).collect();
        let primary_id = self.embedder.active_id().to_string();
        let (embedder_id, vectors): (String, Vec<Vec<f32>>) =
            match self.embedder.embed_many_uniform(&texts, self.concurrency).await {
                Some(embedded) => (primary_id, embedded.into_iter().map(|e| e.vector).collect()),
                None => {
                    tracing::warn!(sentences = texts.len(), "embedding provider failed during build; indexing with hash embedding");
                    let hash = self.embedder.fallback();
                    (hash.id().to_string(), texts.iter().map(|t| hash.embed_sync(t)).collect())
                }
            };

        let documents: Vec<VectorDocument> = units
            .iter()
            .zip(vectors)
            .map(|((source, sentence, parent), embedding)| VectorDocument {
                source: (*source).to_string(),
                content: (*sentence).to_string(),
                parent_content: (*parent).to_string(),
                embedding,
            })
            .collect();

        let backend_synced = match &self.backend {
            Some(backend) => match backend.replace_all(&documents).await {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(backend = backend.name(), error = %format!("{err:#}"), "vector backend sync failed; local scan will serve queries");
                    false
                }
            },
            None => false,
        };

        let stats = VectorBuildStats { chunks: distinct, sentences: documents.len(), embedder_id: embedder_id.clone(), backend_synced };
        *self.current.write() = Arc::new(Snapshot { documents, embedder_id, backend_synced, fallback_vectors: OnceLock::new() });
        tracing::info!(chunks = stats.chunks, sentences = stats.sentences, embedder = %stats.embedder_id, backend_synced, "vector index built");
        Ok(stats)
    }

    /// Best `top_k` parent chunks for `query`. Never fails; degraded paths are flagged.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> VectorRetrieval {
        self.retrieve_before(query, top_k, None).await
    }

    /// Like [`retrieve`](Self::retrieve), with the embedding call and the remote
    /// search cut at `deadline`. A cut call degrades like a failed one.
    pub async fn retrieve_before(&self, query: &str, top_k: usize, deadline: Option<Instant>) -> VectorRetrieval {
        let mut outcome = VectorRetrieval::default();
        if !self.enabled || top_k == 0 {
            return outcome;
        }
        let snapshot = self.snapshot();
        if snapshot.documents.is_empty() {
            return outcome;
        }

        let hash = self.embedder.fallback();
        let embedded = self.embedder.embed_before(query, deadline).await;
        if embedded.embedder_id == snapshot.embedder_id {
            // Hashed corpus and a query hashed after a provider failure.
            outcome.embedding_fallback = embedded.fell_back;
            if let Some(backend) = self.backend.as_ref().filter(|_| snapshot.backend_synced) {
                let limit = top_k.saturating_mul(self.oversample).max(top_k);
                let search = backend.search(&embedded.vector, limit);
                let searched = match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, search)
                        .await
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("search cut at query deadline"))),
                    None => search.await,
                };
                match searched {
                    Ok(matches) => {
                        outcome.snippets =
                            best_per_parent(matches.iter().map(|m| (m.source.as_str(), m.parent_content.as_str(), m.score)), top_k);
                        return outcome;
                    }
                    Err(err) => {
                        self.backend_fallbacks.fetch_add(1, Ordering::Relaxed);
                        outcome.backend_fallback = true;
                        tracing::warn!(backend = backend.name(), error = %format!("{err:#}"), "vector backend search failed; scanning locally");
                    }
                }
            } else if self.backend.is_some() {
                outcome.backend_fallback = true;
            }
            outcome.snippets = scan(&snapshot.documents, snapshot.documents.iter().map(|d| d.embedding.as_slice()), &embedded.vector, top_k);
            return outcome;
        }

        outcome.embedding_fallback = true;
        if self.backend.is_some() {
            outcome.backend_fallback = true;
        }
        if snapshot.embedder_id == hash.id() {
            // Corpus was hashed at build time; hash the query to match.
            let query_vector = hash.embed_sync(query);
            outcome.snippets = scan(&snapshot.documents, snapshot.documents.iter().map(|d| d.embedding.as_slice()), &query_vector, top_k);
        } else {
            let vectors = snapshot.fallback_vectors(hash);
            outcome.snippets = scan(&snapshot.documents, vectors.iter().map(Vec::as_slice), &embedded.vector, top_k);
        }
        outcome
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }
}

fn scan<'a, V>(documents: &'a [VectorDocument], vectors: V, query: &[f32], top_k: usize) -> Vec<ContextSnippet>
where
    V: Iterator<Item = &'a [f32]>,
{
    let scored = documents
        .iter()
        .zip(vectors)
        .map(|(doc, vector)| (doc.source.as_str(), doc.parent_content.as_str(), cosine_score(query, vector)));
    best_per_parent(scored, top_k)
}

/// Cosine similarity remapped to `[0, 1]`. A zero vector or a dimension
/// mismatch scores `0`, which keeps the pair out of the results.
pub fn cosine_score(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0_f32, 0.0_f32, 0.0_f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    crate::backend::remap_cosine(dot / (na.sqrt() * nb.sqrt()))
}
