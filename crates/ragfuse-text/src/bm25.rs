use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use ragfuse_core::corpus::unique_by_id;
use ragfuse_core::settings::LexicalConfig;
use ragfuse_core::tokenize::tokenize;
use ragfuse_core::{ContextSnippet, DocumentChunk, Error, Result, SearchHit, SourceKind};

#[derive(Debug, Clone, Copy)]
struct Posting {
    doc: u32,
    tf: u32,
}

#[derive(Debug, Default)]
struct Snapshot {
    chunks: Vec<DocumentChunk>,
    doc_lens: Vec<u32>,
    avg_len: f32,
    postings: HashMap<String, Vec<Posting>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LexicalBuildStats {
    pub documents: usize,
    /// Chunks without a single token.
    pub skipped: usize,
    /// Chunks shadowed by a later chunk with the same id.
    pub replaced: usize,
    pub vocabulary: usize,
}

/// Okapi BM25 over the most recent successful build.
pub struct Bm25Index {
    params: LexicalConfig,
    current: RwLock<Arc<Snapshot>>,
    build_lock: Mutex<()>,
}

impl Bm25Index {
    pub fn new(params: LexicalConfig) -> Result<Self> {
        params.validate()?;
        Ok(Self { params, current: RwLock::new(Arc::new(Snapshot::default())), build_lock: Mutex::new(()) })
    }

    /// Replaces the indexed corpus. On error the previous snapshot stays live.
    pub fn build(&self, chunks: &[DocumentChunk]) -> Result<LexicalBuildStats> {
        let _guard = self.build_lock.lock();
        let (snapshot, stats) = Snapshot::build(chunks)?;
        *self.current.write() = Arc::new(snapshot);
        tracing::info!(documents = stats.documents, skipped = stats.skipped, replaced = stats.replaced, vocabulary = stats.vocabulary, "lexical index built");
        Ok(stats)
    }

    pub fn len(&self) -> usize {
        self.snapshot().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw BM25 hits, best first, at most `top_k`. Documents scoring `0` are omitted.
    pub fn score(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let snapshot = self.snapshot();
        snapshot
            .rank(&self.params, &tokenize(query), top_k)
            .into_iter()
            .map(|(doc, score)| SearchHit { id: snapshot.chunks[doc].id.clone(), score, source: SourceKind::Lexical })
            .collect()
    }

    /// Hits as snippets with scores divided by the best score of this result set.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Vec<ContextSnippet> {
        let snapshot = self.snapshot();
        let ranked = snapshot.rank(&self.params, &tokenize(query), top_k);
        let max = ranked.first().map_or(0.0, |(_, score)| *score);
        ranked
            .into_iter()
            .map(|(doc, score)| {
                let chunk = &snapshot.chunks[doc];
                let normalized = if max > 0.0 { score / max } else { 0.0 };
                ContextSnippet::new(chunk.id.clone(), chunk.content.clone(), normalized)
            })
            .collect()
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }
}

impl Snapshot {
    #[allow(clippy::cast_precision_loss)]
    fn build(chunks: &[DocumentChunk]) -> Result<(Self, LexicalBuildStats)> {
        let unique = unique_by_id(chunks);
        let mut stats = LexicalBuildStats { replaced: chunks.len() - unique.len(), ..LexicalBuildStats::default() };
        let mut snapshot = Snapshot::default();
        let mut total_len: u64 = 0;

        for chunk in unique {
            let tokens = tokenize(&chunk.content);
            if tokens.is_empty() {
                stats.skipped += 1;
                continue;
            }
            let doc = u32::try_from(snapshot.chunks.len()).map_err(|_| Error::Internal("corpus exceeds u32 documents".into()))?;
            let mut counts: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *counts.entry(token.clone()).or_insert(0) += 1;
            }
            for (term, tf) in counts {
                snapshot.postings.entry(term).or_default().push(Posting { doc, tf });
            }
            let len = u32::try_from(tokens.len()).unwrap_or(u32::MAX);
            total_len += u64::from(len);
            snapshot.doc_lens.push(len);
            snapshot.chunks.push(chunk.clone());
        }

        if snapshot.chunks.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        snapshot.avg_len = total_len as f32 / snapshot.chunks.len() as f32;
        stats.documents = snapshot.chunks.len();
        stats.vocabulary = snapshot.postings.len();
        Ok((snapshot, stats))
    }

    /// `(doc, score)` pairs with positive score, descending; ties keep corpus order.
    #[allow(clippy::cast_precision_loss)]
    fn rank(&self, params: &LexicalConfig, query_tokens: &[String], top_k: usize) -> Vec<(usize, f32)> {
        if top_k == 0 || query_tokens.is_empty() || self.chunks.is_empty() {
            return Vec::new();
        }
        let n = self.chunks.len() as f32;
        let mut scores = vec![0.0_f32; self.chunks.len()];
        for token in query_tokens {
            let Some(postings) = self.postings.get(token) else { continue };
            let df = postings.len() as f32;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            for posting in postings {
                let tf = posting.tf as f32;
                let dl = self.doc_lens[posting.doc as usize] as f32;
                let norm = params.k1 * (1.0 - params.b + params.b * dl / self.avg_len);
                scores[posting.doc as usize] += idf * tf * (params.k1 + 1.0) / (tf + norm);
            }
        }
        let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().filter(|(_, s)| *s > 0.0).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(top_k);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(chunks: &[DocumentChunk]) -> Bm25Index {
        let index = Bm25Index::new(LexicalConfig::default()).expect("params");
        index.build(chunks).expect("build");
        index
    }

    fn legal_corpus() -> Vec<DocumentChunk> {
        vec![
            DocumentChunk::new("c1", "Art. 5 trata de juros."),
            DocumentChunk::new("c2", "Art. 6 trata de multa."),
            DocumentChunk::new("c3", "Prazo de 30 dias."),
        ]
    }

    #[test]
    fn exact_code_match_ranks_first() {
        let idx = index(&legal_corpus());
        let hits = idx.retrieve("art. 5 juros", 3);
        assert_eq!(hits[0].source, "c1");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits.iter().all(|h| h.score > 0.0 && h.score <= 1.0));
        assert!(hits.iter().all(|h| h.source != "c3"), "no shared token with c3");
    }

    #[test]
    fn unbuilt_index_returns_nothing() {
        let idx = Bm25Index::new(LexicalConfig::default()).expect("params");
        assert!(idx.retrieve("juros", 5).is_empty());
        assert!(idx.is_empty());
    }

    #[test]
    fn empty_or_symbol_query_returns_nothing() {
        let idx = index(&legal_corpus());
        assert!(idx.retrieve("", 5).is_empty());
        assert!(idx.retrieve("?!", 5).is_empty());
        assert!(idx.retrieve("juros", 0).is_empty());
    }

    #[test]
    fn empty_corpus_fails_and_keeps_previous_snapshot() {
        let idx = index(&legal_corpus());
        let err = idx.build(&[DocumentChunk::new("x", "  ... ")]).unwrap_err();
        assert!(matches!(err, Error::EmptyCorpus));
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.retrieve("multa", 1)[0].source, "c2");
    }

    #[test]
    fn rebuilding_with_same_corpus_is_idempotent() {
        let idx = index(&legal_corpus());
        let first = idx.retrieve("trata de juros", 3);
        idx.build(&legal_corpus()).expect("rebuild");
        assert_eq!(first, idx.retrieve("trata de juros", 3));
    }

    #[test]
    fn ties_keep_corpus_order() {
        let idx = index(&[
            DocumentChunk::new("a", "juros"),
            DocumentChunk::new("b", "juros"),
            DocumentChunk::new("c", "multa"),
        ]);
        let order: Vec<String> = idx.retrieve("juros", 5).into_iter().map(|h| h.source).collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn duplicate_ids_keep_last_content() {
        let idx = index(&[DocumentChunk::new("a", "juros antigos"), DocumentChunk::new("a", "multa nova")]);
        assert_eq!(idx.len(), 1);
        assert!(idx.retrieve("juros", 5).is_empty());
        assert_eq!(idx.retrieve("multa", 5)[0].content, "multa nova");
    }

    #[test]
    fn raw_scores_are_descending_and_positive() {
        let idx = index(&legal_corpus());
        let hits = idx.score("trata de juros", 10);
        assert!(!hits.is_empty());
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits.iter().all(|h| h.score > 0.0 && h.source == SourceKind::Lexical));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(Bm25Index::new(LexicalConfig { k1: 1.5, b: 2.0 }).is_err());
    }
}
