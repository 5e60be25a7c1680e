use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub type ChunkId = String;

/// Arbitrary per-chunk attributes carried from ingestion (path, category, ...).
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Immutable unit of indexed text supplied by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: ChunkId,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DocumentChunk {
    pub fn new(id: impl Into<ChunkId>, content: impl Into<String>) -> Self {
        Self { id: id.into(), content: content.into(), metadata: Metadata::new() }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Indicates which sub-ranker produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Lexical,
    Vector,
}

/// Raw sub-ranker hit. `score` is engine specific; higher is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: ChunkId,
    pub score: f32,
    pub source: SourceKind,
}

/// The unit exchanged between pipeline stages and returned to callers.
///
/// `source` is the id of the chunk the text came from and `score` lies in `[0, 1]`.
/// `(source, content)` is the identity used for deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnippet {
    pub source: String,
    pub content: String,
    pub score: f32,
}

impl ContextSnippet {
    pub fn new(source: impl Into<String>, content: impl Into<String>, score: f32) -> Self {
        Self { source: source.into(), content: content.into(), score: clamp_score(score) }
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.source, &self.content)
    }
}

/// Clamps into `[0, 1]`; NaN becomes `0`.
pub fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Collapses snippets sharing `(source, content)` into one entry holding the
/// highest score. Output keeps first-seen order.
pub fn dedupe_best<I>(snippets: I) -> Vec<ContextSnippet>
where
    I: IntoIterator<Item = ContextSnippet>,
{
    let mut out: Vec<ContextSnippet> = Vec::new();
    let mut seen: HashMap<(String, String), usize> = HashMap::new();
    for snippet in snippets {
        let key = (snippet.source.clone(), snippet.content.clone());
        match seen.get(&key) {
            Some(&slot) => {
                if snippet.score > out[slot].score {
                    out[slot].score = snippet.score;
                }
            }
            None => {
                seen.insert(key, out.len());
                out.push(snippet);
            }
        }
    }
    out
}
