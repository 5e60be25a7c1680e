use serde::Serialize;
use std::collections::HashMap;

use ragfuse_core::settings::FusionConfig;
use ragfuse_core::types::{clamp_score, dedupe_best};
use ragfuse_core::{ContextSnippet, Result};

/// One fused candidate with the evidence behind its score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedHit {
    pub source: String,
    pub content: String,
    /// Weighted RRF sum scaled into `[0, 1]`.
    pub score: f32,
    /// Raw weighted RRF sum.
    pub rrf: f32,
    /// 1-based positions in each sub-ranker list.
    pub lexical_rank: Option<usize>,
    pub vector_rank: Option<usize>,
    pub lexical_score: f32,
    pub vector_score: f32,
}

impl FusedHit {
    pub fn to_snippet(&self) -> ContextSnippet {
        ContextSnippet::new(self.source.clone(), self.content.clone(), self.score)
    }
}

/// Weighted Reciprocal Rank Fusion.
///
/// `rrf(d) = Σ weight_list / (k + rank_list(d))`, ranks 1-based, summed over
/// the lists that contain `d`. Candidates are identified by `(source, content)`.
#[derive(Debug, Clone)]
pub struct RrfFusion {
    k: f32,
    weight_lexical: f32,
    weight_vector: f32,
}

impl RrfFusion {
    pub fn new(config: &FusionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { k: config.rrf_k, weight_lexical: config.weight_lexical, weight_vector: config.weight_vector })
    }

    /// Largest attainable sum: rank 1 in both lists.
    fn ceiling(&self) -> f32 {
        (self.weight_lexical + self.weight_vector) / (self.k + 1.0)
    }

    /// Descending by fused score; ties keep first appearance (lexical list first).
    /// Candidates whose sum is zero are dropped.
    #[allow(clippy::cast_precision_loss)]
    pub fn fuse(&self, lexical: &[ContextSnippet], vector: &[ContextSnippet], top_k: usize) -> Vec<FusedHit> {
        let mut hits: Vec<FusedHit> = Vec::new();
        let mut slots: HashMap<(String, String), usize> = HashMap::new();

        let lists = [
            (dedupe_best(lexical.iter().cloned()), self.weight_lexical, true),
            (dedupe_best(vector.iter().cloned()), self.weight_vector, false),
        ];
        for (list, weight, is_lexical) in lists {
            for (position, snippet) in list.into_iter().enumerate() {
                let rank = position + 1;
                let key = (snippet.source.clone(), snippet.content.clone());
                let slot = *slots.entry(key).or_insert_with(|| {
                    hits.push(FusedHit {
                        source: snippet.source.clone(),
                        content: snippet.content.clone(),
                        score: 0.0,
                        rrf: 0.0,
                        lexical_rank: None,
                        vector_rank: None,
                        lexical_score: 0.0,
                        vector_score: 0.0,
                    });
                    hits.len() - 1
                });
                let hit = &mut hits[slot];
                hit.rrf += weight / (self.k + rank as f32);
                if is_lexical {
                    hit.lexical_rank = Some(rank);
                    hit.lexical_score = snippet.score;
                } else {
                    hit.vector_rank = Some(rank);
                    hit.vector_score = snippet.score;
                }
            }
        }

        let ceiling = self.ceiling();
        hits.retain(|h| h.rrf > 0.0);
        for hit in &mut hits {
            hit.score = clamp_score(hit.rrf / ceiling);
        }
        hits.sort_by(|a, b| b.rrf.total_cmp(&a.rrf));
        hits.truncate(top_k);
        tracing::debug!(lexical = lexical.len(), vector = vector.len(), fused = hits.len(), "fusion complete");
        hits
    }
}
