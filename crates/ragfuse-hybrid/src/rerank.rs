//! Second pass over the fused candidates.
//!
//! A cheap lexical-overlap re-score orders the candidates; an external
//! relevance judge may then pick the final subset. Any judge failure falls
//! back to the head of the re-scored list, so reranking never fails.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;

use ragfuse_core::settings::RerankConfig;
use ragfuse_core::tokenize::{overlap_ratio, term_set};
use ragfuse_core::traits::RelevanceJudge;
use ragfuse_core::ContextSnippet;

const ORIGINAL_WEIGHT: f32 = 0.7;
const OVERLAP_WEIGHT: f32 = 0.3;

/// Why the judge's answer was not used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeFallback {
    /// No judge is configured.
    Disabled,
    /// The call failed: connection error, bad status, its own timeout or empty text.
    Unreachable,
    /// The call was cut at the query deadline.
    #[serde(rename = "timeout")]
    TimedOut,
    /// The reply held no valid `selected_indexes`.
    Malformed,
}

impl JudgeFallback {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Unreachable => "unreachable",
            Self::TimedOut => "timeout",
            Self::Malformed => "malformed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RerankOutcome {
    /// Selected candidates in final order, each with its original score.
    pub snippets: Vec<ContextSnippet>,
    pub judge_used: bool,
    pub fallback: Option<JudgeFallback>,
}

#[derive(Deserialize)]
struct JudgeSelection {
    selected_indexes: Vec<Value>,
}

pub struct Reranker {
    judge: Option<Arc<dyn RelevanceJudge>>,
    candidate_cap: usize,
    max_selected: usize,
}

impl Reranker {
    pub fn new(judge: Option<Arc<dyn RelevanceJudge>>, config: &RerankConfig) -> Self {
        Self { judge, candidate_cap: config.candidate_cap.max(1), max_selected: config.max_selected.max(1) }
    }

    pub fn candidate_cap(&self) -> usize {
        self.candidate_cap
    }

    pub async fn rerank(&self, query: &str, candidates: &[ContextSnippet]) -> RerankOutcome {
        self.rerank_before(query, candidates, None).await
    }

    /// Like [`rerank`](Self::rerank), with the judge call cut at `deadline`.
    pub async fn rerank_before(&self, query: &str, candidates: &[ContextSnippet], deadline: Option<Instant>) -> RerankOutcome {
        let capped = &candidates[..candidates.len().min(self.candidate_cap)];
        let submitted: Vec<ContextSnippet> = local_rescore(query, capped).into_iter().map(|(i, _)| capped[i].clone()).collect();
        let heuristic = |fallback| RerankOutcome {
            snippets: submitted.iter().take(self.max_selected).cloned().collect(),
            judge_used: false,
            fallback: Some(fallback),
        };

        let Some(judge) = &self.judge else { return heuristic(JudgeFallback::Disabled) };
        if submitted.is_empty() {
            return RerankOutcome { snippets: Vec::new(), judge_used: false, fallback: None };
        }

        let (system, user) = build_rerank_prompt(query, &submitted, self.max_selected);
        let call = judge.generate(&system, &user);
        let reply = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, call).await {
                Ok(reply) => reply,
                Err(_) => {
                    tracing::warn!(judge = judge.name(), reason = "timeout", "relevance judge cut at query deadline; using overlap heuristic");
                    return heuristic(JudgeFallback::TimedOut);
                }
            },
            None => call.await,
        };
        let raw = match reply {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(judge = judge.name(), error = %err, reason = "unreachable", "relevance judge failed; using overlap heuristic");
                return heuristic(JudgeFallback::Unreachable);
            }
        };
        match parse_selected_indexes(&raw, submitted.len(), self.max_selected) {
            Some(indexes) => {
                tracing::debug!(judge = judge.name(), selected = ?indexes, "relevance judge selection");
                RerankOutcome {
                    snippets: indexes.into_iter().map(|i| submitted[i].clone()).collect(),
                    judge_used: true,
                    fallback: None,
                }
            }
            None => {
                tracing::warn!(judge = judge.name(), reason = "malformed", "relevance judge reply unusable; using overlap heuristic");
                heuristic(JudgeFallback::Malformed)
            }
        }
    }
}

/// Candidate positions ordered by `0.7 * score + 0.3 * overlap`, best first,
/// ties in input order. A query without terms leaves the order untouched.
pub fn local_rescore(query: &str, candidates: &[ContextSnippet]) -> Vec<(usize, f32)> {
    let query_terms = term_set(query);
    let mut scored: Vec<(usize, f32)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, ORIGINAL_WEIGHT * c.score + OVERLAP_WEIGHT * overlap_ratio(&query_terms, &c.content)))
        .collect();
    if !query_terms.is_empty() {
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    }
    scored
}

/// System and user prompts asking for `{"selected_indexes":[...]}` over `candidates`.
pub fn build_rerank_prompt(query: &str, candidates: &[ContextSnippet], max_selected: usize) -> (String, String) {
    let system = format!(
        "You judge which passages help answer a question. Reply with JSON only, exactly of the form \
         {{\"selected_indexes\":[i1,i2,...]}}, listing at most {max_selected} unique passage indexes, most relevant first. \
         Use only indexes that appear in the list. Do not explain."
    );
    let listing: Vec<String> = candidates
        .iter()
        .enumerate()
        .map(|(index, c)| {
            json!({
                "index": index,
                "source": c.source,
                "score": (f64::from(c.score) * 10_000.0).round() / 10_000.0,
                "content": c.content,
            })
            .to_string()
        })
        .collect();
    let user = format!("Question: {query}\n\nPassages:\n{}", listing.join("\n"));
    (system, user)
}

/// Validated indexes from a judge reply.
///
/// Only the text between the first `{` and the last `}` is parsed. Values that
/// are not non-negative integers below `count`, and repeats, are dropped; the
/// first `max_selected` survivors are kept in reply order. `None` when nothing
/// valid remains.
pub fn parse_selected_indexes(raw: &str, count: usize, max_selected: usize) -> Option<Vec<usize>> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    let selection: JudgeSelection = serde_json::from_str(&raw[start..=end]).ok()?;
    let mut seen = HashSet::new();
    let indexes: Vec<usize> = selection
        .selected_indexes
        .iter()
        .filter_map(Value::as_u64)
        .filter_map(|i| usize::try_from(i).ok())
        .filter(|&i| i < count && seen.insert(i))
        .take(max_selected)
        .collect();
    (!indexes.is_empty()).then_some(indexes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_noisy_reply_with_invalid_entries() {
        let raw = r#"noise {"selected_indexes":[2,0,2,99,-1]} noise"#;
        assert_eq!(parse_selected_indexes(raw, 5, 5), Some(vec![2, 0]));
    }

    #[test]
    fn rejects_replies_without_valid_indexes() {
        assert_eq!(parse_selected_indexes("no json here", 5, 5), None);
        assert_eq!(parse_selected_indexes(r#"{"selected_indexes":[]}"#, 5, 5), None);
        assert_eq!(parse_selected_indexes(r#"{"selected_indexes":[7, 1.5, "2"]}"#, 5, 5), None);
        assert_eq!(parse_selected_indexes(r#"{"indexes":[1]}"#, 5, 5), None);
        assert_eq!(parse_selected_indexes("} {", 5, 5), None);
    }

    #[test]
    fn caps_selection_count() {
        let raw = r#"{"selected_indexes":[0,1,2,3,4,5,6]}"#;
        assert_eq!(parse_selected_indexes(raw, 10, 5), Some(vec![0, 1, 2, 3, 4]));
    }

    #[test]
    fn overlap_lifts_matching_candidate() {
        let candidates = vec![
            ContextSnippet::new("a", "seguro do imovel", 0.6),
            ContextSnippet::new("b", "juros habitacionais", 0.5),
        ];
        let order = local_rescore("juros habitacionais", &candidates);
        assert_eq!(order[0].0, 1);
        assert!((order[0].1 - (0.7 * 0.5 + 0.3)).abs() < 1e-6);
    }

    #[test]
    fn empty_query_terms_keep_order() {
        let candidates = vec![ContextSnippet::new("a", "x", 0.1), ContextSnippet::new("b", "y", 0.9)];
        let order: Vec<usize> = local_rescore("  ?! ", &candidates).into_iter().map(|(i, _)| i).collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn prompt_lists_candidates_with_rounded_scores() {
        let candidates = vec![ContextSnippet::new("c1", "Juros.", 0.123_456)];
        let (system, user) = build_rerank_prompt("juros?", &candidates, 3);
        assert!(system.contains("selected_indexes"));
        assert!(system.contains("at most 3"));
        let line = user.lines().last().expect("candidate line");
        let value: Value = serde_json::from_str(line).expect("json line");
        assert_eq!(value["index"], 0);
        assert_eq!(value["source"], "c1");
        assert!((value["score"].as_f64().expect("score") - 0.1235).abs() < 1e-9);
    }
}
