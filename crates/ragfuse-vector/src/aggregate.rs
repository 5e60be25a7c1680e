//! Best-of aggregation from sentence scores to parent chunks.

use std::collections::HashMap;

use ragfuse_core::ContextSnippet;

/// Keeps the best score per `(source, parent_content)`, sorts descending (ties
/// in first-seen order) and returns up to `top_k` parents with a positive score.
pub fn best_per_parent<'a, I>(scored: I, top_k: usize) -> Vec<ContextSnippet>
where
    I: IntoIterator<Item = (&'a str, &'a str, f32)>,
{
    let mut slots: HashMap<(&str, &str), usize> = HashMap::new();
    let mut best: Vec<(&str, &str, f32)> = Vec::new();
    for (source, parent, score) in scored {
        match slots.get(&(source, parent)) {
            Some(&slot) => {
                if score > best[slot].2 {
                    best[slot].2 = score;
                }
            }
            None => {
                slots.insert((source, parent), best.len());
                best.push((source, parent, score));
            }
        }
    }
    best.retain(|(_, _, score)| *score > 0.0);
    best.sort_by(|a, b| b.2.total_cmp(&a.2));
    best.into_iter()
        .take(top_k)
        .map(|(source, parent, score)| ContextSnippet::new(source, parent, score))
        .collect()
}
