//! Text normalization shared by lexical scoring, hash embedding and overlap re-scoring.

use std::collections::HashSet;

const EDGE_PUNCTUATION: &[char] = &['.', ',', ':', ';', '!', '?', '(', ')', '[', ']', '{', '}', '"', '\''];

fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')
}

fn is_joiner(c: char) -> bool {
    matches!(c, '-' | '.' | '/')
}

/// Lexical tokens: lowercase runs of alphanumerics plus `_ - . /`, with
/// leading and trailing `- . /` removed.
///
/// Codes such as `5/2023`, `lei-8.036` or `art.5` stay in one piece while a
/// sentence-final `juros.` becomes `juros`. Runs without any alphanumeric
/// character are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !is_token_char(c))
        .map(|token| token.trim_matches(is_joiner))
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .map(str::to_string)
        .collect()
}

/// Whitespace-separated terms, edge punctuation stripped, lowercased.
pub fn terms(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|raw| raw.trim_matches(EDGE_PUNCTUATION).to_lowercase())
        .filter(|term| !term.is_empty())
        .collect()
}

pub fn term_set(text: &str) -> HashSet<String> {
    terms(text).into_iter().collect()
}

/// Share of the distinct query terms that also occur in `text`, in `[0, 1]`.
#[allow(clippy::cast_precision_loss)]
pub fn overlap_ratio(query_terms: &HashSet<String>, text: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let text_terms = term_set(text);
    let shared = query_terms.iter().filter(|t| text_terms.contains(*t)).count();
    shared as f32 / query_terms.len() as f32
}
