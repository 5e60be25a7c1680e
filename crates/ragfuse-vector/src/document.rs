use serde::{Deserialize, Serialize};

use ragfuse_core::corpus::unique_by_id;
use ragfuse_core::DocumentChunk;

/// Sentence-level unit. Ranked by `content`, returned as `parent_content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorDocument {
    /// Id of the parent chunk.
    pub source: String,
    pub content: String,
    pub parent_content: String,
    pub embedding: Vec<f32>,
}

/// Splits after `.`, `!` or `?` when whitespace follows. Pieces are trimmed and
/// empty pieces dropped; text without a boundary comes back whole.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|(_, next)| next.is_whitespace()) {
            let end = i + c.len_utf8();
            push_trimmed(&mut sentences, &text[start..end]);
            start = end;
        }
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, piece: &'a str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece);
    }
}

/// `(source, sentence, parent_content)` for every sentence of every distinct chunk.
pub(crate) fn sentence_units(chunks: &[DocumentChunk]) -> (usize, Vec<(&str, &str, &str)>) {
    let unique = unique_by_id(chunks);
    let mut units = Vec::new();
    for chunk in &unique {
        for sentence in split_sentences(&chunk.content) {
            units.push((chunk.id.as_str(), sentence, chunk.content.as_str()));
        }
    }
    (unique.len(), units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminal_punctuation_followed_by_space() {
        assert_eq!(
            split_sentences("Art. 5 trata de juros. Prazo de 30 dias!  Vale?\nSim"),
            vec!["Art.", "5 trata de juros.", "Prazo de 30 dias!", "Vale?", "Sim"]
        );
    }

    #[test]
    fn keeps_inner_dots_and_unbroken_text() {
        assert_eq!(split_sentences("lei 8.036/90 vigente"), vec!["lei 8.036/90 vigente"]);
        assert_eq!(split_sentences("fim."), vec!["fim."]);
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn units_reference_parent_chunk() {
        let chunks = vec![DocumentChunk::new("c1", "Um. Dois."), DocumentChunk::new("c2", "  ")];
        let (distinct, units) = sentence_units(&chunks);
        assert_eq!(distinct, 2);
        assert_eq!(units, vec![("c1", "Um.", "Um. Dois."), ("c1", "Dois.", "Um. Dois.")]);
    }
}
