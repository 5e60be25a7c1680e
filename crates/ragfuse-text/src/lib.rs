//! ragfuse-text
//!
//! In-memory BM25 lexical index. Builds produce an immutable snapshot that is
//! swapped in atomically, so queries see either the previous or the new corpus.
pub mod bm25;

pub use bm25::{Bm25Index, LexicalBuildStats};
