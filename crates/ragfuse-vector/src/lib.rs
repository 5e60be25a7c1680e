//! ragfuse-vector
//!
//! Small-to-big semantic index: chunks are split into sentences, sentences are
//! embedded and ranked, and each hit returns its parent chunk. One entry is
//! kept per `(source, parent_content)` with the best sentence score.
//!
//! Search runs against a pluggable [`backend::VectorBackend`] when one is
//! configured and healthy, and against the in-process snapshot otherwise.

pub mod aggregate;
pub mod backend;
pub mod document;
pub mod index;

pub use backend::{BackendMatch, VectorBackend};
pub use document::{split_sentences, VectorDocument};
pub use index::{cosine_score, VectorBuildStats, VectorIndex, VectorRetrieval};
