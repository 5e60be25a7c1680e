//! ragfuse-embed
//!
//! Embedding providers and the resilient front the indexes talk to:
//! - [`HashEmbedder`]: deterministic BLAKE3 feature hashing, always available
//! - [`OllamaEmbedder`]: remote model over HTTP with bounded retry
//! - [`ResilientEmbedder`]: cache lookup, remote call, fallback to hashing
//!
//! Every vector is L2-normalized (or all zeros for text without terms).

pub mod codec;
pub mod hash;
pub mod ollama;
pub mod resilient;

pub use hash::HashEmbedder;
pub use ollama::OllamaEmbedder;
pub use resilient::{Embedded, ResilientEmbedder};

/// Scales `v` to unit length in place; all-zero vectors stay zero.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
