use async_trait::async_trait;

use ragfuse_core::error::RemoteError;
use ragfuse_core::tokenize::terms;
use ragfuse_core::traits::EmbeddingProvider;

use crate::l2_normalize;

/// Feature-hashing embedder. Pure and reproducible: equal text gives an equal vector.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
    id: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self { dim, id: format!("hash:{dim}") }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Each term adds `±(1 + b5/255)` to bucket `u32_le(b0..b4) % dim` of its
    /// BLAKE3 digest `b`, with the sign taken from the parity of `b4`.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for term in terms(text) {
            let digest = blake3::hash(term.as_bytes());
            let bytes = digest.as_bytes();
            let bucket = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize % self.dim;
            let sign = if bytes[4] % 2 == 0 { 1.0 } else { -1.0 };
            let weight = 1.0 + f32::from(bytes[5]) / 255.0;
            v[bucket] += sign * weight;
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn embedder_id(&self) -> &str {
        &self.id
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RemoteError> {
        Ok(self.embed_sync(text))
    }
}
