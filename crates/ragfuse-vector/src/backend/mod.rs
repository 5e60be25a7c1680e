//! Vector store backends. Implementations must return cosine-derived scores
//! remapped into `[0, 1]` and must treat `replace_all` as a full overwrite.

use async_trait::async_trait;
use std::sync::Arc;

use ragfuse_core::settings::{VectorBackendKind, VectorConfig};

use crate::document::VectorDocument;

#[cfg(feature = "lance")]
pub mod lance;
pub mod qdrant;

#[cfg(feature = "lance")]
pub use lance::LanceBackend;
pub use qdrant::QdrantBackend;

/// One sentence hit as reported by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendMatch {
    pub source: String,
    pub parent_content: String,
    pub score: f32,
}

#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Replaces every stored document with `documents`.
    async fn replace_all(&self, documents: &[VectorDocument]) -> anyhow::Result<()>;

    /// Up to `limit` sentence hits for `query`, best first.
    async fn search(&self, query: &[f32], limit: usize) -> anyhow::Result<Vec<BackendMatch>>;
}

/// Remote backend for `config`, or `None` when search stays in process.
pub fn build_backend(config: &VectorConfig) -> anyhow::Result<Option<Arc<dyn VectorBackend>>> {
    match config.backend {
        VectorBackendKind::Disabled | VectorBackendKind::Local => Ok(None),
        VectorBackendKind::Qdrant => Ok(Some(Arc::new(QdrantBackend::new(config)?))),
        #[cfg(feature = "lance")]
        VectorBackendKind::Lance => {
            let path = ragfuse_core::config::expand_path(&config.path);
            Ok(Some(Arc::new(LanceBackend::new(&path, &config.table))))
        }
        #[cfg(not(feature = "lance"))]
        VectorBackendKind::Lance => anyhow::bail!("vector backend `lance` requires building with the `lance` feature"),
    }
}

/// Maps cosine similarity in `[-1, 1]` to `[0, 1]`.
pub(crate) fn remap_cosine(cos: f32) -> f32 {
    ragfuse_core::types::clamp_score((cos + 1.0) / 2.0)
}
