//! ragfuse-hybrid
//!
//! The retrieval pipeline: lexical and vector candidates are fetched
//! concurrently, fused with weighted Reciprocal Rank Fusion, optionally
//! reranked by an external relevance judge and cut to `top_k`, all under one
//! deadline. Optional stages degrade instead of failing.

pub mod engine;
pub mod fusion;
pub mod judge;
pub mod rerank;
pub mod response_cache;
pub mod stats;

pub use engine::{HybridRetriever, IndexReport, Retrieval, RetrievalDiagnostics, RetrieveOptions};
pub use fusion::{FusedHit, RrfFusion};
pub use judge::{build_judge, OllamaJudge, OpenAiJudge};
pub use rerank::{JudgeFallback, RerankOutcome, Reranker};
pub use response_cache::{AnswerRequest, ResponseCache};
pub use stats::{EngineStats, StatsSnapshot};
