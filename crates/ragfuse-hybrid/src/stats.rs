use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters of queries and of every degraded path they took.
#[derive(Debug, Default)]
pub struct EngineStats {
    queries: AtomicU64,
    embedding_fallbacks: AtomicU64,
    vector_backend_fallbacks: AtomicU64,
    judge_fallbacks: AtomicU64,
    deadline_exceeded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub queries: u64,
    pub embedding_fallbacks: u64,
    pub vector_backend_fallbacks: u64,
    pub judge_fallbacks: u64,
    pub deadline_exceeded: u64,
    pub cache_errors: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl EngineStats {
    pub fn record_query(&self) {
        bump(&self.queries);
    }

    pub fn record_embedding_fallback(&self) {
        bump(&self.embedding_fallbacks);
    }

    pub fn record_vector_backend_fallback(&self) {
        bump(&self.vector_backend_fallbacks);
    }

    pub fn record_judge_fallback(&self) {
        bump(&self.judge_fallbacks);
    }

    pub fn record_deadline_exceeded(&self) {
        bump(&self.deadline_exceeded);
    }

    /// Cache errors are counted by the cache users themselves and passed in.
    pub fn snapshot(&self, cache_errors: u64) -> StatsSnapshot {
        StatsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            embedding_fallbacks: self.embedding_fallbacks.load(Ordering::Relaxed),
            vector_backend_fallbacks: self.vector_backend_fallbacks.load(Ordering::Relaxed),
            judge_fallbacks: self.judge_fallbacks.load(Ordering::Relaxed),
            deadline_exceeded: self.deadline_exceeded.load(Ordering::Relaxed),
            cache_errors,
        }
    }
}
