//! ragfuse-cache
//!
//! Best-effort byte caches behind [`KvCache`]: a no-op backend, an in-process
//! moka cache with per-entry TTL and a redis backend. Callers treat every
//! error as a miss.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use ragfuse_core::settings::{CacheBackendKind, CacheConfig};
use ragfuse_core::traits::KvCache;

pub use memory::MemoryCache;
pub use redis_store::RedisCache;

/// Stores nothing; every lookup misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl KvCache for NoopCache {
    fn backend_name(&self) -> &'static str {
        "none"
    }

    async fn get(&self, _key: &str) -> ragfuse_core::Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> ragfuse_core::Result<()> {
        Ok(())
    }
}

/// Backend for `config`. An unusable redis URL degrades to the in-process cache.
pub fn build_cache(config: &CacheConfig) -> Arc<dyn KvCache> {
    match config.backend {
        CacheBackendKind::None => Arc::new(NoopCache),
        CacheBackendKind::Memory => Arc::new(MemoryCache::new(config.capacity.max(1))),
        CacheBackendKind::Redis => {
            let opened = config
                .redis_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("redis_url is not set"))
                .and_then(RedisCache::open);
            match opened {
                Ok(cache) => Arc::new(cache),
                Err(err) => {
                    tracing::warn!(error = %err, "redis cache unavailable; using in-process cache");
                    Arc::new(MemoryCache::new(config.capacity.max(1)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_always_misses() {
        let cache = NoopCache;
        cache.set("k", b"v".to_vec(), None).await.expect("set");
        assert_eq!(cache.get("k").await.expect("get"), None);
    }

    #[test]
    fn factory_selects_backend() {
        let none = CacheConfig { backend: CacheBackendKind::None, ..CacheConfig::default() };
        assert_eq!(build_cache(&none).backend_name(), "none");
        assert_eq!(build_cache(&CacheConfig::default()).backend_name(), "memory");
    }

    #[test]
    fn bad_redis_url_degrades_to_memory() {
        let config = CacheConfig {
            backend: CacheBackendKind::Redis,
            redis_url: Some("not a redis url".into()),
            ..CacheConfig::default()
        };
        assert_eq!(build_cache(&config).backend_name(), "memory");
        let missing = CacheConfig { backend: CacheBackendKind::Redis, ..CacheConfig::default() };
        assert_eq!(build_cache(&missing).backend_name(), "memory");
    }

    #[test]
    fn well_formed_redis_url_selects_redis() {
        let config = CacheConfig {
            backend: CacheBackendKind::Redis,
            redis_url: Some("redis://127.0.0.1:6379/".into()),
            ..CacheConfig::default()
        };
        assert_eq!(build_cache(&config).backend_name(), "redis");
    }
}
