//! In-process cache on moka with a per-entry TTL.

use async_trait::async_trait;
use moka::sync::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};

use ragfuse_core::traits::KvCache;

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    ttl: Option<Duration>,
}

struct EntryTtl;

impl Expiry<String, Entry> for EntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _created_at: Instant) -> Option<Duration> {
        entry.ttl
    }

    fn expire_after_update(&self, _key: &String, entry: &Entry, _updated_at: Instant, _remaining: Option<Duration>) -> Option<Duration> {
        entry.ttl
    }
}

/// Bounded byte cache. Keys are opaque strings chosen by the caller.
pub struct MemoryCache {
    cache: Cache<String, Entry>,
}

impl MemoryCache {
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_entries).expire_after(EntryTtl).build();
        Self { cache }
    }

    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvCache for MemoryCache {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> ragfuse_core::Result<Option<Vec<u8>>> {
        Ok(self.cache.get(key).map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> ragfuse_core::Result<()> {
        self.cache.insert(key.to_string(), Entry { value, ttl });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_get() {
        let cache = MemoryCache::new(100);
        cache.set("a", vec![1, 2, 3], None).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let cache = MemoryCache::new(100);
        assert_eq!(cache.get("nonexistent").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn last_write_wins() {
        let cache = MemoryCache::new(100);
        cache.set("k", b"first".to_vec(), None).await.unwrap();
        cache.set("k", b"second".to_vec(), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn entries_expire_after_their_ttl() {
        let cache = MemoryCache::new(100);
        cache.set("short", b"x".to_vec(), Some(Duration::from_millis(50))).await.unwrap();
        cache.set("long", b"y".to_vec(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.get("long").await.unwrap(), Some(b"y".to_vec()));
    }
}
