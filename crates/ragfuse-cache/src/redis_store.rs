//! Networked cache on redis (or valkey), one lazily opened multiplexed connection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::FromRedisValue;
use std::time::Duration;
use tokio::sync::Mutex;

use ragfuse_core::traits::KvCache;
use ragfuse_core::Error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RedisCache {
    client: redis::Client,
    url: String,
    connection: Mutex<Option<redis::aio::MultiplexedConnection>>,
}

impl RedisCache {
    /// Parses the URL; the connection is opened on first use.
    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).with_context(|| format!("invalid redis url: {url}"))?;
        Ok(Self { client, url: url.to_string(), connection: Mutex::new(None) })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn ensure_connection(&self, connection: &mut Option<redis::aio::MultiplexedConnection>) -> Result<()> {
        if connection.is_some() {
            return Ok(());
        }
        let opened = tokio::time::timeout(CONNECT_TIMEOUT, self.client.get_multiplexed_async_connection())
            .await
            .context("timed out opening redis connection")?
            .context("failed to open redis connection")?;
        *connection = Some(opened);
        tracing::debug!(url = %self.url, "redis cache connected");
        Ok(())
    }

    async fn run_command<T>(&self, operation: &'static str, cmd: redis::Cmd) -> Result<T>
    where
        T: FromRedisValue + Send,
    {
        let mut conn_guard = self.connection.lock().await;
        self.ensure_connection(&mut conn_guard).await?;
        let conn = conn_guard.as_mut().ok_or_else(|| anyhow::anyhow!("redis connection unavailable"))?;
        let result: redis::RedisResult<T> = cmd.query_async(conn).await;
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                // Drop the connection so the next call reconnects.
                *conn_guard = None;
                Err(anyhow::anyhow!(err).context(format!("redis {operation} failed")))
            }
        }
    }
}

fn cache_error(err: &anyhow::Error) -> Error {
    Error::Cache(format!("{err:#}"))
}

#[async_trait]
impl KvCache for RedisCache {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> ragfuse_core::Result<Option<Vec<u8>>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run_command::<Option<Vec<u8>>>("GET", cmd).await.map_err(|e| cache_error(&e))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> ragfuse_core::Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        self.run_command::<()>("SET", cmd).await.map_err(|e| cache_error(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_url() {
        assert!(RedisCache::open("definitely not a url").is_err());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_cache_error() {
        let cache = RedisCache::open("redis://127.0.0.1:1/").expect("url parses");
        assert_eq!(cache.url(), "redis://127.0.0.1:1/");
        let err = cache.get("key").await.unwrap_err();
        assert!(matches!(err, Error::Cache(_)));
        let err = cache.set("key", b"v".to_vec(), Some(Duration::from_secs(5))).await.unwrap_err();
        assert!(matches!(err, Error::Cache(_)));
    }
}
