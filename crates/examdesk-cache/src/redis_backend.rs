//! Redis-protocol cache backend (Redis, Dragonfly).

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, PoolConfig, Runtime};
use redis::AsyncCommands;

use crate::backend::CacheBackend;
use crate::config::RedisConfig;
use crate::error::CacheError;

/// Server-side scan-and-delete over one key pattern.
///
/// Runs as a single script so no other client command interleaves with the
/// scan and the deletes. Dragonfly must allow undeclared keys in scripts
/// (`--default_lua_flags=allow-undeclared-keys`).
const FLUSH_SCRIPT: &str = r#"
local cursor = "0"
local removed = 0
repeat
    local reply = redis.call("SCAN", cursor, "MATCH", ARGV[1], "COUNT", 500)
    cursor = reply[1]
    local keys = reply[2]
    if #keys > 0 then
        removed = removed + redis.call("DEL", unpack(keys))
    end
until cursor == "0"
return removed
"#;

/// Pooled connection to a Redis-protocol server.
#[derive(Clone)]
pub struct RedisCacheBackend {
    pool: Pool,
    flush_script: redis::Script,
}

impl std::fmt::Debug for RedisCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheBackend")
            .field("status", &self.pool.status())
            .finish()
    }
}

impl RedisCacheBackend {
    /// Builds the connection pool and verifies the server answers a ping.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Config` if the pool cannot be built and
    /// `CacheError::Store` if the server is unreachable.
    pub async fn connect(config: &RedisConfig) -> Result<Self, CacheError> {
        tracing::info!(url = %config.masked_url(), "Connecting to cache server");

        let mut redis_config = deadpool_redis::Config::from_url(config.connection_url());
        let timeout = Some(Duration::from_millis(config.timeout_ms));
        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = timeout;
        pool_config.timeouts.create = timeout;
        pool_config.timeouts.recycle = timeout;
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::config(format!("failed to create pool: {e}")))?;

        let backend = Self::from_pool(pool);
        backend.ping().await?;
        tracing::info!("Connected to cache server");
        Ok(backend)
    }

    /// Wraps an existing pool without checking connectivity.
    pub fn from_pool(pool: Pool) -> Self {
        Self {
            pool,
            flush_script: redis::Script::new(FLUSH_SCRIPT),
        }
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.pool.get().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let mut conn = self.pool.get().await?;
        conn.pset_ex::<_, _, ()>(key, value, ttl_ms).await?;
        tracing::debug!(key = %key, ttl_ms, "cache set");
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().await?;
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn flush_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let pattern = format!("{prefix}*");
        let mut conn = self.pool.get().await?;
        let removed: u64 = self
            .flush_script
            .arg(&pattern)
            .invoke_async(&mut conn)
            .await?;
        tracing::info!(pattern = %pattern, removed, "cache namespace flushed");
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(CacheError::store(format!("unexpected PING reply: {pong}")))
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
