//! Redis service exposing the primitives the queue is built from.

use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use tracing::info;

use crate::{RedisConfig, RedisError, Result};

type RedisPool = Pool<RedisConnectionManager>;

/// Redis service owning a bb8 pool and exposing queue primitives.
///
/// Every method maps to exactly one Redis command, so each call is atomic on
/// the server. Nothing here batches commands into transactions.
pub struct RedisService {
    config: RedisConfig,
    pool: RedisPool,
}

impl RedisService {
    /// Build the pool and verify the server answers a PING.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.connection_url()?)
            .map_err(|e| RedisError::Connection(e.to_string()))?;

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(config.min_idle)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| RedisError::Pool(e.to_string()))?;

        let service = Self { config, pool };
        service.health_check().await?;

        info!(
            pool_size = service.config.pool_size,
            url = %service.config.url,
            database = ?service.config.database,
            "Redis connection pool created"
        );
        Ok(service)
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    async fn conn(&self) -> Result<PooledConnection<'_, RedisConnectionManager>> {
        Ok(self.pool.get().await?)
    }

    /// PING the server through the pool.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: String = self
            .timed(redis::cmd("PING").query_async(&mut *conn))
            .await
            .map_err(|e| match e {
                RedisError::Timeout => RedisError::Timeout,
                other => RedisError::Connection(other.to_string()),
            })?;
        Ok(())
    }

    async fn timed<T>(&self, fut: impl Future<Output = redis::RedisResult<T>>) -> Result<T> {
        tokio::time::timeout(self.config.command_timeout, fut)
            .await
            .map_err(|_| RedisError::Timeout)?
            .map_err(RedisError::from)
    }

    // Strings

    /// GET a value.
    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        self.timed(conn.get(key)).await
    }

    /// SET a value.
    pub async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        self.timed(conn.set(key, value)).await
    }

    /// GETDEL: read a value and delete its key in one step.
    pub async fn take_value(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        self.timed(redis::cmd("GETDEL").arg(key).query_async(&mut *conn))
            .await
    }

    /// INCR a counter.
    pub async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        self.timed(conn.incr(key, 1_i64)).await
    }

    /// DEL one or more keys, returning how many existed.
    pub async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        self.timed(conn.del(keys)).await
    }

    // Lists

    /// RPUSH a value onto the tail of a list.
    pub async fn rpush(&self, key: &str, value: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        self.timed(conn.rpush(key, value)).await
    }

    /// LPUSH a value onto the head of a list.
    pub async fn lpush(&self, key: &str, value: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        self.timed(conn.lpush(key, value)).await
    }

    /// LPOP the head of a list.
    pub async fn lpop(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        self.timed(conn.lpop(key, None)).await
    }

    /// LLEN of a list.
    pub async fn llen(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        self.timed(conn.llen(key)).await
    }

    /// LRANGE over the whole list.
    pub async fn lrange_all(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        self.timed(conn.lrange(key, 0, -1)).await
    }

    // Sets

    /// SADD a member.
    pub async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let added: u64 = self.timed(conn.sadd(key, member)).await?;
        Ok(added > 0)
    }

    /// SREM a member.
    pub async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: u64 = self.timed(conn.srem(key, member)).await?;
        Ok(removed > 0)
    }

    /// SMEMBERS of a set.
    pub async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        self.timed(conn.smembers(key)).await
    }

    // Sorted sets

    /// ZADD a member with a score.
    pub async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: u64 = self.timed(conn.zadd(key, member, score)).await?;
        Ok(())
    }

    /// ZREM a member.
    pub async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: u64 = self.timed(conn.zrem(key, member)).await?;
        Ok(removed > 0)
    }

    /// ZRANGEBYSCORE from -inf up to and including `max`.
    pub async fn zrangebyscore_upto(&self, key: &str, max: i64) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        self.timed(conn.zrangebyscore(key, "-inf", max)).await
    }

    /// ZRANGE over the whole sorted set.
    pub async fn zrange_all(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        self.timed(conn.zrange(key, 0, -1)).await
    }
}
