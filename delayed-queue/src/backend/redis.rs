//! Redis backend.

use super::Backend;
use crate::error::QueueResult;
use async_trait::async_trait;
use delayed_queue_redis::{RedisConfig, RedisService};
use std::sync::Arc;
use tracing::info;

/// Backend that maps each primitive onto one Redis command.
#[derive(Clone)]
pub struct RedisBackend {
    service: Arc<RedisService>,
}

impl RedisBackend {
    /// Connect using the given configuration.
    pub async fn connect(config: RedisConfig) -> QueueResult<Self> {
        let url = config.url.clone();
        let service = RedisService::new(config).await?;
        info!(url = %url, "Redis backend ready");
        Ok(Self::from_service(Arc::new(service)))
    }

    /// Wrap an existing service, sharing its pool.
    pub fn from_service(service: Arc<RedisService>) -> Self {
        Self { service }
    }

    /// The underlying service.
    pub fn service(&self) -> &Arc<RedisService> {
        &self.service
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn push_tail(&self, key: &str, value: &str) -> QueueResult<()> {
        self.service.rpush(key, value).await?;
        Ok(())
    }

    async fn push_head(&self, key: &str, value: &str) -> QueueResult<()> {
        self.service.lpush(key, value).await?;
        Ok(())
    }

    async fn pop_head(&self, key: &str) -> QueueResult<Option<String>> {
        Ok(self.service.lpop(key).await?)
    }

    async fn list_len(&self, key: &str) -> QueueResult<u64> {
        Ok(self.service.llen(key).await?)
    }

    async fn list_all(&self, key: &str) -> QueueResult<Vec<String>> {
        Ok(self.service.lrange_all(key).await?)
    }

    async fn set_add(&self, key: &str, member: &str) -> QueueResult<()> {
        self.service.sadd(key, member).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> QueueResult<()> {
        self.service.srem(key, member).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> QueueResult<Vec<String>> {
        Ok(self.service.smembers(key).await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> QueueResult<()> {
        Ok(self.service.zadd(key, member, score).await?)
    }

    async fn zrem(&self, key: &str, member: &str) -> QueueResult<()> {
        self.service.zrem(key, member).await?;
        Ok(())
    }

    async fn zrange_by_score(&self, key: &str, max: i64) -> QueueResult<Vec<String>> {
        Ok(self.service.zrangebyscore_upto(key, max).await?)
    }

    async fn zmembers(&self, key: &str) -> QueueResult<Vec<String>> {
        Ok(self.service.zrange_all(key).await?)
    }

    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        Ok(self.service.get_value(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> QueueResult<()> {
        Ok(self.service.set_value(key, value).await?)
    }

    async fn take(&self, key: &str) -> QueueResult<Option<String>> {
        Ok(self.service.take_value(key).await?)
    }

    async fn incr(&self, key: &str) -> QueueResult<i64> {
        Ok(self.service.incr(key).await?)
    }

    async fn delete(&self, keys: &[String]) -> QueueResult<()> {
        self.service.delete(keys).await?;
        Ok(())
    }
}
