//! Store abstraction.
//!
//! The queue is written against these primitives only. Each one must be a
//! single atomic operation in the underlying store; the queue never groups
//! them into transactions.

mod memory;
mod redis;

pub use memory::MemoryBackend;
pub use redis::RedisBackend;

use crate::error::QueueResult;
use async_trait::async_trait;

/// Key/list/set/sorted-set store the queue runs on.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Append a value to the tail of a list.
    async fn push_tail(&self, key: &str, value: &str) -> QueueResult<()>;

    /// Put a value back at the head of a list.
    async fn push_head(&self, key: &str, value: &str) -> QueueResult<()>;

    /// Remove and return the head of a list.
    async fn pop_head(&self, key: &str) -> QueueResult<Option<String>>;

    /// Length of a list; missing lists are empty.
    async fn list_len(&self, key: &str) -> QueueResult<u64>;

    /// Every value of a list, head first. Read-only.
    async fn list_all(&self, key: &str) -> QueueResult<Vec<String>>;

    /// Add a member to a set.
    async fn set_add(&self, key: &str, member: &str) -> QueueResult<()>;

    /// Remove a member from a set.
    async fn set_remove(&self, key: &str, member: &str) -> QueueResult<()>;

    /// All members of a set, in no particular order.
    async fn set_members(&self, key: &str) -> QueueResult<Vec<String>>;

    /// Add a member to a sorted set, or update its score.
    async fn zadd(&self, key: &str, member: &str, score: i64) -> QueueResult<()>;

    /// Remove a member from a sorted set.
    async fn zrem(&self, key: &str, member: &str) -> QueueResult<()>;

    /// Members whose score is at most `max`.
    async fn zrange_by_score(&self, key: &str, max: i64) -> QueueResult<Vec<String>>;

    /// All members of a sorted set, lowest score first.
    async fn zmembers(&self, key: &str) -> QueueResult<Vec<String>>;

    /// Read a plain value.
    async fn get(&self, key: &str) -> QueueResult<Option<String>>;

    /// Write a plain value.
    async fn set(&self, key: &str, value: &str) -> QueueResult<()>;

    /// Read a plain value and delete its key.
    async fn take(&self, key: &str) -> QueueResult<Option<String>>;

    /// Increment a counter, returning the new value.
    async fn incr(&self, key: &str) -> QueueResult<i64>;

    /// Delete keys of any type.
    async fn delete(&self, keys: &[String]) -> QueueResult<()>;
}
