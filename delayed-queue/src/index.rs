//! Ready-lists and deferred lists.
//!
//! Key layout under the configured prefix:
//!
//! - `queues`: set of every queue name that has received a job
//! - `queues:<name>`: ready-list of a queue
//! - `timestamps`: sorted set of pending due times (unix seconds)
//! - `delayed:<secs>`: deferred list for one due time

use crate::backend::Backend;
use crate::config::QueueConfig;
use crate::error::QueueResult;
use tracing::warn;

/// Known queue names and their FIFO ready-lists.
#[derive(Debug, Clone)]
pub(crate) struct QueueIndex {
    /// Names set; each ready-list key extends it with `:<name>`.
    set_key: String,
}

impl QueueIndex {
    pub(crate) fn new(config: &QueueConfig) -> Self {
        Self {
            set_key: config.key("queues"),
        }
    }

    fn list_key(&self, queue: &str) -> String {
        format!("{}:{}", self.set_key, queue)
    }

    /// Register the queue and append a token to its tail.
    pub(crate) async fn push(
        &self,
        backend: &dyn Backend,
        queue: &str,
        token: &str,
    ) -> QueueResult<()> {
        backend.set_add(&self.set_key, queue).await?;
        backend.push_tail(&self.list_key(queue), token).await
    }

    /// Remove and return the head token of a queue.
    pub(crate) async fn pop(&self, backend: &dyn Backend, queue: &str) -> QueueResult<Option<String>> {
        backend.pop_head(&self.list_key(queue)).await
    }

    /// Put a popped token back at the head of its queue.
    pub(crate) async fn restore(
        &self,
        backend: &dyn Backend,
        queue: &str,
        token: &str,
    ) -> QueueResult<()> {
        backend.push_head(&self.list_key(queue), token).await
    }

    pub(crate) async fn len(&self, backend: &dyn Backend, queue: &str) -> QueueResult<u64> {
        backend.list_len(&self.list_key(queue)).await
    }

    pub(crate) async fn tokens(&self, backend: &dyn Backend, queue: &str) -> QueueResult<Vec<String>> {
        backend.list_all(&self.list_key(queue)).await
    }

    pub(crate) async fn names(&self, backend: &dyn Backend) -> QueueResult<Vec<String>> {
        backend.set_members(&self.set_key).await
    }

    /// Drop a queue's ready-list and forget its name.
    pub(crate) async fn remove(&self, backend: &dyn Backend, queue: &str) -> QueueResult<()> {
        backend.delete(&[self.list_key(queue)]).await?;
        backend.set_remove(&self.set_key, queue).await
    }

    pub(crate) async fn forget_all(&self, backend: &dyn Backend) -> QueueResult<()> {
        backend.delete(std::slice::from_ref(&self.set_key)).await
    }
}

/// Pending due times and the tokens deferred to each of them.
#[derive(Debug, Clone)]
pub(crate) struct DelayIndex {
    timestamps_key: String,
    list_prefix: String,
}

impl DelayIndex {
    pub(crate) fn new(config: &QueueConfig) -> Self {
        Self {
            timestamps_key: config.key("timestamps"),
            list_prefix: config.key("delayed"),
        }
    }

    fn list_key(&self, due: i64) -> String {
        format!("{}:{}", self.list_prefix, due)
    }

    fn parse(raw: Vec<String>) -> Vec<i64> {
        raw.into_iter()
            .filter_map(|member| match member.parse::<i64>() {
                Ok(due) => Some(due),
                Err(_) => {
                    warn!(member = %member, "Ignoring malformed pending timestamp");
                    None
                }
            })
            .collect()
    }

    /// Append a token to the deferred list for `due` and record the timestamp.
    pub(crate) async fn defer(&self, backend: &dyn Backend, due: i64, token: &str) -> QueueResult<()> {
        backend.push_tail(&self.list_key(due), token).await?;
        backend
            .zadd(&self.timestamps_key, &due.to_string(), due)
            .await
    }

    /// Pending timestamps at or before `now`.
    pub(crate) async fn due(&self, backend: &dyn Backend, now: i64) -> QueueResult<Vec<i64>> {
        let raw = backend.zrange_by_score(&self.timestamps_key, now).await?;
        Ok(Self::parse(raw))
    }

    pub(crate) async fn timestamps(&self, backend: &dyn Backend) -> QueueResult<Vec<i64>> {
        let raw = backend.zmembers(&self.timestamps_key).await?;
        Ok(Self::parse(raw))
    }

    pub(crate) async fn pop(&self, backend: &dyn Backend, due: i64) -> QueueResult<Option<String>> {
        backend.pop_head(&self.list_key(due)).await
    }

    /// Put a popped token back at the head of its deferred list.
    pub(crate) async fn restore(&self, backend: &dyn Backend, due: i64, token: &str) -> QueueResult<()> {
        backend.push_head(&self.list_key(due), token).await?;
        backend
            .zadd(&self.timestamps_key, &due.to_string(), due)
            .await
    }

    pub(crate) async fn tokens(&self, backend: &dyn Backend, due: i64) -> QueueResult<Vec<String>> {
        backend.list_all(&self.list_key(due)).await
    }

    /// Remove a drained timestamp.
    ///
    /// A concurrent `defer` may have appended after the drain. If the list is
    /// non-empty again the timestamp is put back, so it is never lost.
    pub(crate) async fn retire(&self, backend: &dyn Backend, due: i64) -> QueueResult<()> {
        let member = due.to_string();
        backend.zrem(&self.timestamps_key, &member).await?;
        if backend.list_len(&self.list_key(due)).await? > 0 {
            backend.zadd(&self.timestamps_key, &member, due).await?;
        }
        Ok(())
    }

    pub(crate) async fn remove(&self, backend: &dyn Backend, due: i64) -> QueueResult<()> {
        backend.delete(&[self.list_key(due)]).await?;
        backend.zrem(&self.timestamps_key, &due.to_string()).await
    }

    pub(crate) async fn forget_all(&self, backend: &dyn Backend) -> QueueResult<()> {
        backend.delete(std::slice::from_ref(&self.timestamps_key)).await
    }
}
