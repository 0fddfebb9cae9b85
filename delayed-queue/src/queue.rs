//! Placement, promotion and reservation.

use crate::backend::{Backend, MemoryBackend, RedisBackend};
use crate::clock::{Clock, SystemClock};
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::index::{DelayIndex, QueueIndex};
use crate::job::{Job, JobData, JobId};
use crate::storage::JobStorage;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Delayed job queue.
///
/// Cheap to clone; clones share the backend. All coordination between
/// workers happens through the backend's atomic primitives, never through
/// in-process state.
#[derive(Clone)]
pub struct JobQueue {
    backend: Arc<dyn Backend>,
    storage: Arc<dyn JobStorage>,
    clock: Arc<dyn Clock>,
    queues: QueueIndex,
    delayed: DelayIndex,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a queue over any backend.
    pub fn new(backend: Arc<dyn Backend>, config: QueueConfig) -> Self {
        debug!(
            "Queue config - prefix: {}, default queue: {}, storage: {:?}",
            config.key_prefix, config.default_queue, config.storage
        );
        Self {
            backend,
            storage: config.storage.build(&config.key_prefix),
            clock: Arc::new(SystemClock),
            queues: QueueIndex::new(&config),
            delayed: DelayIndex::new(&config),
            config,
        }
    }

    /// Create a queue backed by a fresh in-memory store.
    pub fn in_memory(config: QueueConfig) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), config)
    }

    /// Connect to Redis and create a queue.
    pub async fn connect(config: QueueConfig) -> QueueResult<Self> {
        info!("Initializing job queue under prefix '{}'", config.key_prefix);
        let backend = RedisBackend::connect(config.redis.clone()).await?;
        Ok(Self::new(Arc::new(backend), config))
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The queue's configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Current time as seen by this queue.
    pub fn db_time_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Create and place a job on the default queue.
    pub async fn enqueue(&self, job_type: impl Into<String>, data: JobData) -> QueueResult<JobId> {
        self.enqueue_job(Job::for_default_queue(job_type, data)).await
    }

    /// Place a job built by the caller.
    pub async fn enqueue_job(&self, mut job: Job) -> QueueResult<JobId> {
        self.place(&mut job).await
    }

    /// Route a job to a ready-list or, if its `run_at` is in the future, to
    /// the deferred list for that second.
    ///
    /// Fills in the default queue and the job's id. Placing the same record
    /// twice is rejected.
    pub async fn place(&self, job: &mut Job) -> QueueResult<JobId> {
        if job.placed() {
            return Err(QueueError::AlreadyPlaced(job.id.clone()));
        }
        if job.queue.is_empty() {
            job.queue = self.config.default_queue.clone();
        }

        let backend = self.backend.as_ref();
        self.storage.assign_id(backend, job).await?;
        let token = self.storage.store(backend, job).await?;

        let now = self.clock.now();
        match job.run_at {
            Some(run_at) if run_at > now => {
                let due = run_at.timestamp();
                self.delayed.defer(backend, due, &token).await?;
                debug!(job_id = %job.id, queue = %job.queue, due, "Deferred job");
            }
            _ => {
                self.queues.push(backend, &job.queue, &token).await?;
                debug!(job_id = %job.id, queue = %job.queue, "Queued job");
            }
        }

        job.mark_placed();
        Ok(job.id.clone())
    }

    /// Move every job whose due second is at or before `now` onto its
    /// queue's ready-list. Returns how many jobs moved.
    ///
    /// Safe to run redundantly and concurrently: each deferred token is
    /// popped atomically, so it is promoted exactly once. On a store failure
    /// the token in hand goes back to the head of its deferred list and the
    /// error is returned.
    pub async fn promote_due(&self, now: DateTime<Utc>) -> QueueResult<usize> {
        let backend = self.backend.as_ref();
        let mut promoted = 0;

        for due in self.delayed.due(backend, now.timestamp()).await? {
            while let Some(token) = self.delayed.pop(backend, due).await? {
                match self.storage.load(backend, &token).await {
                    Ok(Some(job)) => {
                        if let Err(e) = self.queues.push(backend, &job.queue, &token).await {
                            return Err(self.return_deferred(due, &token, e).await);
                        }
                        promoted += 1;
                    }
                    Ok(None) => {
                        warn!(token = %token, due, "Dropping deferred job with no stored record");
                    }
                    Err(QueueError::Deserialization(e)) => {
                        warn!(error = %e, due, "Dropping unreadable deferred job");
                    }
                    Err(e) => return Err(self.return_deferred(due, &token, e).await),
                }
            }
            self.delayed.retire(backend, due).await?;
        }

        if promoted > 0 {
            debug!(promoted, "Promoted due jobs");
        }
        Ok(promoted)
    }

    async fn return_deferred(&self, due: i64, token: &str, cause: QueueError) -> QueueError {
        if let Err(e) = self.delayed.restore(self.backend.as_ref(), due, token).await {
            error!(error = %e, due, "Failed to return deferred job after store error");
        }
        cause
    }

    /// Promote due jobs, then pop the head of the first non-empty queue.
    ///
    /// An empty `preferred` list means every known queue, in whatever order
    /// the store enumerates them. Returns `None` when nothing is ready.
    pub async fn reserve<S: AsRef<str>>(&self, preferred: &[S]) -> QueueResult<Option<Job>> {
        self.promote_due(self.clock.now()).await?;

        let candidates: Vec<String> = if preferred.is_empty() {
            self.queues.names(self.backend.as_ref()).await?
        } else {
            preferred.iter().map(|q| q.as_ref().to_string()).collect()
        };

        for queue in &candidates {
            if let Some(job) = self.pop(queue).await? {
                debug!(job_id = %job.id, queue = %queue, "Reserved job");
                return Ok(Some(job));
            }
        }

        Ok(None)
    }

    async fn pop(&self, queue: &str) -> QueueResult<Option<Job>> {
        let backend = self.backend.as_ref();
        while let Some(token) = self.queues.pop(backend, queue).await? {
            match self.storage.take(backend, &token).await {
                Ok(Some(job)) => return Ok(Some(job)),
                Ok(None) => warn!(token = %token, queue, "Skipping queued job with no stored record"),
                Err(QueueError::Deserialization(e)) => {
                    warn!(error = %e, queue, "Skipping unreadable queued job")
                }
                Err(e) => {
                    if let Err(restore) = self.queues.restore(backend, queue, &token).await {
                        error!(error = %restore, queue, "Failed to return queued job after store error");
                    }
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    /// Record the lock for the harness. Always succeeds; locks are never
    /// checked because a reserved job has already left every list.
    pub fn lock_exclusively(&self, job: &mut Job, worker_name: &str) -> bool {
        job.locked_at = Some(self.clock.now());
        job.locked_by = Some(worker_name.to_string());
        true
    }

    /// Completion callback. The job already left the store when reserved.
    pub async fn destroy(&self, job: &Job) -> QueueResult<()> {
        debug!(job_id = %job.id, "Destroyed job");
        Ok(())
    }

    /// Permanent failure callback, same as [`destroy`](Self::destroy).
    pub async fn fail(&self, job: &Job) -> QueueResult<()> {
        self.destroy(job).await
    }

    /// No locks are ever persisted, so there is nothing to clear.
    pub async fn clear_locks(&self, worker_name: &str) -> QueueResult<()> {
        debug!(worker = %worker_name, "No locks to clear");
        Ok(())
    }

    /// Names of every queue that has received a job.
    pub async fn queues(&self) -> QueueResult<Vec<String>> {
        self.queues.names(self.backend.as_ref()).await
    }

    /// Jobs waiting in ready-lists.
    ///
    /// Jobs still deferred are not counted.
    pub async fn count(&self) -> QueueResult<u64> {
        let backend = self.backend.as_ref();
        let mut total = 0;
        for queue in self.queues.names(backend).await? {
            total += self.queues.len(backend, &queue).await?;
        }
        Ok(total)
    }

    /// Jobs still waiting for their due time.
    pub async fn delayed_count(&self) -> QueueResult<u64> {
        let backend = self.backend.as_ref();
        let mut total = 0;
        for due in self.delayed.timestamps(backend).await? {
            total += self.delayed.tokens(backend, due).await?.len() as u64;
        }
        Ok(total)
    }

    /// Remove every ready-list, deferred list, queue name and pending
    /// timestamp, along with any records they reference.
    pub async fn delete_all(&self) -> QueueResult<()> {
        let backend = self.backend.as_ref();

        for queue in self.queues.names(backend).await? {
            let tokens = self.queues.tokens(backend, &queue).await?;
            self.storage.purge(backend, &tokens).await?;
            self.queues.remove(backend, &queue).await?;
        }

        for due in self.delayed.timestamps(backend).await? {
            let tokens = self.delayed.tokens(backend, due).await?;
            self.storage.purge(backend, &tokens).await?;
            self.delayed.remove(backend, due).await?;
        }

        self.queues.forget_all(backend).await?;
        self.delayed.forget_all(backend).await?;

        info!("Cleared all queues under prefix '{}'", self.config.key_prefix);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::StorageStrategy;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use delayed_queue_redis::RedisError;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory backend whose next record read times out when armed.
    #[derive(Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        fail_next_read: AtomicBool,
    }

    impl FlakyBackend {
        fn arm(&self) {
            self.fail_next_read.store(true, Ordering::SeqCst);
        }

        fn check(&self) -> QueueResult<()> {
            if self.fail_next_read.swap(false, Ordering::SeqCst) {
                return Err(RedisError::Timeout.into());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Backend for FlakyBackend {
        async fn push_tail(&self, key: &str, value: &str) -> QueueResult<()> {
            self.inner.push_tail(key, value).await
        }
        async fn push_head(&self, key: &str, value: &str) -> QueueResult<()> {
            self.inner.push_head(key, value).await
        }
        async fn pop_head(&self, key: &str) -> QueueResult<Option<String>> {
            self.inner.pop_head(key).await
        }
        async fn list_len(&self, key: &str) -> QueueResult<u64> {
            self.inner.list_len(key).await
        }
        async fn list_all(&self, key: &str) -> QueueResult<Vec<String>> {
            self.inner.list_all(key).await
        }
        async fn set_add(&self, key: &str, member: &str) -> QueueResult<()> {
            self.inner.set_add(key, member).await
        }
        async fn set_remove(&self, key: &str, member: &str) -> QueueResult<()> {
            self.inner.set_remove(key, member).await
        }
        async fn set_members(&self, key: &str) -> QueueResult<Vec<String>> {
            self.inner.set_members(key).await
        }
        async fn zadd(&self, key: &str, member: &str, score: i64) -> QueueResult<()> {
            self.inner.zadd(key, member, score).await
        }
        async fn zrem(&self, key: &str, member: &str) -> QueueResult<()> {
            self.inner.zrem(key, member).await
        }
        async fn zrange_by_score(&self, key: &str, max: i64) -> QueueResult<Vec<String>> {
            self.inner.zrange_by_score(key, max).await
        }
        async fn zmembers(&self, key: &str) -> QueueResult<Vec<String>> {
            self.inner.zmembers(key).await
        }
        async fn get(&self, key: &str) -> QueueResult<Option<String>> {
            self.check()?;
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> QueueResult<()> {
            self.inner.set(key, value).await
        }
        async fn take(&self, key: &str) -> QueueResult<Option<String>> {
            self.check()?;
            self.inner.take(key).await
        }
        async fn incr(&self, key: &str) -> QueueResult<i64> {
            self.inner.incr(key).await
        }
        async fn delete(&self, keys: &[String]) -> QueueResult<()> {
            self.inner.delete(keys).await
        }
    }

    fn flaky_keyed_queue() -> (JobQueue, Arc<ManualClock>, Arc<FlakyBackend>) {
        let clock = Arc::new(ManualClock::new(start()));
        let backend = Arc::new(FlakyBackend::default());
        let config = QueueConfig::default().with_storage(StorageStrategy::Keyed);
        let queue = JobQueue::new(backend.clone(), config).with_clock(clock.clone());
        (queue, clock, backend)
    }

    fn start() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn queue_with_clock(storage: StorageStrategy) -> (JobQueue, Arc<ManualClock>, MemoryBackend) {
        let clock = Arc::new(ManualClock::new(start()));
        let backend = MemoryBackend::new();
        let config = QueueConfig::default().with_storage(storage);
        let queue = JobQueue::new(Arc::new(backend.clone()), config).with_clock(clock.clone());
        (queue, clock, backend)
    }

    fn job(queue: &str, n: u32) -> Job {
        Job::new(queue, "task", serde_json::json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_place_defaults_queue() {
        let (queue, _, _) = queue_with_clock(StorageStrategy::Inline);
        let mut job = Job::for_default_queue("task", serde_json::json!({}));
        queue.place(&mut job).await.unwrap();

        assert_eq!(job.queue, "default");
        assert_eq!(queue.queues().await.unwrap(), vec!["default"]);
    }

    #[tokio::test]
    async fn test_double_place_is_rejected() {
        let (queue, _, _) = queue_with_clock(StorageStrategy::Inline);
        let mut job = job("default", 1);
        queue.place(&mut job).await.unwrap();

        let err = queue.place(&mut job).await.unwrap_err();
        assert!(matches!(err, QueueError::AlreadyPlaced(id) if id == job.id));
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_future_job_goes_to_delay_index() {
        let (queue, _, backend) = queue_with_clock(StorageStrategy::Inline);
        let mut job = job("default", 1).schedule_at(start() + Duration::seconds(90));
        queue.place(&mut job).await.unwrap();

        let due = (start() + Duration::seconds(90)).timestamp();
        assert_eq!(
            backend.zmembers("delayed_job:timestamps").await.unwrap(),
            vec![due.to_string()]
        );
        assert_eq!(queue.count().await.unwrap(), 0);
        assert_eq!(queue.delayed_count().await.unwrap(), 1);
        assert!(queue.queues().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_at_equal_to_now_is_immediate() {
        let (queue, _, _) = queue_with_clock(StorageStrategy::Inline);
        let mut job = job("default", 1).schedule_at(start());
        queue.place(&mut job).await.unwrap();
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sub_second_run_at_is_truncated() {
        let (queue, clock, _) = queue_with_clock(StorageStrategy::Inline);
        let run_at = start() + Duration::milliseconds(1_500);
        let mut job = job("default", 1).schedule_at(run_at);
        queue.place(&mut job).await.unwrap();

        clock.advance(Duration::seconds(1));
        let reserved = queue.reserve::<&str>(&[]).await.unwrap().unwrap();
        assert_eq!(reserved.id, job.id);
    }

    #[tokio::test]
    async fn test_promote_due_moves_jobs_to_their_queues() {
        let (queue, _, _) = queue_with_clock(StorageStrategy::Inline);
        let later = start() + Duration::seconds(10);
        queue.enqueue_job(job("a", 1).schedule_at(later)).await.unwrap();
        queue.enqueue_job(job("b", 2).schedule_at(later)).await.unwrap();

        assert_eq!(queue.promote_due(start()).await.unwrap(), 0);
        assert_eq!(queue.promote_due(later).await.unwrap(), 2);

        let mut names = queue.queues().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(queue.count().await.unwrap(), 2);
        assert_eq!(queue.delayed_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_promotion_keeps_fifo_within_timestamp() {
        let (queue, clock, _) = queue_with_clock(StorageStrategy::Inline);
        let later = start() + Duration::seconds(5);
        let first = queue.enqueue_job(job("q", 1).schedule_at(later)).await.unwrap();
        let second = queue.enqueue_job(job("q", 2).schedule_at(later)).await.unwrap();

        clock.set(later);
        assert_eq!(queue.reserve(&["q"]).await.unwrap().unwrap().id, first);
        assert_eq!(queue.reserve(&["q"]).await.unwrap().unwrap().id, second);
    }

    #[tokio::test]
    async fn test_promote_with_nothing_due_is_noop() {
        let (queue, _, backend) = queue_with_clock(StorageStrategy::Inline);
        queue
            .enqueue_job(job("q", 1).schedule_at(start() + Duration::hours(1)))
            .await
            .unwrap();

        let before = backend.zmembers("delayed_job:timestamps").await.unwrap();
        for _ in 0..3 {
            assert_eq!(queue.promote_due(start()).await.unwrap(), 0);
            assert!(queue.reserve::<&str>(&[]).await.unwrap().is_none());
        }
        assert_eq!(backend.zmembers("delayed_job:timestamps").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_reserve_prefers_queue_order() {
        let (queue, _, _) = queue_with_clock(StorageStrategy::Inline);
        let a1 = queue.enqueue_job(job("high", 1)).await.unwrap();
        let b1 = queue.enqueue_job(job("low", 2)).await.unwrap();

        assert_eq!(queue.reserve(&["low", "high"]).await.unwrap().unwrap().id, b1);
        assert_eq!(queue.reserve(&["low", "high"]).await.unwrap().unwrap().id, a1);
        assert!(queue.reserve(&["low", "high"]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reserve_ignores_unlisted_queues() {
        let (queue, _, _) = queue_with_clock(StorageStrategy::Inline);
        queue.enqueue_job(job("other", 1)).await.unwrap();
        assert!(queue.reserve(&["mine"]).await.unwrap().is_none());
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lock_exclusively_always_succeeds() {
        let (queue, _, _) = queue_with_clock(StorageStrategy::Inline);
        let mut job = job("q", 1);
        assert!(queue.lock_exclusively(&mut job, "worker-1"));
        assert!(queue.lock_exclusively(&mut job, "worker-2"));
        assert_eq!(job.locked_by.as_deref(), Some("worker-2"));
        assert_eq!(job.locked_at, Some(start()));
    }

    #[tokio::test]
    async fn test_keyed_storage_roundtrip() {
        let (queue, clock, backend) = queue_with_clock(StorageStrategy::Keyed);
        let id = queue.enqueue_job(job("q", 1)).await.unwrap();
        let later = queue
            .enqueue_job(job("q", 2).schedule_at(start() + Duration::seconds(30)))
            .await
            .unwrap();
        assert_eq!(id, "Job:1");
        assert_eq!(later, "Job:2");

        assert_eq!(queue.reserve(&["q"]).await.unwrap().unwrap().id, id);
        assert!(backend.get("delayed_job:jobs:Job:1").await.unwrap().is_none());

        clock.advance(Duration::seconds(30));
        let reserved = queue.reserve(&["q"]).await.unwrap().unwrap();
        assert_eq!(reserved.id, later);
        assert_eq!(reserved.handler, serde_json::json!({ "n": 2 }));
    }

    #[tokio::test]
    async fn test_missing_keyed_record_is_skipped() {
        let (queue, _, backend) = queue_with_clock(StorageStrategy::Keyed);
        let lost = queue.enqueue_job(job("q", 1)).await.unwrap();
        let kept = queue.enqueue_job(job("q", 2)).await.unwrap();
        backend
            .delete(&[format!("delayed_job:jobs:{}", lost)])
            .await
            .unwrap();

        assert_eq!(queue.reserve(&["q"]).await.unwrap().unwrap().id, kept);
    }

    #[tokio::test]
    async fn test_corrupt_keyed_record_is_skipped() {
        let (queue, _, backend) = queue_with_clock(StorageStrategy::Keyed);
        let bad = queue.enqueue_job(job("q", 1)).await.unwrap();
        let good = queue.enqueue_job(job("q", 2)).await.unwrap();
        backend
            .set(&format!("delayed_job:jobs:{}", bad), "not json")
            .await
            .unwrap();

        assert_eq!(queue.reserve(&["q"]).await.unwrap().unwrap().id, good);
    }

    #[tokio::test]
    async fn test_store_error_during_promotion_keeps_job() {
        let (queue, clock, backend) = flaky_keyed_queue();
        let id = queue
            .enqueue_job(job("q", 1).schedule_at(start() + Duration::seconds(5)))
            .await
            .unwrap();
        clock.advance(Duration::seconds(5));

        backend.arm();
        let err = queue.reserve(&["q"]).await.unwrap_err();
        assert!(matches!(err, QueueError::Redis(RedisError::Timeout)));
        assert_eq!(queue.delayed_count().await.unwrap(), 1);

        assert_eq!(queue.reserve(&["q"]).await.unwrap().unwrap().id, id);
        assert_eq!(queue.delayed_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_error_during_reservation_keeps_order() {
        let (queue, _, backend) = flaky_keyed_queue();
        let first = queue.enqueue_job(job("q", 1)).await.unwrap();
        let second = queue.enqueue_job(job("q", 2)).await.unwrap();

        backend.arm();
        let err = queue.reserve(&["q"]).await.unwrap_err();
        assert!(matches!(err, QueueError::Redis(RedisError::Timeout)));
        assert_eq!(queue.count().await.unwrap(), 2);

        assert_eq!(queue.reserve(&["q"]).await.unwrap().unwrap().id, first);
        assert_eq!(queue.reserve(&["q"]).await.unwrap().unwrap().id, second);
    }

    #[tokio::test]
    async fn test_delete_all_purges_keyed_records() {
        let (queue, _, backend) = queue_with_clock(StorageStrategy::Keyed);
        queue.enqueue_job(job("q", 1)).await.unwrap();
        queue
            .enqueue_job(job("q", 2).schedule_at(start() + Duration::days(1)))
            .await
            .unwrap();

        queue.delete_all().await.unwrap();

        assert!(queue.queues().await.unwrap().is_empty());
        assert_eq!(queue.delayed_count().await.unwrap(), 0);
        // Only the id counter survives.
        assert_eq!(backend.key_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_reservers_never_share_a_job() {
        let (queue, clock, _) = queue_with_clock(StorageStrategy::Inline);
        let later = start() + Duration::seconds(1);
        for n in 0..50 {
            queue.enqueue_job(job("q", n)).await.unwrap();
            queue.enqueue_job(job("q", n + 100).schedule_at(later)).await.unwrap();
        }
        clock.set(later);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(job) = queue.reserve(&["q"]).await.unwrap() {
                    ids.push(job.id);
                }
                ids
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 100);
        assert_eq!(all.len(), 100);
    }
}
