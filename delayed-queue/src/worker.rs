//! Worker harness that reserves and performs jobs.

use crate::error::{QueueError, QueueResult};
use crate::job::Job;
use crate::queue::JobQueue;
use parking_lot::RwLock as HandlerLock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Job handler function type.
pub type JobHandler =
    Arc<dyn Fn(Job) -> Pin<Box<dyn Future<Output = QueueResult<()>> + Send>> + Send + Sync>;

type HandlerMap = Arc<HandlerLock<HashMap<String, JobHandler>>>;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name recorded in `locked_by`
    pub name: String,

    /// Queues to take work from, in preference order; empty means all
    pub queues: Vec<String>,

    /// Number of concurrent jobs to process
    pub concurrency: usize,

    /// Sleep between polls when no job is ready
    pub poll_interval: Duration,

    /// Timeout for job execution
    pub job_timeout: Duration,

    /// Attempts before a job is given up on
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: format!("host:{} pid:{}", hostname(), std::process::id()),
            queues: Vec::new(),
            concurrency: 1,
            poll_interval: Duration::from_secs(5),
            job_timeout: Duration::from_secs(4 * 3600),
            max_attempts: 25,
        }
    }
}

impl WorkerConfig {
    /// Set the worker name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the preferred queues.
    pub fn with_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }

    /// Set the concurrency.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the job timeout.
    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    /// Set the attempt limit.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

/// Outcome of one performed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed,
}

/// Worker for processing jobs from a queue.
pub struct Worker {
    queue: JobQueue,
    handlers: HandlerMap,
    config: WorkerConfig,
    running: Arc<RwLock<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl Worker {
    /// Create a new worker.
    pub fn new(queue: JobQueue) -> Self {
        Self::with_config(queue, WorkerConfig::default())
    }

    /// Create a worker with custom configuration.
    pub fn with_config(queue: JobQueue, config: WorkerConfig) -> Self {
        Self {
            queue,
            handlers: Arc::new(HandlerLock::new(HashMap::new())),
            config,
            running: Arc::new(RwLock::new(false)),
            handles: Vec::new(),
        }
    }

    /// The worker's configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Register a job handler.
    ///
    /// # Examples
    ///
    /// ```
    /// use delayed_queue::*;
    ///
    /// let queue = JobQueue::in_memory(QueueConfig::default());
    /// let mut worker = Worker::new(queue);
    ///
    /// worker.register_handler("send_email", |job| async move {
    ///     println!("Sending email: {:?}", job.handler);
    ///     Ok(())
    /// });
    /// ```
    pub fn register_handler<F, Fut>(&mut self, job_type: impl Into<String>, handler: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueueResult<()>> + Send + 'static,
    {
        let wrapped_handler: JobHandler = Arc::new(
            move |job: Job| -> Pin<Box<dyn Future<Output = QueueResult<()>> + Send>> {
                Box::pin(handler(job))
            },
        );

        self.handlers.write().insert(job_type.into(), wrapped_handler);
    }

    /// Reserve and perform up to `limit` jobs, stopping early when no job is
    /// ready. Returns `(succeeded, failed)`.
    pub async fn work_off(&self, limit: usize) -> QueueResult<(usize, usize)> {
        let mut succeeded = 0;
        let mut failed = 0;

        for _ in 0..limit {
            let Some(job) = self.queue.reserve(self.config.queues.as_slice()).await? else {
                break;
            };
            match perform(&self.queue, &self.handlers, &self.config, job).await? {
                Outcome::Succeeded => succeeded += 1,
                Outcome::Failed => failed += 1,
            }
        }

        Ok((succeeded, failed))
    }

    /// Start the worker.
    ///
    /// The worker is only marked running once every startup step succeeded.
    pub async fn start(&mut self) -> QueueResult<()> {
        let mut running = self.running.write().await;
        if *running {
            return Err(QueueError::WorkerAlreadyRunning);
        }
        if self.config.concurrency == 0 {
            return Err(QueueError::Config(
                "worker concurrency must be at least 1".to_string(),
            ));
        }

        self.queue.clear_locks(&self.config.name).await?;
        *running = true;
        drop(running);

        info!(
            worker = %self.config.name,
            concurrency = self.config.concurrency,
            queues = ?self.config.queues,
            "Starting worker"
        );

        for i in 0..self.config.concurrency {
            let queue = self.queue.clone();
            let handlers = self.handlers.clone();
            let running = self.running.clone();
            let config = self.config.clone();

            let handle = tokio::spawn(async move {
                while *running.read().await {
                    match queue.reserve(config.queues.as_slice()).await {
                        Ok(Some(job)) => {
                            if let Err(e) = perform(&queue, &handlers, &config, job).await {
                                error!(slot = i, error = %e, "Failed to record job outcome");
                            }
                        }
                        Ok(None) => {
                            tokio::time::sleep(config.poll_interval).await;
                        }
                        Err(e) => {
                            error!(slot = i, error = %e, "Error reserving job");
                            tokio::time::sleep(config.poll_interval).await;
                        }
                    }
                }

                debug!(slot = i, "Worker slot stopped");
            });

            self.handles.push(handle);
        }

        Ok(())
    }

    /// Stop the worker, letting in-flight jobs finish.
    pub async fn stop(&mut self) -> QueueResult<()> {
        let mut running = self.running.write().await;
        if !*running {
            return Err(QueueError::WorkerNotRunning);
        }
        *running = false;
        drop(running);

        info!(worker = %self.config.name, "Stopping worker");

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker slot ended abnormally");
            }
        }

        info!(worker = %self.config.name, "Worker stopped");
        Ok(())
    }

    /// Check if the worker is running.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

async fn perform(
    queue: &JobQueue,
    handlers: &HandlerMap,
    config: &WorkerConfig,
    mut job: Job,
) -> QueueResult<Outcome> {
    queue.lock_exclusively(&mut job, &config.name);

    let handler = handlers.read().get(&job.job_type).cloned();
    let Some(handler) = handler else {
        let reason = QueueError::NoHandler(job.job_type.clone()).to_string();
        return reschedule_or_fail(queue, config, job, reason).await;
    };

    debug!(job_id = %job.id, job_type = %job.job_type, "Performing job");

    match tokio::time::timeout(config.job_timeout, handler(job.clone())).await {
        Ok(Ok(())) => {
            queue.destroy(&job).await?;
            info!(job_id = %job.id, job_type = %job.job_type, "Job completed");
            Ok(Outcome::Succeeded)
        }
        Ok(Err(e)) => reschedule_or_fail(queue, config, job, e.to_string()).await,
        Err(_) => reschedule_or_fail(queue, config, job, QueueError::Timeout.to_string()).await,
    }
}

async fn reschedule_or_fail(
    queue: &JobQueue,
    config: &WorkerConfig,
    mut job: Job,
    reason: String,
) -> QueueResult<Outcome> {
    let now = queue.db_time_now();

    if job.attempts.saturating_add(1) < config.max_attempts {
        let retry = job.retry_after_failure(reason.clone(), now);
        warn!(
            job_id = %job.id,
            attempt = retry.attempts,
            run_at = ?retry.run_at,
            error = %reason,
            "Job failed, rescheduling"
        );
        queue.enqueue_job(retry).await?;
    } else {
        job.attempts = job.attempts.saturating_add(1);
        job.mark_failed(reason.clone(), now);
        error!(
            job_id = %job.id,
            attempts = job.attempts,
            error = %reason,
            "Job failed permanently"
        );
        queue.fail(&job).await?;
    }

    Ok(Outcome::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::QueueConfig;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn queue() -> (JobQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let queue = JobQueue::in_memory(QueueConfig::default()).with_clock(clock.clone());
        (queue, clock)
    }

    #[test]
    fn test_worker_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_attempts, 25);
        assert!(config.queues.is_empty());
        assert!(config.name.contains("pid:"));
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_name("w1")
            .with_queues(["high", "low"])
            .with_concurrency(0)
            .with_max_attempts(3);

        assert_eq!(config.name, "w1");
        assert_eq!(config.queues, vec!["high", "low"]);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_attempts, 3);
    }

    #[tokio::test]
    async fn test_work_off_runs_handlers() {
        let (queue, _) = queue();
        let seen = Arc::new(AtomicU32::new(0));

        let mut worker = Worker::new(queue.clone());
        let counter = seen.clone();
        worker.register_handler("count", move |job| {
            let counter = counter.clone();
            async move {
                let n = job.handler["n"].as_u64().unwrap_or(0) as u32;
                counter.fetch_add(n, Ordering::SeqCst);
                Ok(())
            }
        });

        queue.enqueue("count", serde_json::json!({"n": 2})).await.unwrap();
        queue.enqueue("count", serde_json::json!({"n": 3})).await.unwrap();

        assert_eq!(worker.work_off(10).await.unwrap(), (2, 0));
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_job_is_rescheduled_with_backoff() {
        let (queue, clock) = queue();
        let mut worker = Worker::new(queue.clone());
        worker.register_handler("flaky", |_job| async {
            Err(QueueError::ExecutionFailed("nope".to_string()))
        });

        queue.enqueue("flaky", serde_json::json!({})).await.unwrap();
        assert_eq!(worker.work_off(1).await.unwrap(), (0, 1));

        assert_eq!(queue.count().await.unwrap(), 0);
        assert_eq!(queue.delayed_count().await.unwrap(), 1);

        clock.advance(chrono::Duration::seconds(1));
        let retried = queue.reserve::<&str>(&[]).await.unwrap().unwrap();
        assert_eq!(retried.attempts, 1);
        assert!(retried.last_error.unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_job_dropped_after_max_attempts() {
        let (queue, _) = queue();
        let config = WorkerConfig::default().with_max_attempts(1);
        let mut worker = Worker::with_config(queue.clone(), config);
        worker.register_handler("broken", |_job| async {
            Err(QueueError::ExecutionFailed("always".to_string()))
        });

        queue.enqueue("broken", serde_json::json!({})).await.unwrap();
        assert_eq!(worker.work_off(5).await.unwrap(), (0, 1));
        assert_eq!(queue.count().await.unwrap(), 0);
        assert_eq!(queue.delayed_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_handler_counts_as_failure() {
        let (queue, _) = queue();
        let worker = Worker::new(queue.clone());
        queue.enqueue("unknown", serde_json::json!({})).await.unwrap();

        assert_eq!(worker.work_off(1).await.unwrap(), (0, 1));
        assert_eq!(queue.delayed_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_attempt_counter_does_not_overflow() {
        let (queue, _) = queue();
        let worker = Worker::new(queue.clone());
        let mut job = Job::for_default_queue("unknown", serde_json::json!({}));
        job.attempts = u32::MAX;
        queue.enqueue_job(job).await.unwrap();

        assert_eq!(worker.work_off(1).await.unwrap(), (0, 1));
        assert_eq!(queue.delayed_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_worker_only_takes_its_queues() {
        let (queue, _) = queue();
        let config = WorkerConfig::default().with_queues(["mine"]);
        let mut worker = Worker::with_config(queue.clone(), config);
        worker.register_handler("task", |_job| async { Ok(()) });

        queue
            .enqueue_job(Job::new("theirs", "task", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(worker.work_off(1).await.unwrap(), (0, 0));
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (queue, _) = queue();
        let config = WorkerConfig::default()
            .with_concurrency(2)
            .with_poll_interval(Duration::from_millis(10));
        let mut worker = Worker::with_config(queue.clone(), config);
        let done = Arc::new(AtomicU32::new(0));
        let counter = done.clone();
        worker.register_handler("task", move |_job| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        for _ in 0..3 {
            queue.enqueue("task", serde_json::json!({})).await.unwrap();
        }

        worker.start().await.unwrap();
        assert!(worker.is_running().await);
        assert!(matches!(
            worker.start().await,
            Err(QueueError::WorkerAlreadyRunning)
        ));

        for _ in 0..100 {
            if done.load(Ordering::SeqCst) == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        worker.stop().await.unwrap();
        assert!(!worker.is_running().await);
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert!(matches!(worker.stop().await, Err(QueueError::WorkerNotRunning)));
    }

    #[tokio::test]
    async fn test_failed_start_leaves_worker_stopped() {
        let (queue, _) = queue();
        let mut config = WorkerConfig::default().with_poll_interval(Duration::from_millis(10));
        config.concurrency = 0;
        let mut worker = Worker::with_config(queue, config);

        assert!(matches!(worker.start().await, Err(QueueError::Config(_))));
        assert!(!worker.is_running().await);
        assert!(matches!(worker.stop().await, Err(QueueError::WorkerNotRunning)));
        assert!(matches!(worker.start().await, Err(QueueError::Config(_))));
    }
}
