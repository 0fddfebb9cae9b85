//! Delayed job queue.
//!
//! Jobs are routed either to a per-queue FIFO ready-list or, when their
//! `run_at` lies in the future, to a deferred list keyed by the due second.
//! Every reservation first promotes due deferred jobs, then pops the head of
//! the first non-empty queue. Workers coordinate only through the store's
//! atomic list pops, so a job is handed to exactly one reserver.
//!
//! ## Quick Start
//!
//! ```
//! use delayed_queue::{JobQueue, QueueConfig};
//! use serde_json::json;
//!
//! # tokio_test_block_on(async {
//! let queue = JobQueue::in_memory(QueueConfig::default());
//!
//! queue.enqueue("send_welcome", json!({"to": "user@example.com"})).await?;
//! assert_eq!(queue.count().await?, 1);
//!
//! let job = queue.reserve::<&str>(&[]).await?.expect("ready job");
//! assert_eq!(job.job_type, "send_welcome");
//! assert_eq!(job.queue, "default");
//! # Ok::<(), delayed_queue::QueueError>(())
//! # }).unwrap();
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```
//!
//! ## Delayed Jobs
//!
//! ```
//! use delayed_queue::Job;
//! use serde_json::json;
//! use chrono::Duration;
//!
//! let reminder = Job::new("emails", "reminder", json!({"message": "Don't forget!"}))
//!     .schedule_after(Duration::hours(1));
//!
//! assert!(reminder.run_at.is_some());
//! ```
//!
//! ## Configuration
//!
//! ```
//! use delayed_queue::{QueueConfig, StorageStrategy};
//!
//! let config = QueueConfig::from_server("localhost:6380/myapp").unwrap()
//!     .with_default_queue("mail")
//!     .with_storage(StorageStrategy::Keyed);
//!
//! assert_eq!(config.key_prefix, "myapp");
//! assert_eq!(config.default_queue, "mail");
//! ```
//!
//! ## Workers
//!
//! ```no_run
//! use delayed_queue::*;
//!
//! # async fn example() -> QueueResult<()> {
//! let queue = JobQueue::connect(QueueConfig::from_env()).await?;
//! let mut worker = Worker::with_config(
//!     queue,
//!     WorkerConfig::default().with_queues(["mail", "default"]),
//! );
//!
//! worker.register_handler("send_welcome", |job| async move {
//!     println!("sending {}", job.handler);
//!     Ok(())
//! });
//!
//! worker.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
mod index;
pub mod job;
pub mod queue;
pub mod storage;
pub mod telemetry;
pub mod worker;

pub use backend::{Backend, MemoryBackend, RedisBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DEFAULT_KEY_PREFIX, DEFAULT_QUEUE, QueueConfig};
pub use error::{QueueError, QueueResult};
pub use job::{Job, JobData, JobId};
pub use queue::JobQueue;
pub use storage::{InlineStorage, JobStorage, KeyedStorage, StorageStrategy};
pub use worker::{JobHandler, Worker, WorkerConfig};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::QueueConfig;
    pub use crate::error::{QueueError, QueueResult};
    pub use crate::job::{Job, JobData, JobId};
    pub use crate::queue::JobQueue;
    pub use crate::storage::StorageStrategy;
    pub use crate::worker::{JobHandler, Worker, WorkerConfig};
}
