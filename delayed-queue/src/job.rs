//! Job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job identifier.
///
/// Either a UUID assigned at creation or a store-generated `Job:<n>` key,
/// depending on the storage strategy.
pub type JobId = String;

/// Job payload data.
pub type JobData = serde_json::Value;

/// A unit of work moved between the ready-lists and the deferred lists.
///
/// Only `queue` and `run_at` are interpreted by the queue itself. The rest
/// is carried for the worker harness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier
    pub id: JobId,

    /// Name of the handler that performs this job
    pub job_type: String,

    /// Job payload data
    pub handler: JobData,

    /// Target queue; empty means the configured default queue
    pub queue: String,

    /// Priority (carried, not used for ordering)
    pub priority: i32,

    /// Number of failed attempts so far
    pub attempts: u32,

    /// Earliest time the job may run; `None` means immediately
    pub run_at: Option<DateTime<Utc>>,

    /// Error message of the last failed attempt
    pub last_error: Option<String>,

    pub locked_at: Option<DateTime<Utc>>,

    pub locked_by: Option<String>,

    /// When the job was given up on
    pub failed_at: Option<DateTime<Utc>>,

    /// When the job was created
    pub created_at: DateTime<Utc>,

    #[serde(skip)]
    placed: bool,
}

impl Job {
    /// Create a new job for a named queue.
    ///
    /// `created_at` is taken from the wall clock.
    pub fn new(queue: impl Into<String>, job_type: impl Into<String>, handler: JobData) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_type: job_type.into(),
            handler,
            queue: queue.into(),
            priority: 0,
            attempts: 0,
            run_at: None,
            last_error: None,
            locked_at: None,
            locked_by: None,
            failed_at: None,
            created_at: Utc::now(),
            placed: false,
        }
    }

    /// Create a job that will be routed to the default queue.
    pub fn for_default_queue(job_type: impl Into<String>, handler: JobData) -> Self {
        Self::new(String::new(), job_type, handler)
    }

    /// Set the target queue.
    pub fn in_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Set job priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Schedule the job for later.
    pub fn schedule_at(mut self, time: DateTime<Utc>) -> Self {
        self.run_at = Some(time);
        self
    }

    /// Schedule the job after a delay from the wall clock.
    ///
    /// Queues running on another [`Clock`](crate::Clock) should use
    /// [`schedule_after_from`](Self::schedule_after_from) with
    /// [`JobQueue::db_time_now`](crate::JobQueue::db_time_now).
    pub fn schedule_after(self, duration: chrono::Duration) -> Self {
        self.schedule_after_from(Utc::now(), duration)
    }

    /// Schedule the job a delay after `now`.
    pub fn schedule_after_from(mut self, now: DateTime<Utc>, duration: chrono::Duration) -> Self {
        self.run_at = Some(now + duration);
        self
    }

    /// Whether the job may run at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.run_at.is_none_or(|run_at| run_at <= now)
    }

    /// Whether this record has already been handed to a queue.
    pub fn placed(&self) -> bool {
        self.placed
    }

    pub(crate) fn mark_placed(&mut self) {
        self.placed = true;
    }

    /// Calculate backoff delay for the next retry.
    pub fn backoff_delay(&self) -> chrono::Duration {
        // Exponential backoff: 2^(attempts - 1) seconds
        let exponent = self.attempts.saturating_sub(1).min(12);
        let seconds = 2_i64.pow(exponent);
        chrono::Duration::seconds(seconds.min(3600)) // Max 1 hour
    }

    /// Build the record to re-place after a failed attempt.
    ///
    /// The returned job is unplaced, carries the error and is deferred by
    /// the backoff delay of its new attempt count.
    pub fn retry_after_failure(&self, error: impl Into<String>, now: DateTime<Utc>) -> Job {
        let mut retry = self.clone();
        retry.attempts = retry.attempts.saturating_add(1);
        retry.last_error = Some(error.into());
        retry.locked_at = None;
        retry.locked_by = None;
        retry.run_at = Some(now + retry.backoff_delay());
        retry.placed = false;
        retry
    }

    /// Mark the job as permanently failed.
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.last_error = Some(error.into());
        self.failed_at = Some(now);
    }
}
