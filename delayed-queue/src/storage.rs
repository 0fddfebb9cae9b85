//! Job record persistence.
//!
//! Lists hold tokens. A storage strategy decides what a token is: the whole
//! serialized record, or an id pointing at a record stored under its own key.

use crate::backend::Backend;
use crate::error::{QueueError, QueueResult};
use crate::job::Job;
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;

/// Available storage strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageStrategy {
    /// Serialize whole records into the lists
    #[default]
    Inline,
    /// Store records under `jobs:<id>` and put ids in the lists
    Keyed,
}

impl StorageStrategy {
    pub(crate) fn build(self, key_prefix: &str) -> Arc<dyn JobStorage> {
        match self {
            StorageStrategy::Inline => Arc::new(InlineStorage),
            StorageStrategy::Keyed => Arc::new(KeyedStorage::new(key_prefix)),
        }
    }
}

impl FromStr for StorageStrategy {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inline" => Ok(StorageStrategy::Inline),
            "keyed" => Ok(StorageStrategy::Keyed),
            other => Err(QueueError::Config(format!(
                "unknown storage strategy '{}'",
                other
            ))),
        }
    }
}

/// Turns job records into list tokens and back.
#[async_trait]
pub trait JobStorage: Send + Sync {
    /// Give the job its final identity before it is stored.
    async fn assign_id(&self, _backend: &dyn Backend, _job: &mut Job) -> QueueResult<()> {
        Ok(())
    }

    /// Persist the record and return the token to put in a list.
    async fn store(&self, backend: &dyn Backend, job: &Job) -> QueueResult<String>;

    /// Read the record behind a token, leaving it in place.
    async fn load(&self, backend: &dyn Backend, token: &str) -> QueueResult<Option<Job>>;

    /// Read the record behind a token and release it.
    async fn take(&self, backend: &dyn Backend, token: &str) -> QueueResult<Option<Job>>;

    /// Release records for tokens that are being discarded wholesale.
    async fn purge(&self, _backend: &dyn Backend, _tokens: &[String]) -> QueueResult<()> {
        Ok(())
    }
}

fn encode(job: &Job) -> QueueResult<String> {
    serde_json::to_string(job).map_err(|e| QueueError::Serialization(e.to_string()))
}

fn decode(raw: &str) -> QueueResult<Job> {
    serde_json::from_str(raw).map_err(|e| QueueError::Deserialization(e.to_string()))
}

/// Tokens are the JSON records themselves; ids are the UUIDs given at creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineStorage;

#[async_trait]
impl JobStorage for InlineStorage {
    async fn store(&self, _backend: &dyn Backend, job: &Job) -> QueueResult<String> {
        encode(job)
    }

    async fn load(&self, _backend: &dyn Backend, token: &str) -> QueueResult<Option<Job>> {
        decode(token).map(Some)
    }

    async fn take(&self, backend: &dyn Backend, token: &str) -> QueueResult<Option<Job>> {
        self.load(backend, token).await
    }
}

/// Tokens are store-generated ids (`Job:<n>`); records live under their own keys.
#[derive(Debug, Clone)]
pub struct KeyedStorage {
    counter_key: String,
    record_prefix: String,
}

impl KeyedStorage {
    const ID_NAMESPACE: &'static str = "Job";

    /// Create keyed storage under a key prefix.
    pub fn new(key_prefix: &str) -> Self {
        Self {
            counter_key: format!("{}:keys:{}", key_prefix, Self::ID_NAMESPACE),
            record_prefix: format!("{}:jobs", key_prefix),
        }
    }

    fn record_key(&self, id: &str) -> String {
        format!("{}:{}", self.record_prefix, id)
    }
}

#[async_trait]
impl JobStorage for KeyedStorage {
    async fn assign_id(&self, backend: &dyn Backend, job: &mut Job) -> QueueResult<()> {
        let n = backend.incr(&self.counter_key).await?;
        job.id = format!("{}:{}", Self::ID_NAMESPACE, n);
        Ok(())
    }

    async fn store(&self, backend: &dyn Backend, job: &Job) -> QueueResult<String> {
        backend.set(&self.record_key(&job.id), &encode(job)?).await?;
        Ok(job.id.clone())
    }

    async fn load(&self, backend: &dyn Backend, token: &str) -> QueueResult<Option<Job>> {
        match backend.get(&self.record_key(token)).await? {
            Some(raw) => decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    async fn take(&self, backend: &dyn Backend, token: &str) -> QueueResult<Option<Job>> {
        match backend.take(&self.record_key(token)).await? {
            Some(raw) => decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    async fn purge(&self, backend: &dyn Backend, tokens: &[String]) -> QueueResult<()> {
        let keys: Vec<String> = tokens.iter().map(|id| self.record_key(id)).collect();
        backend.delete(&keys).await
    }
}
