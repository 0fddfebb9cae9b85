//! Queue configuration.

use crate::error::QueueResult;
use crate::storage::StorageStrategy;
use delayed_queue_redis::RedisConfig;

/// Default key namespace, shared with other delayed_job Redis backends.
pub const DEFAULT_KEY_PREFIX: &str = "delayed_job";

/// Queue jobs are routed to when they name none.
pub const DEFAULT_QUEUE: &str = "default";

/// Queue configuration.
///
/// Passed explicitly at construction, so several independent queues can
/// share one process.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis connection settings
    pub redis: RedisConfig,

    /// Namespace for every key the queue touches
    pub key_prefix: String,

    /// Queue used for jobs that do not name one
    pub default_queue: String,

    /// How job records are persisted
    pub storage: StorageStrategy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            default_queue: DEFAULT_QUEUE.to_string(),
            storage: StorageStrategy::default(),
        }
    }
}

impl QueueConfig {
    /// Create a configuration for a Redis URL.
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis: RedisConfig::new(redis_url),
            ..Default::default()
        }
    }

    /// Create a configuration from a server string.
    ///
    /// Accepts `host:port`, `host:port:db`, `host:port/namespace` or a
    /// `redis://` URL. A namespace becomes the key prefix.
    pub fn from_server(server: &str) -> QueueResult<Self> {
        let (redis, namespace) = RedisConfig::parse_server(server)?;
        Ok(Self {
            redis,
            key_prefix: namespace.unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            ..Default::default()
        })
    }

    /// Load configuration from environment variables.
    ///
    /// Reads the `REDIS_*` variables plus `DELAYED_QUEUE_PREFIX`,
    /// `DELAYED_QUEUE_DEFAULT_QUEUE` and `DELAYED_QUEUE_STORAGE`.
    /// Unparsable values fall back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self {
            redis: RedisConfig::from_env().build(),
            ..Default::default()
        };

        if let Ok(prefix) = std::env::var("DELAYED_QUEUE_PREFIX") {
            config = config.with_key_prefix(prefix);
        }

        if let Ok(queue) = std::env::var("DELAYED_QUEUE_DEFAULT_QUEUE") {
            config = config.with_default_queue(queue);
        }

        if let Ok(storage) = std::env::var("DELAYED_QUEUE_STORAGE")
            && let Ok(storage) = storage.parse()
        {
            config = config.with_storage(storage);
        }

        config
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the default queue name.
    pub fn with_default_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = queue.into();
        self
    }

    /// Set the storage strategy.
    pub fn with_storage(mut self, storage: StorageStrategy) -> Self {
        self.storage = storage;
        self
    }

    /// Set the Redis configuration.
    pub fn with_redis(mut self, redis: RedisConfig) -> Self {
        self.redis = redis;
        self
    }

    /// Build a namespaced key.
    pub(crate) fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.key_prefix, suffix)
    }
}
