//! # Delayed Queue Redis
//!
//! Redis store client for the delayed job queue.
//!
//! ## Features
//!
//! - **Connection Pooling**: Efficient connection management with bb8
//! - **Server Strings**: `host:port`, `host:port:db`, `host:port/namespace`
//!   or a full `redis://` URL
//! - **Queue Primitives**: atomic list append/pop, set add/remove and
//!   sorted-set range lookups
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use delayed_queue_redis::{RedisConfig, RedisService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedisConfig::builder()
//!         .url("redis://localhost:6379")
//!         .pool_size(10)
//!         .build();
//!
//!     let redis = RedisService::new(config).await?;
//!
//!     redis.rpush("delayed_job:queues:default", "payload").await?;
//!     let head: Option<String> = redis.lpop("delayed_job:queues:default").await?;
//!     assert_eq!(head.as_deref(), Some("payload"));
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Server Strings
//!
//! ```
//! use delayed_queue_redis::RedisConfig;
//!
//! let (config, namespace) = RedisConfig::parse_server("localhost:6380/jobs").unwrap();
//! assert_eq!(config.url, "redis://localhost:6380");
//! assert_eq!(namespace.as_deref(), Some("jobs"));
//! ```

mod config;
mod error;
mod service;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use service::RedisService;

// Re-export redis crate for convenience
pub use redis;

/// Prelude for common imports.
///
/// ```
/// use delayed_queue_redis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{RedisConfig, RedisConfigBuilder};
    pub use crate::error::{RedisError, Result};
    pub use crate::service::RedisService;
}
