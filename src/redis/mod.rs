//! Redis backend for the view cache
//!
//! # Architecture
//!
//! ```text
//! ViewCache ──► RedisCacheStore ──► RedisPool ──► multiplexed connection
//!               GET / SET EX / DEL   retries, timeouts, permits
//! ```
//!
//! Entries are plain string keys holding encoded tables:
//!
//! ```text
//! tsview:dataset:{dataset_id}   → raw table
//! tsview:opset:{opset_id}       → operation-set slice + source range
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tsview::cache::{ViewCache, ViewCacheConfig};
//! use tsview::redis::{RedisCacheStore, RedisConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisCacheStore::lazy(RedisConfig::with_url("redis://localhost:6379"))?;
//! let cache = ViewCache::new(Arc::new(store), ViewCacheConfig::default());
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod store;
pub mod util;

pub use connection::{HealthStatus, RedisConfig, RedisPool, RetryPolicy};
pub use store::RedisCacheStore;
