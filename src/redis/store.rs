use super::connection::{RedisConfig, RedisPool};
use crate::cache::CacheStore;
use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// [`CacheStore`] backed by Redis `GET` / `SET EX` / `DEL`
#[derive(Clone)]
pub struct RedisCacheStore {
    pool: Arc<RedisPool>,
}

impl RedisCacheStore {
    /// Wrap an existing pool
    pub fn new(pool: Arc<RedisPool>) -> Self {
        Self { pool }
    }

    /// Build a store whose pool connects on first use
    ///
    /// Construction succeeds while the server is down; the cache then
    /// degrades every call to a miss until it comes back.
    pub fn lazy(config: RedisConfig) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(RedisPool::lazy(config)?)))
    }

    /// Underlying pool
    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }
}

/// `SET EX` takes whole seconds; round up so an entry never expires early
fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.pool
            .execute(|mut conn| {
                let key = key.to_string();
                async move {
                    redis::cmd("GET")
                        .arg(key)
                        .query_async::<Option<Vec<u8>>>(&mut conn)
                        .await
                }
            })
            .await
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let secs = ttl_secs(ttl);
        self.pool
            .execute(|mut conn| {
                let key = key.to_string();
                let value = value.to_vec();
                async move {
                    redis::cmd("SET")
                        .arg(key)
                        .arg(value)
                        .arg("EX")
                        .arg(secs)
                        .query_async::<()>(&mut conn)
                        .await
                }
            })
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.pool
            .execute(|mut conn| {
                let key = key.to_string();
                async move { redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await }
            })
            .await
    }
}
