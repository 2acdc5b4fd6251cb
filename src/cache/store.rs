//! Key-value store abstraction behind the view cache
//!
//! [`CacheStore`] is the seam between the view cache and the shared store.
//! The Redis implementation lives in [`crate::redis`]; [`MemoryStore`] is an
//! in-process equivalent with the same expiry semantics.

use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Byte-oriented key-value store with per-key expiry
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key`, replacing any previous value, expiring after `ttl`
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    /// Remove `key`; removing a missing key is not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
}

impl StoredValue {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process [`CacheStore`]
///
/// Expired entries are invisible to `get` and are purged on the next write.
/// The store can be switched offline to exercise degraded-store handling.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredValue>>,
    offline: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`] (or succeed again)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Whether `key` currently holds an unexpired value
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .get(key)
            .is_some_and(|value| !value.is_expired())
    }

    /// Number of unexpired entries
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|value| !value.is_expired())
            .count()
    }

    /// Whether the store holds no unexpired entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_online()?;
        Ok(self
            .entries
            .read()
            .get(key)
            .filter(|value| !value.is_expired())
            .map(|value| value.bytes.clone()))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.check_online()?;
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| StoreError::Unavailable(format!("ttl {:?} is out of range", ttl)))?;
        let mut entries = self.entries.write();
        entries.retain(|_, v| !v.is_expired());
        entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_online()?;
        self.entries.write().remove(key);
        Ok(())
    }
}
