//! View cache
//!
//! Caches serialized tables in a shared key-value store under two kinds of
//! keys:
//!
//! ```text
//! tsview:dataset:{dataset_id}  → full raw table of a dataset
//! tsview:opset:{opset_id}      → raw rows [offset, offset + limit) of an operation set
//! ```
//!
//! Operation-set entries record the row range they were sliced from. An entry
//! is only ever served for a range it contains, and is narrowed (never
//! widened) when its operation set shrinks. Anything else evicts it.
//!
//! The store is an optimization. Transport failures and timeouts are logged,
//! counted, and degraded to a miss or a no-op; they never reach the caller.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tsview::cache::{sub_range, MemoryStore, ViewCache, ViewCacheConfig};
//!
//! let cache = ViewCache::new(Arc::new(MemoryStore::new()), ViewCacheConfig::default());
//! assert_eq!(cache.stats().hits, 0);
//!
//! assert_eq!(sub_range(10, 20, 15, 5).unwrap(), (5, 5));
//! assert!(sub_range(10, 20, 25, 10).is_err());
//! ```

/// Store abstraction and in-process store
pub mod store;

pub use store::{CacheStore, MemoryStore};

use crate::codec::{decode_entry, encode_entry, CacheEntry};
use crate::error::{Error, Result, StoreError};
use crate::model::{OperationSet, RowRange};
use crate::storage::DatasetLoader;
use crate::table::Table;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const KEY_PREFIX: &str = "tsview";

/// Key of a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Full raw table of a dataset
    Dataset(String),
    /// Row slice of an operation set
    OperationSet(String),
}

impl CacheKey {
    /// Key for a dataset's raw table
    pub fn dataset(id: impl Into<String>) -> Self {
        CacheKey::Dataset(id.into())
    }

    /// Key for an operation set's slice
    pub fn opset(id: impl Into<String>) -> Self {
        CacheKey::OperationSet(id.into())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Dataset(id) => write!(f, "{}:dataset:{}", KEY_PREFIX, id),
            CacheKey::OperationSet(id) => write!(f, "{}:opset:{}", KEY_PREFIX, id),
        }
    }
}

/// Outcome of a cache read
#[derive(Debug)]
pub enum CacheLookup {
    /// Entry present and decodable
    Hit(CacheEntry),
    /// Entry absent, expired or undecodable
    Miss,
    /// Store failed or timed out
    Degraded(StoreError),
}

impl CacheLookup {
    /// The entry, treating a degraded store as a miss
    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            CacheLookup::Hit(entry) => Some(entry),
            CacheLookup::Miss | CacheLookup::Degraded(_) => None,
        }
    }
}

/// What [`ViewCache::reconcile`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No cached entry; nothing to do
    Skipped,
    /// Entry narrowed to the new range in place
    Narrowed {
        /// Offset of the new range inside the cached slice
        relative_offset: i64,
        /// Rows kept
        limit: i64,
    },
    /// Entry evicted; the next resolve reloads
    Evicted,
    /// Store unreachable; eviction attempted on a best-effort basis
    Degraded,
}

/// Locate `[offset, offset + limit)` inside `[prior_offset, prior_offset + prior_limit)`
///
/// Returns the offset relative to the prior range and the new limit.
///
/// # Errors
///
/// [`Error::RangeNotContained`] if the new range is not fully inside the
/// prior one, or if either range has a negative offset or a non-positive
/// limit. Nothing is clamped.
pub fn sub_range(prior_offset: i64, prior_limit: i64, offset: i64, limit: i64) -> Result<(i64, i64)> {
    let not_contained = || Error::RangeNotContained {
        prior_offset,
        prior_limit,
        offset,
        limit,
    };

    if prior_offset < 0 || prior_limit <= 0 || offset < 0 || limit <= 0 {
        return Err(not_contained());
    }

    let prior_end = prior_offset.checked_add(prior_limit).ok_or_else(not_contained)?;
    let end = offset.checked_add(limit).ok_or_else(not_contained)?;

    if prior_offset <= offset && end <= prior_end {
        Ok((offset - prior_offset, limit))
    } else {
        Err(not_contained())
    }
}

/// View cache settings
#[derive(Debug, Clone)]
pub struct ViewCacheConfig {
    /// Expiry of every entry written
    pub entry_ttl: Duration,
    /// Deadline for each store call
    pub command_timeout: Duration,
    /// Deadline for a durable load
    pub load_timeout: Duration,
    /// LZ4-compress entries
    pub compress: bool,
}

impl Default for ViewCacheConfig {
    fn default() -> Self {
        Self {
            entry_ttl: Duration::from_secs(3600),
            command_timeout: Duration::from_secs(1),
            load_timeout: Duration::from_secs(30),
            compress: true,
        }
    }
}

/// Cache counters
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    degraded: AtomicU64,
    loads: AtomicU64,
    narrowed: AtomicU64,
    evicted: AtomicU64,
}

impl CacheStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the counters
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            narrowed: self.narrowed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cache counters at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    /// Reads that found an entry
    pub hits: u64,
    /// Reads that found nothing
    pub misses: u64,
    /// Store calls that failed or timed out
    pub degraded: u64,
    /// Durable loads performed
    pub loads: u64,
    /// Entries narrowed to a contained range
    pub narrowed: u64,
    /// Entries evicted
    pub evicted: u64,
}

/// Cache of raw dataset tables and operation-set slices
///
/// Cheap to share behind an `Arc`; holds no locks.
pub struct ViewCache {
    store: Arc<dyn CacheStore>,
    config: ViewCacheConfig,
    stats: CacheStats,
}

impl ViewCache {
    /// Create a cache over `store`
    pub fn new(store: Arc<dyn CacheStore>, config: ViewCacheConfig) -> Self {
        Self {
            store,
            config,
            stats: CacheStats::default(),
        }
    }

    /// Cache settings
    pub fn config(&self) -> &ViewCacheConfig {
        &self.config
    }

    /// Counter snapshot
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    async fn bounded<T, F>(&self, call: F) -> std::result::Result<T, StoreError>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.config.command_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.config.command_timeout)),
        }
    }

    /// Read an entry, distinguishing absence from a degraded store
    pub async fn lookup(&self, key: &CacheKey) -> CacheLookup {
        let name = key.to_string();
        match self.bounded(self.store.get(&name)).await {
            Ok(Some(bytes)) => match decode_entry(&bytes) {
                Ok(entry) => {
                    CacheStats::bump(&self.stats.hits);
                    debug!("Cache hit for {}", name);
                    CacheLookup::Hit(entry)
                },
                Err(e) => {
                    warn!("Discarding undecodable cache entry {}: {}", name, e);
                    CacheStats::bump(&self.stats.misses);
                    self.delete(key).await;
                    CacheLookup::Miss
                },
            },
            Ok(None) => {
                CacheStats::bump(&self.stats.misses);
                debug!("Cache miss for {}", name);
                CacheLookup::Miss
            },
            Err(e) => {
                CacheStats::bump(&self.stats.degraded);
                warn!("Cache read of {} failed, treating as miss: {}", name, e);
                CacheLookup::Degraded(e)
            },
        }
    }

    /// Read a table; absent, undecodable and degraded all read as `None`
    pub async fn get(&self, key: &CacheKey) -> Option<Table> {
        self.lookup(key).await.into_entry().map(|entry| entry.table)
    }

    /// Store an entry with the configured TTL; returns whether it was written
    pub async fn put(&self, key: &CacheKey, entry: &CacheEntry) -> bool {
        self.put_with_ttl(key, entry, self.config.entry_ttl).await
    }

    /// Store an entry, best effort; returns whether it was written
    pub async fn put_with_ttl(&self, key: &CacheKey, entry: &CacheEntry, ttl: Duration) -> bool {
        let name = key.to_string();
        let frame = encode_entry(entry, self.config.compress);
        match self.bounded(self.store.set_ex(&name, &frame, ttl)).await {
            Ok(()) => {
                debug!(
                    "Cached {} ({} rows, {} bytes, ttl {:?})",
                    name,
                    entry.table.num_rows(),
                    frame.len(),
                    ttl
                );
                true
            },
            Err(e) => {
                CacheStats::bump(&self.stats.degraded);
                warn!("Cache write of {} failed: {}", name, e);
                false
            },
        }
    }

    /// Remove an entry, best effort; returns whether the store confirmed it
    pub async fn delete(&self, key: &CacheKey) -> bool {
        let name = key.to_string();
        match self.bounded(self.store.delete(&name)).await {
            Ok(()) => {
                CacheStats::bump(&self.stats.evicted);
                debug!("Evicted {}", name);
                true
            },
            Err(e) => {
                CacheStats::bump(&self.stats.degraded);
                warn!("Cache delete of {} failed: {}", name, e);
                false
            },
        }
    }

    /// Raw rows `[offset, offset + limit)` of an operation set
    ///
    /// Served from the operation-set entry when its recorded range contains
    /// the requested one, otherwise sliced from the dataset's raw table,
    /// which is itself cached or loaded through `loader`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRange`] for a malformed row range, and
    /// [`Error::DurableLoadFailed`] when the raw table has to be loaded and
    /// cannot be. Store failures never surface here.
    pub async fn resolve(&self, opset: &OperationSet, loader: &dyn DatasetLoader) -> Result<Table> {
        let range = opset.range();
        let (offset, limit) = range.as_slice_bounds()?;
        let opset_key = CacheKey::opset(&opset.id);

        if let Some(entry) = self.lookup(&opset_key).await.into_entry() {
            if let Some(table) = self.reuse(&opset_key, entry, range).await {
                return Ok(table);
            }
        }

        let dataset_key = CacheKey::dataset(&opset.dataset_id);
        let raw = match self.get(&dataset_key).await {
            Some(raw) => raw,
            None => {
                let raw = self.load(&opset.dataset_id, loader).await?;
                self.put(&dataset_key, &CacheEntry::dataset(raw.clone())).await;
                raw
            },
        };

        let slice = raw.slice(offset, limit);
        self.put(&opset_key, &CacheEntry::ranged(slice.clone(), range))
            .await;
        Ok(slice)
    }

    /// Serve `range` from a cached operation-set entry, if its source range allows
    async fn reuse(&self, key: &CacheKey, entry: CacheEntry, range: RowRange) -> Option<Table> {
        let source = match entry.source_range {
            None => return Some(entry.table),
            Some(source) if source == range => return Some(entry.table),
            Some(source) => source,
        };

        match sub_range(source.offset, source.limit, range.offset, range.limit) {
            Ok((relative_offset, limit)) => {
                let (offset, limit) = RowRange::new(relative_offset, limit)
                    .as_slice_bounds()
                    .ok()?;
                let narrowed = entry.table.slice(offset, limit);
                CacheStats::bump(&self.stats.narrowed);
                debug!("Narrowed {} from {:?} to {:?} on read", key, source, range);
                self.put(key, &CacheEntry::ranged(narrowed.clone(), range))
                    .await;
                Some(narrowed)
            },
            Err(e) => {
                info!("Cached {} no longer covers the request: {}", key, e);
                self.delete(key).await;
                None
            },
        }
    }

    async fn load(&self, dataset_id: &str, loader: &dyn DatasetLoader) -> Result<Table> {
        CacheStats::bump(&self.stats.loads);
        let timeout = self.config.load_timeout;
        match tokio::time::timeout(timeout, loader.load(dataset_id)).await {
            Ok(Ok(table)) => Ok(table),
            Ok(Err(e @ Error::DurableLoadFailed { .. })) => Err(e),
            Ok(Err(e)) => Err(Error::DurableLoadFailed {
                dataset_id: dataset_id.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::DurableLoadFailed {
                dataset_id: dataset_id.to_string(),
                reason: format!("load timed out after {:?}", timeout),
            }),
        }
    }

    /// Bring the cached slice of an operation set in line with an update
    ///
    /// `old` and `new` describe the same operation set before and after an
    /// in-place update. A new range inside the cached one narrows the entry
    /// without touching durable storage; any other change evicts it. When
    /// the narrowed entry cannot be written back, or the store cannot be
    /// read, the entry is evicted so a stale slice is never served.
    pub async fn reconcile(&self, new: &OperationSet, old: &OperationSet) -> ReconcileOutcome {
        let old_key = CacheKey::opset(&old.id);
        let new_key = CacheKey::opset(&new.id);

        let entry = match self.lookup(&old_key).await {
            CacheLookup::Hit(entry) => entry,
            CacheLookup::Miss => return ReconcileOutcome::Skipped,
            CacheLookup::Degraded(_) => {
                self.evict_all(&old_key, &new_key).await;
                return ReconcileOutcome::Degraded;
            },
        };

        let prior = entry.source_range.unwrap_or_else(|| old.range());
        let contained = sub_range(prior.offset, prior.limit, new.offset, new.limit)
            .and_then(|(relative_offset, limit)| {
                let bounds = RowRange::new(relative_offset, limit).as_slice_bounds()?;
                Ok((relative_offset, limit, bounds))
            });

        match contained {
            Ok((relative_offset, limit, (start, len))) => {
                let narrowed = CacheEntry::ranged(entry.table.slice(start, len), new.range());
                if self.put(&new_key, &narrowed).await {
                    if old_key != new_key {
                        self.delete(&old_key).await;
                    }
                    CacheStats::bump(&self.stats.narrowed);
                    info!(
                        "Narrowed {} from {:?} to {:?}",
                        new_key,
                        prior,
                        new.range()
                    );
                    ReconcileOutcome::Narrowed {
                        relative_offset,
                        limit,
                    }
                } else {
                    self.evict_all(&old_key, &new_key).await;
                    ReconcileOutcome::Evicted
                }
            },
            Err(e) => {
                info!("Evicting {}: {}", old_key, e);
                self.evict_all(&old_key, &new_key).await;
                ReconcileOutcome::Evicted
            },
        }
    }

    async fn evict_all(&self, old_key: &CacheKey, new_key: &CacheKey) {
        self.delete(old_key).await;
        if old_key != new_key {
            self.delete(new_key).await;
        }
    }

    /// Evict a dataset's raw table and the given operation-set slices
    pub async fn evict_dataset<'a, I>(&self, dataset_id: &str, opset_ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.delete(&CacheKey::dataset(dataset_id)).await;
        for id in opset_ids {
            self.delete(&CacheKey::opset(id)).await;
        }
    }
}
