//! Integration tests for the view cache
//!
//! These tests drive resolve/reconcile through realistic update sequences:
//! - Cold reads load once, warm reads never reach durable storage
//! - Contained range updates narrow the cached slice in place
//! - Widening updates evict and re-slice from the cached raw table
//! - A crash between metadata persist and reconcile never serves stale rows
//! - An unreachable store degrades to loading on every read

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tsview::cache::{CacheKey, CacheStore, MemoryStore, ReconcileOutcome, ViewCache, ViewCacheConfig};
use tsview::storage::DatasetLoader;
use tsview::table::{Column, Table};
use tsview::{Error, OperationSet, OperationSetUpdate, Result};

// ============================================================================
// Helper Functions
// ============================================================================

const MINUTE: i64 = 60_000_000;

fn raw_table(rows: i64) -> Table {
    Table::new(vec![
        Column::temporal("ts", (0..rows).map(|i| Some(i * MINUTE)).collect()),
        Column::numeric("value", (0..rows).map(|i| Some(i as f64)).collect()),
    ])
    .unwrap()
}

/// Loader that counts calls and can be made slow
struct CountingLoader {
    table: Table,
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingLoader {
    fn new(rows: i64) -> Self {
        Self {
            table: raw_table(rows),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    fn slow(rows: i64, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(rows)
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatasetLoader for CountingLoader {
    async fn load(&self, _dataset_id: &str) -> Result<Table> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.table.clone())
    }
}

fn first_value(table: &Table) -> Option<f64> {
    table.column("value").unwrap().as_numeric().unwrap()[0]
}

fn setup() -> (Arc<MemoryStore>, ViewCache, CountingLoader) {
    let store = Arc::new(MemoryStore::new());
    let cache = ViewCache::new(store.clone(), ViewCacheConfig::default());
    (store, cache, CountingLoader::new(1_000))
}

// ============================================================================
// Resolve
// ============================================================================

#[tokio::test]
async fn test_warm_reads_skip_durable_storage() {
    let (store, cache, loader) = setup();
    let opset = OperationSet::new("d1", vec![]).with_range(100, 50);

    let cold = cache.resolve(&opset, &loader).await.unwrap();
    let warm = cache.resolve(&opset, &loader).await.unwrap();

    assert_eq!(cold, warm);
    assert_eq!(cold.num_rows(), 50);
    assert_eq!(first_value(&cold), Some(100.0));
    assert_eq!(loader.calls(), 1);
    assert!(store.contains(&CacheKey::dataset("d1").to_string()));
    assert!(store.contains(&CacheKey::opset(&opset.id).to_string()));
}

#[tokio::test]
async fn test_second_operation_set_reuses_raw_table() {
    let (_store, cache, loader) = setup();
    let a = OperationSet::new("d1", vec![]).with_range(0, 10);
    let b = OperationSet::new("d1", vec![]).with_range(500, 10);

    cache.resolve(&a, &loader).await.unwrap();
    let slice = cache.resolve(&b, &loader).await.unwrap();

    assert_eq!(first_value(&slice), Some(500.0));
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn test_slow_loader_times_out() {
    let store = Arc::new(MemoryStore::new());
    let config = ViewCacheConfig {
        load_timeout: Duration::from_millis(20),
        ..ViewCacheConfig::default()
    };
    let cache = ViewCache::new(store, config);
    let loader = CountingLoader::slow(10, Duration::from_secs(5));

    let result = cache
        .resolve(&OperationSet::new("d1", vec![]), &loader)
        .await;
    assert!(matches!(result, Err(Error::DurableLoadFailed { .. })));
}

// ============================================================================
// Reconcile
// ============================================================================

#[tokio::test]
async fn test_contained_update_narrows_without_reload() {
    let (_store, cache, loader) = setup();
    let old = OperationSet::new("d1", vec![]).with_range(10, 20);
    cache.resolve(&old, &loader).await.unwrap();

    let new = old.apply(&OperationSetUpdate::range(15, 5)).unwrap();
    let outcome = cache.reconcile(&new, &old).await;
    assert_eq!(
        outcome,
        ReconcileOutcome::Narrowed {
            relative_offset: 5,
            limit: 5
        }
    );

    let slice = cache.resolve(&new, &loader).await.unwrap();
    assert_eq!(slice.num_rows(), 5);
    assert_eq!(first_value(&slice), Some(15.0));
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn test_repeated_narrowing() {
    let (_store, cache, loader) = setup();
    let mut current = OperationSet::new("d1", vec![]).with_range(0, 800);
    cache.resolve(&current, &loader).await.unwrap();

    for (offset, limit) in [(100, 600), (200, 300), (250, 10)] {
        let next = current
            .apply(&OperationSetUpdate::range(offset, limit))
            .unwrap();
        assert!(matches!(
            cache.reconcile(&next, &current).await,
            ReconcileOutcome::Narrowed { .. }
        ));
        current = next;
    }

    let slice = cache.resolve(&current, &loader).await.unwrap();
    assert_eq!(slice.num_rows(), 10);
    assert_eq!(first_value(&slice), Some(250.0));
    assert_eq!(loader.calls(), 1);
    assert_eq!(cache.stats().narrowed, 3);
}

#[tokio::test]
async fn test_widening_update_evicts_slice() {
    let (store, cache, loader) = setup();
    let old = OperationSet::new("d1", vec![]).with_range(10, 20);
    cache.resolve(&old, &loader).await.unwrap();

    let new = old.apply(&OperationSetUpdate::range(5, 10)).unwrap();
    assert_eq!(cache.reconcile(&new, &old).await, ReconcileOutcome::Evicted);
    assert!(!store.contains(&CacheKey::opset(&old.id).to_string()));

    let slice = cache.resolve(&new, &loader).await.unwrap();
    assert_eq!(first_value(&slice), Some(5.0));
    // Raw table still cached
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn test_reconcile_without_entry_is_skipped() {
    let (_store, cache, _loader) = setup();
    let old = OperationSet::new("d1", vec![]).with_range(10, 20);
    let new = old.apply(&OperationSetUpdate::range(15, 5)).unwrap();
    assert_eq!(cache.reconcile(&new, &old).await, ReconcileOutcome::Skipped);
}

#[tokio::test]
async fn test_crash_before_reconcile_never_serves_stale_rows() {
    let (_store, cache, loader) = setup();
    let old = OperationSet::new("d1", vec![]).with_range(10, 20);
    cache.resolve(&old, &loader).await.unwrap();

    // Metadata moved on; reconcile never ran
    let narrowed = old.apply(&OperationSetUpdate::range(12, 4)).unwrap();
    let slice = cache.resolve(&narrowed, &loader).await.unwrap();
    assert_eq!(slice.num_rows(), 4);
    assert_eq!(first_value(&slice), Some(12.0));

    let moved = narrowed.apply(&OperationSetUpdate::range(600, 4)).unwrap();
    let slice = cache.resolve(&moved, &loader).await.unwrap();
    assert_eq!(first_value(&slice), Some(600.0));
}

// ============================================================================
// Degraded store
// ============================================================================

#[tokio::test]
async fn test_offline_store_falls_back_to_loader() {
    let (store, cache, loader) = setup();
    store.set_offline(true);
    let opset = OperationSet::new("d1", vec![]).with_range(0, 10);

    for _ in 0..3 {
        let slice = cache.resolve(&opset, &loader).await.unwrap();
        assert_eq!(slice.num_rows(), 10);
    }
    assert_eq!(loader.calls(), 3);
    assert!(cache.stats().degraded > 0);

    let new = opset.apply(&OperationSetUpdate::range(2, 2)).unwrap();
    assert_eq!(cache.reconcile(&new, &opset).await, ReconcileOutcome::Degraded);
}

#[tokio::test]
async fn test_entries_expire() {
    let store = Arc::new(MemoryStore::new());
    let cache = ViewCache::new(store.clone(), ViewCacheConfig::default());
    let key = CacheKey::dataset("d1");
    let entry = tsview::codec::CacheEntry::dataset(raw_table(5));

    assert!(cache.put_with_ttl(&key, &entry, Duration::from_millis(20)).await);
    assert!(cache.get(&key).await.is_some());
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(cache.get(&key).await.is_none());
    assert!(store.get(&key.to_string()).await.unwrap().is_none());
}
