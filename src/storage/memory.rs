use super::DatasetLoader;
use crate::error::{Error, Result};
use crate::table::Table;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Loader over tables registered in process
///
/// Counts every call to [`DatasetLoader::load`], which lets callers observe
/// whether a read was served from cache.
#[derive(Default)]
pub struct MemoryDatasetLoader {
    tables: RwLock<HashMap<String, Table>>,
    loads: AtomicU64,
}

impl MemoryDatasetLoader {
    /// Create an empty loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the table behind `dataset_id`
    pub fn insert(&self, dataset_id: impl Into<String>, table: Table) {
        self.tables.write().insert(dataset_id.into(), table);
    }

    /// Forget `dataset_id`
    pub fn remove(&self, dataset_id: &str) -> Option<Table> {
        self.tables.write().remove(dataset_id)
    }

    /// Number of loads performed so far
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DatasetLoader for MemoryDatasetLoader {
    async fn load(&self, dataset_id: &str) -> Result<Table> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.tables
            .read()
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| Error::DurableLoadFailed {
                dataset_id: dataset_id.to_string(),
                reason: "no such dataset".to_string(),
            })
    }
}
