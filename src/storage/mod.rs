//! Durable dataset sources
//!
//! The view cache falls back to a [`DatasetLoader`] when neither the
//! operation-set entry nor the raw dataset entry is cached.
//!
//! # Key Components
//!
//! - **`ParquetDatasetLoader`**: reads `{data_dir}/{file_name}` on the blocking pool
//! - **`MemoryDatasetLoader`**: pre-registered tables, counts loads

use crate::error::Result;
use crate::table::Table;
use async_trait::async_trait;

/// In-memory loader
pub mod memory;
/// Parquet file loader
pub mod parquet_file;

pub use memory::MemoryDatasetLoader;
pub use parquet_file::{read_parquet, ParquetDatasetLoader};

/// Reads the full raw table of a dataset from durable storage
#[async_trait]
pub trait DatasetLoader: Send + Sync {
    /// Load every row of `dataset_id`
    async fn load(&self, dataset_id: &str) -> Result<Table>;
}
