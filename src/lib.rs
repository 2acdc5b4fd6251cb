//! tsview - frequency-aware views over tabular time-series datasets
//!
//! This library provides the query side of a time-series exploration
//! service:
//! - Sampling-frequency inference and irregularity detection
//! - Range aggregation into a bounded number of points
//! - A Redis-backed view cache that narrows cached slices in place
//! - Query orchestration over persisted operation sets, with forecasting

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Range aggregation into a bounded number of time windows
pub mod aggregate;

/// Binary frame format for cached tables
pub mod codec;

/// Error types for all operations
pub mod error;

/// Sampling-frequency inference and irregularity detection
pub mod frequency;

/// Dataset, operation-set and view records
pub mod model;

/// Immutable columnar tables
pub mod table;

/// Configuration management with TOML support
pub mod config;

/// View cache of dataset tables and operation-set slices over a pluggable store
pub mod cache;

/// Redis integration for the view cache
pub mod redis;

/// Durable dataset loading (Parquet files, in-memory tables)
pub mod storage;

/// Dataset and operation-set records
pub mod metadata;

/// Forecast models and time-grid projection
pub mod forecast;

/// Request orchestration across metadata, cache, storage and aggregation
pub mod orchestrator;

// Re-export main types
pub use aggregate::{aggregate, RangeAggregator};
pub use cache::{ViewCache, ViewCacheConfig};
pub use config::Config;
pub use error::{Error, Result};
pub use frequency::{classify_irregularities, infer_frequency, Irregularity};
pub use model::{Dataset, OperationSet, OperationSetUpdate, TimeSeriesView};
pub use orchestrator::QueryOrchestrator;
pub use table::{Column, ColumnType, Table};
