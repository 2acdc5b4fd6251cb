//! Query orchestration
//!
//! Entry point for an API layer. Resolves operation sets against metadata,
//! the view cache and the aggregator, and keeps the cache consistent when an
//! operation set is updated or its dataset deleted.
//!
//! # Read path
//!
//! ```text
//! get_view(opset_id)
//!   → MetadataStore: operation set + dataset
//!   → ViewCache::resolve: cached slice | cached raw table | DatasetLoader
//!   → project timestamp + requested series
//!   → RangeAggregator (global point budget)
//!   → TimeSeriesView
//! ```
//!
//! # Update path
//!
//! Metadata is persisted first, then the cache is reconciled with the
//! previous and current ranges. If the process dies in between, the cached
//! entry still records its old source range and is narrowed or evicted on
//! the next read.

use crate::aggregate::RangeAggregator;
use crate::cache::{CacheStore, MemoryStore, ReconcileOutcome, ViewCache};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::forecast::{forecast, DriftForecaster, ForecastModel};
use crate::metadata::MetadataStore;
use crate::model::{
    Dataset, ForecastRequest, ForecastResponse, OperationSet, OperationSetUpdate, TimeSeriesView,
};
use crate::redis::{RedisCacheStore, RedisConfig};
use crate::storage::DatasetLoader;
use crate::table::{ColumnType, Table};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Resolves, updates and forecasts operation-set views
pub struct QueryOrchestrator {
    metadata: Arc<dyn MetadataStore>,
    cache: Arc<ViewCache>,
    loader: Arc<dyn DatasetLoader>,
    aggregator: RangeAggregator,
    model: Arc<dyn ForecastModel>,
    default_horizon: usize,
}

impl QueryOrchestrator {
    /// Create an orchestrator from explicit collaborators
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        cache: Arc<ViewCache>,
        loader: Arc<dyn DatasetLoader>,
        aggregator: RangeAggregator,
    ) -> Self {
        Self {
            metadata,
            cache,
            loader,
            aggregator,
            model: Arc::new(DriftForecaster::default()),
            default_horizon: 10,
        }
    }

    /// Build from configuration
    ///
    /// Uses Redis when `[cache] enabled`, otherwise an in-process store. The
    /// Redis pool connects lazily, so an unreachable server only degrades
    /// the cache.
    pub fn from_config(
        config: &Config,
        metadata: Arc<dyn MetadataStore>,
        loader: Arc<dyn DatasetLoader>,
    ) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn CacheStore> = if config.cache.enabled {
            let redis = RedisCacheStore::lazy(RedisConfig::from(&config.cache))
                .map_err(|e| Error::Configuration(e.to_string()))?;
            Arc::new(redis)
        } else {
            Arc::new(MemoryStore::new())
        };
        let cache = Arc::new(ViewCache::new(store, config.view_cache()));

        let mut orchestrator = Self::new(
            metadata,
            cache,
            loader,
            RangeAggregator::new(config.aggregation.max_points),
        )
        .with_forecaster(Arc::new(DriftForecaster::new(config.forecast.z_score)));
        orchestrator.default_horizon = config.forecast.default_horizon;
        Ok(orchestrator)
    }

    /// Replace the forecasting model
    pub fn with_forecaster(mut self, model: Arc<dyn ForecastModel>) -> Self {
        self.model = model;
        self
    }

    /// View cache
    pub fn cache(&self) -> &ViewCache {
        &self.cache
    }

    /// Metadata store
    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Point budget applied to every view
    pub fn max_points(&self) -> usize {
        self.aggregator.max_points()
    }

    /// Aggregated view of an operation set
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown ids, [`Error::DurableLoadFailed`] when
    /// the raw data cannot be read, and aggregation errors verbatim.
    pub async fn get_view(&self, opset_id: &str) -> Result<TimeSeriesView> {
        let (opset, dataset) = self.resolve_records(opset_id).await?;
        let tscol = dataset.tscol()?;
        let series = selected_series(&dataset, &opset.series_ids)?;

        let aggregated = self.aggregated(&opset, tscol, &series).await?;
        let view = match aggregated {
            Some(table) => TimeSeriesView::from_table(&opset.id, &dataset.name, &table, tscol, &series)?,
            None => TimeSeriesView {
                id: opset.id.clone(),
                name: dataset.name.clone(),
                records: Vec::new(),
            },
        };

        debug!(
            "View {} of {}: {} records, series {:?}",
            opset.id,
            dataset.name,
            view.len(),
            series
        );
        Ok(view)
    }

    /// Persist an operation-set update, then reconcile the cache
    ///
    /// Returns the updated record. Cache reconciliation never fails the call.
    pub async fn update_view(
        &self,
        opset_id: &str,
        update: &OperationSetUpdate,
    ) -> Result<OperationSet> {
        if let Some(series_ids) = &update.series_ids {
            let opset = self.metadata.get_operation_set(opset_id).await?;
            let dataset = self.metadata.get_dataset(&opset.dataset_id).await?;
            selected_series(&dataset, series_ids)?;
        }

        let (previous, current) = self
            .metadata
            .update_operation_set(opset_id, update)
            .await?;

        let outcome = self.cache.reconcile(&current, &previous).await;
        match outcome {
            ReconcileOutcome::Narrowed { .. } | ReconcileOutcome::Skipped => debug!(
                "Reconciled {} ({:?} -> {:?}): {:?}",
                opset_id,
                previous.range(),
                current.range(),
                outcome
            ),
            ReconcileOutcome::Evicted | ReconcileOutcome::Degraded => info!(
                "Reconciled {} ({:?} -> {:?}): {:?}",
                opset_id,
                previous.range(),
                current.range(),
                outcome
            ),
        }
        Ok(current)
    }

    /// Classify `table` and record it as a new dataset
    ///
    /// The durable copy is written by the ingestion side; only metadata is
    /// stored here.
    ///
    /// # Errors
    ///
    /// [`Error::NoTimestampColumn`] if the table has no temporal column.
    pub async fn register_dataset(&self, name: &str, table: &Table) -> Result<Dataset> {
        let dataset = Dataset::from_table(table, name)?;
        if !dataset.conditions.is_empty() {
            info!(
                "Dataset {} has irregular timestamps: {:?}",
                name, dataset.conditions
            );
        }
        self.metadata.insert_dataset(dataset).await
    }

    /// Validate and persist a new operation set
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the dataset does not exist,
    /// [`Error::UnknownSeries`] if a requested series is not one of its
    /// series columns, [`Error::InvalidRange`] for a malformed range.
    pub async fn create_operation_set(&self, opset: OperationSet) -> Result<OperationSet> {
        opset.validate()?;
        let dataset = self.metadata.get_dataset(&opset.dataset_id).await?;
        selected_series(&dataset, &opset.series_ids)?;
        self.metadata.insert_operation_set(opset).await
    }

    /// Delete a dataset, its operation sets, and every cache entry they own
    pub async fn delete_dataset(&self, dataset_id: &str) -> Result<Vec<OperationSet>> {
        let removed = self.metadata.delete_dataset(dataset_id).await?;
        self.cache
            .evict_dataset(dataset_id, removed.iter().map(|o| o.id.as_str()))
            .await;
        info!(
            "Deleted dataset {} and {} operation sets",
            dataset_id,
            removed.len()
        );
        Ok(removed)
    }

    /// Delete an operation set and its cache entry
    pub async fn delete_operation_set(&self, opset_id: &str) -> Result<OperationSet> {
        let removed = self.metadata.delete_operation_set(opset_id).await?;
        self.cache
            .delete(&crate::cache::CacheKey::opset(opset_id))
            .await;
        Ok(removed)
    }

    /// Request for `series_id` with the configured default horizon
    pub fn forecast_request(&self, opset_id: &str, series_id: &str) -> ForecastRequest {
        ForecastRequest {
            horizon: self.default_horizon,
            ..ForecastRequest::new(opset_id, series_id)
        }
    }

    /// Forecast one series of an operation set's aggregated view
    ///
    /// # Errors
    ///
    /// [`Error::FrequencyIndeterminate`] when the aggregated timestamps have
    /// no dominant spacing, [`Error::UnknownSeries`] for a series the dataset
    /// does not have, and [`Error::Forecast`] when the model fails.
    pub async fn forecast(&self, request: &ForecastRequest) -> Result<ForecastResponse> {
        let (opset, dataset) = self.resolve_records(&request.opset_id).await?;
        let tscol = dataset.tscol()?;
        let series = selected_series(&dataset, std::slice::from_ref(&request.series_id))?;

        let table = self
            .aggregated(&opset, tscol, &series)
            .await?
            .ok_or_else(|| Error::Forecast(format!("operation set {} has no rows", opset.id)))?;

        let timestamps = table.temporal_values(tscol)?;
        let column = table.column(&request.series_id)?;
        let values = column
            .as_numeric()
            .ok_or_else(|| crate::error::TableError::ColumnTypeMismatch {
                column: request.series_id.clone(),
                expected: ColumnType::Numeric.to_string(),
                actual: column.column_type().to_string(),
            })?;

        let records = forecast(self.model.as_ref(), values, timestamps, request.horizon)?;

        let metadata = HashMap::from([
            ("opset_id".to_string(), opset.id.clone()),
            ("series_id".to_string(), request.series_id.clone()),
            ("observations".to_string(), table.num_rows().to_string()),
        ]);

        Ok(ForecastResponse {
            forecast: records,
            metadata,
            model: self.model.name().to_string(),
            model_version: self.model.version().to_string(),
            error: None,
        })
    }

    async fn resolve_records(&self, opset_id: &str) -> Result<(OperationSet, Dataset)> {
        let opset = self.metadata.get_operation_set(opset_id).await?;
        let dataset = self.metadata.get_dataset(&opset.dataset_id).await?;
        Ok((opset, dataset))
    }

    /// Resolved slice projected to timestamp + series and aggregated; `None` if empty
    async fn aggregated(
        &self,
        opset: &OperationSet,
        tscol: &str,
        series: &[String],
    ) -> Result<Option<Table>> {
        let slice = self.cache.resolve(opset, self.loader.as_ref()).await?;
        if slice.is_empty() {
            return Ok(None);
        }

        let mut names: Vec<&str> = Vec::with_capacity(series.len() + 1);
        names.push(tscol);
        names.extend(series.iter().map(String::as_str));
        let projected = slice.project(&names)?;

        Ok(Some(self.aggregator.aggregate(&projected, tscol)?))
    }
}

/// Requested series, or every series column when none are named
fn selected_series(dataset: &Dataset, requested: &[String]) -> Result<Vec<String>> {
    if requested.is_empty() {
        return Ok(dataset.series_cols.clone());
    }
    for series in requested {
        if !dataset.has_series(series) {
            return Err(Error::UnknownSeries {
                dataset_id: dataset.id.clone(),
                series: series.clone(),
            });
        }
    }
    Ok(requested.to_vec())
}
