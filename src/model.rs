//! Persisted records and response shapes
//!
//! - **`Dataset`**: schema classification of an ingested table
//! - **`OperationSet`**: a persisted query descriptor (dataset, series, row range)
//! - **`OperationSetUpdate`**: in-place change to an operation set
//! - **`TimeSeriesView`**: the projected, aggregated rows returned for a query
//! - **`ForecastRequest`** / **`ForecastResponse`**: forecast exchange shapes

use crate::error::{Error, Result};
use crate::frequency::{classify_irregularities, Irregularity};
use crate::table::{micros_to_datetime, ColumnType, Table};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Default number of rows an operation set covers
pub const DEFAULT_LIMIT: i64 = 1000;

/// Raw-row range `[offset, offset + limit)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowRange {
    /// First row
    pub offset: i64,
    /// Number of rows
    pub limit: i64,
}

impl RowRange {
    /// Create a range
    pub fn new(offset: i64, limit: i64) -> Self {
        Self { offset, limit }
    }

    /// One past the last row
    pub fn end(&self) -> i64 {
        self.offset.saturating_add(self.limit)
    }

    /// Reject negative offsets and empty or negative limits
    pub fn validate(&self) -> Result<()> {
        if self.offset < 0 || self.limit <= 0 {
            return Err(Error::InvalidRange {
                offset: self.offset,
                limit: self.limit,
            });
        }
        Ok(())
    }

    /// Offset and limit as slice bounds
    pub(crate) fn as_slice_bounds(&self) -> Result<(usize, usize)> {
        self.validate()?;
        let offset = usize::try_from(self.offset).map_err(|_| Error::InvalidRange {
            offset: self.offset,
            limit: self.limit,
        })?;
        let limit = usize::try_from(self.limit).map_err(|_| Error::InvalidRange {
            offset: self.offset,
            limit: self.limit,
        })?;
        Ok((offset, limit))
    }
}

/// Schema classification and identity of an ingested dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Dataset identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Number of numeric (series) columns
    pub num_series: usize,
    /// Row count at ingestion
    pub max_length: usize,
    /// Numeric columns
    #[serde(default)]
    pub series_cols: Vec<String>,
    /// Temporal columns
    #[serde(default)]
    pub timestamp_cols: Vec<String>,
    /// Remaining columns
    #[serde(default)]
    pub other_cols: Vec<String>,
    /// File holding the durable columnar copy
    pub file_name: String,
    /// Irregularities of the primary timestamp column
    #[serde(default)]
    pub conditions: Vec<Irregularity>,
}

impl Dataset {
    /// Classify the columns of `table` into series, timestamp and other
    ///
    /// # Errors
    ///
    /// [`Error::NoTimestampColumn`] if the table has no temporal column.
    pub fn from_table(table: &Table, name: &str) -> Result<Self> {
        let mut series_cols = Vec::new();
        let mut timestamp_cols = Vec::new();
        let mut other_cols = Vec::new();

        for (column, column_type) in table.schema() {
            match column_type {
                ColumnType::Numeric => series_cols.push(column.to_string()),
                ColumnType::Temporal => timestamp_cols.push(column.to_string()),
                ColumnType::Other => other_cols.push(column.to_string()),
            }
        }

        let primary = timestamp_cols.first().ok_or(Error::NoTimestampColumn)?;
        let conditions = classify_irregularities(table.temporal_values(primary)?);

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: String::new(),
            num_series: series_cols.len(),
            max_length: table.num_rows(),
            series_cols,
            timestamp_cols,
            other_cols,
            file_name: format!("{}.parquet", name),
            conditions,
        })
    }

    /// Primary timestamp column
    pub fn tscol(&self) -> Result<&str> {
        self.timestamp_cols
            .first()
            .map(String::as_str)
            .ok_or(Error::NoTimestampColumn)
    }

    /// Whether `name` is one of this dataset's series columns
    pub fn has_series(&self, name: &str) -> bool {
        self.series_cols.iter().any(|c| c == name)
    }
}

fn default_limit() -> i64 {
    DEFAULT_LIMIT
}

/// Persisted query descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSet {
    /// Stable identifier, unchanged by updates
    pub id: String,
    /// Owning dataset
    pub dataset_id: String,
    /// Requested series columns; empty selects every series column
    #[serde(default, alias = "plot")]
    pub series_ids: Vec<String>,
    /// First raw row
    #[serde(default)]
    pub offset: i64,
    /// Number of raw rows
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Operation set this one derives from
    #[serde(default)]
    pub dependent: Option<String>,
}

impl OperationSet {
    /// New operation set over the first [`DEFAULT_LIMIT`] rows
    pub fn new(dataset_id: impl Into<String>, series_ids: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            dataset_id: dataset_id.into(),
            series_ids,
            offset: 0,
            limit: DEFAULT_LIMIT,
            dependent: None,
        }
    }

    /// Set the row range
    pub fn with_range(mut self, offset: i64, limit: i64) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// Set the operation set this one derives from
    pub fn with_dependent(mut self, dependent: impl Into<String>) -> Self {
        self.dependent = Some(dependent.into());
        self
    }

    /// Current row range
    pub fn range(&self) -> RowRange {
        RowRange::new(self.offset, self.limit)
    }

    /// Reject invalid row ranges
    pub fn validate(&self) -> Result<()> {
        self.range().validate()
    }

    /// Copy of this operation set with `update` applied
    pub fn apply(&self, update: &OperationSetUpdate) -> Result<Self> {
        let mut next = self.clone();
        if let Some(offset) = update.offset {
            next.offset = offset;
        }
        if let Some(limit) = update.limit {
            next.limit = limit;
        }
        if let Some(series_ids) = &update.series_ids {
            next.series_ids = series_ids.clone();
        }
        next.validate()?;
        Ok(next)
    }
}

/// In-place change to an operation set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSetUpdate {
    /// New first row
    #[serde(default)]
    pub offset: Option<i64>,
    /// New row count
    #[serde(default)]
    pub limit: Option<i64>,
    /// New series selection
    #[serde(default)]
    pub series_ids: Option<Vec<String>>,
}

impl OperationSetUpdate {
    /// Update that moves the row range
    pub fn range(offset: i64, limit: i64) -> Self {
        Self {
            offset: Some(offset),
            limit: Some(limit),
            series_ids: None,
        }
    }
}

/// One timestamped row of named values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRecord {
    /// Row timestamp
    pub timestamp: DateTime<Utc>,
    /// Values keyed by series name
    pub data: BTreeMap<String, Option<f64>>,
}

/// Aggregated, projected rows answering an operation set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesView {
    /// Operation set identifier
    pub id: String,
    /// Dataset name
    pub name: String,
    /// Rows in ascending time order
    pub records: Vec<TimeRecord>,
}

impl TimeSeriesView {
    /// Build a view from the timestamp and series columns of `table`
    ///
    /// Rows whose timestamp is null or out of range are skipped.
    pub fn from_table(
        id: &str,
        name: &str,
        table: &Table,
        timestamp_col: &str,
        series: &[String],
    ) -> Result<Self> {
        let timestamps = table.temporal_values(timestamp_col)?;
        let mut columns = Vec::with_capacity(series.len());
        for s in series {
            let column = table.column(s)?;
            let values = column.as_numeric().ok_or_else(|| {
                crate::error::TableError::ColumnTypeMismatch {
                    column: s.clone(),
                    expected: ColumnType::Numeric.to_string(),
                    actual: column.column_type().to_string(),
                }
            })?;
            columns.push((s, values));
        }

        let records = timestamps
            .iter()
            .enumerate()
            .filter_map(|(row, ts)| {
                let timestamp = ts.and_then(micros_to_datetime)?;
                let data = columns
                    .iter()
                    .map(|(name, values)| ((*name).clone(), values[row]))
                    .collect();
                Some(TimeRecord { timestamp, data })
            })
            .collect();

        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            records,
        })
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the view has no rows
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn default_horizon() -> usize {
    10
}

fn default_model() -> String {
    "default".to_string()
}

fn default_model_version() -> String {
    "1.0.0".to_string()
}

/// Forecast request for one series of an operation set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastRequest {
    /// Operation set to forecast from
    pub opset_id: String,
    /// Series column
    pub series_id: String,
    /// Number of future steps
    #[serde(default = "default_horizon")]
    pub horizon: usize,
    /// Model name
    #[serde(default = "default_model")]
    pub model: String,
    /// Model version
    #[serde(default = "default_model_version")]
    pub model_version: String,
}

impl ForecastRequest {
    /// Request with default horizon and model
    pub fn new(opset_id: impl Into<String>, series_id: impl Into<String>) -> Self {
        Self {
            opset_id: opset_id.into(),
            series_id: series_id.into(),
            horizon: default_horizon(),
            model: default_model(),
            model_version: default_model_version(),
        }
    }
}

/// Forecast result; each record carries `point`, `lower` and `upper`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResponse {
    /// Future rows
    pub forecast: Vec<TimeRecord>,
    /// Extra information about the run
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Model name
    pub model: String,
    /// Model version
    pub model_version: String,
    /// Error description, when the forecast could not be produced
    #[serde(default)]
    pub error: Option<String>,
}
