//! Typed columnar tables
//!
//! A [`Table`] is an ordered set of equally long, homogeneously typed columns.
//! Every column carries a [`ColumnType`] tag that is fixed when the column is
//! built, so consumers check the type once instead of per value.
//!
//! # Key Types
//!
//! - **`ColumnType`**: numeric, temporal or other (opaque/string)
//! - **`ColumnData`**: the typed values of one column, with nulls
//! - **`Column`**: a named `ColumnData`
//! - **`Table`**: immutable, cheaply clonable collection of columns
//!
//! Temporal values are microseconds since the Unix epoch in UTC.
//!
//! Tables are value-like. Clones share column storage behind an `Arc`, and
//! every transformation (`slice`, `project`, `sort_by`, `take`) builds a new
//! table, so a table held by a cache entry can never be mutated through
//! another handle.
//!
//! # Example
//!
//! ```rust
//! use tsview::table::{Column, Table};
//!
//! let table = Table::new(vec![
//!     Column::temporal("timestamp", vec![Some(0), Some(1_000_000)]),
//!     Column::numeric("load", vec![Some(1.5), None]),
//! ])
//! .unwrap();
//!
//! assert_eq!(table.num_rows(), 2);
//! assert_eq!(table.timestamp_column_name(), Some("timestamp"));
//! ```

use crate::error::TableError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Column type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit floating point values (integers are widened on load)
    Numeric,
    /// Instants, microseconds since the Unix epoch (UTC)
    Temporal,
    /// Anything else, carried as text
    Other,
}

impl ColumnType {
    /// Stable one-byte tag used by the cache encoding
    pub fn tag(self) -> u8 {
        match self {
            ColumnType::Numeric => 1,
            ColumnType::Temporal => 2,
            ColumnType::Other => 3,
        }
    }

    /// Inverse of [`ColumnType::tag`]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ColumnType::Numeric),
            2 => Some(ColumnType::Temporal),
            3 => Some(ColumnType::Other),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Numeric => write!(f, "numeric"),
            ColumnType::Temporal => write!(f, "temporal"),
            ColumnType::Other => write!(f, "other"),
        }
    }
}

/// Typed column values
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// Numeric values
    Numeric(Vec<Option<f64>>),
    /// Timestamps in microseconds since the Unix epoch
    Temporal(Vec<Option<i64>>),
    /// Opaque values
    Other(Vec<Option<String>>),
}

impl ColumnData {
    /// Number of values (including nulls)
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Temporal(v) => v.len(),
            ColumnData::Other(v) => v.len(),
        }
    }

    /// Whether the column has no values
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Type tag of these values
    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnData::Numeric(_) => ColumnType::Numeric,
            ColumnData::Temporal(_) => ColumnType::Temporal,
            ColumnData::Other(_) => ColumnType::Other,
        }
    }

    /// Whether the value at `index` is null
    pub fn is_null(&self, index: usize) -> bool {
        match self {
            ColumnData::Numeric(v) => v[index].is_none(),
            ColumnData::Temporal(v) => v[index].is_none(),
            ColumnData::Other(v) => v[index].is_none(),
        }
    }

    fn range(&self, start: usize, end: usize) -> Self {
        match self {
            ColumnData::Numeric(v) => ColumnData::Numeric(v[start..end].to_vec()),
            ColumnData::Temporal(v) => ColumnData::Temporal(v[start..end].to_vec()),
            ColumnData::Other(v) => ColumnData::Other(v[start..end].to_vec()),
        }
    }

    fn gather(&self, indices: &[usize]) -> Self {
        match self {
            ColumnData::Numeric(v) => ColumnData::Numeric(indices.iter().map(|&i| v[i]).collect()),
            ColumnData::Temporal(v) => {
                ColumnData::Temporal(indices.iter().map(|&i| v[i]).collect())
            },
            ColumnData::Other(v) => {
                ColumnData::Other(indices.iter().map(|&i| v[i].clone()).collect())
            },
        }
    }
}

/// A named column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    data: ColumnData,
}

impl Column {
    /// Create a column from typed data
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Create a numeric column
    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self::new(name, ColumnData::Numeric(values))
    }

    /// Create a temporal column from microsecond timestamps
    pub fn temporal(name: impl Into<String>, values: Vec<Option<i64>>) -> Self {
        Self::new(name, ColumnData::Temporal(values))
    }

    /// Create an opaque (text) column
    pub fn other(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self::new(name, ColumnData::Other(values))
    }

    /// Column name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column values
    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    /// Column type
    pub fn column_type(&self) -> ColumnType {
        self.data.column_type()
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the column is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Numeric values, if this is a numeric column
    pub fn as_numeric(&self) -> Option<&[Option<f64>]> {
        match &self.data {
            ColumnData::Numeric(v) => Some(v),
            _ => None,
        }
    }

    /// Temporal values, if this is a temporal column
    pub fn as_temporal(&self) -> Option<&[Option<i64>]> {
        match &self.data {
            ColumnData::Temporal(v) => Some(v),
            _ => None,
        }
    }

    /// Opaque values, if this is an "other" column
    pub fn as_other(&self) -> Option<&[Option<String>]> {
        match &self.data {
            ColumnData::Other(v) => Some(v),
            _ => None,
        }
    }

    fn with_data(&self, data: ColumnData) -> Self {
        Self {
            name: self.name.clone(),
            data,
        }
    }
}

/// Immutable columnar table
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Arc<Vec<Column>>,
    num_rows: usize,
    /// Designated timestamp column; defaults to the first temporal column
    time_index: Option<usize>,
}

impl Table {
    /// Build a table, checking lengths and name uniqueness
    pub fn new(columns: Vec<Column>) -> Result<Self, TableError> {
        let num_rows = columns.first().map(Column::len).unwrap_or(0);
        let mut seen = HashSet::with_capacity(columns.len());

        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(TableError::DuplicateColumn(column.name.clone()));
            }
            if column.len() != num_rows {
                return Err(TableError::LengthMismatch {
                    column: column.name.clone(),
                    expected: num_rows,
                    actual: column.len(),
                });
            }
        }

        let time_index = columns
            .iter()
            .position(|c| c.column_type() == ColumnType::Temporal);

        Ok(Self {
            columns: Arc::new(columns),
            num_rows,
            time_index,
        })
    }

    /// Designate `name` as the timestamp column
    pub fn with_timestamp_column(mut self, name: &str) -> Result<Self, TableError> {
        let index = self.index_of(name)?;
        let column = &self.columns[index];
        if column.column_type() != ColumnType::Temporal {
            return Err(TableError::ColumnTypeMismatch {
                column: name.to_string(),
                expected: ColumnType::Temporal.to_string(),
                actual: column.column_type().to_string(),
            });
        }
        self.time_index = Some(index);
        Ok(self)
    }

    /// Number of rows
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Number of columns
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// All columns in order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column names in order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    /// Column names paired with their types
    pub fn schema(&self) -> Vec<(&str, ColumnType)> {
        self.columns
            .iter()
            .map(|c| (c.name(), c.column_type()))
            .collect()
    }

    /// Look up a column by name
    pub fn column(&self, name: &str) -> Result<&Column, TableError> {
        self.index_of(name).map(|i| &self.columns[i])
    }

    /// The designated timestamp column, if any
    pub fn timestamp_column(&self) -> Option<&Column> {
        self.time_index.map(|i| &self.columns[i])
    }

    /// Name of the designated timestamp column
    pub fn timestamp_column_name(&self) -> Option<&str> {
        self.timestamp_column().map(Column::name)
    }

    /// Index of the designated timestamp column
    pub(crate) fn timestamp_index(&self) -> Option<usize> {
        self.time_index
    }

    /// Temporal values of the named column
    pub fn temporal_values(&self, name: &str) -> Result<&[Option<i64>], TableError> {
        let column = self.column(name)?;
        column
            .as_temporal()
            .ok_or_else(|| TableError::ColumnTypeMismatch {
                column: name.to_string(),
                expected: ColumnType::Temporal.to_string(),
                actual: column.column_type().to_string(),
            })
    }

    /// Rows `[offset, offset + len)`, clamped to the table bounds
    pub fn slice(&self, offset: usize, len: usize) -> Table {
        let start = offset.min(self.num_rows);
        let end = start.saturating_add(len).min(self.num_rows);

        if start == 0 && end == self.num_rows {
            return self.clone();
        }

        let columns = self
            .columns
            .iter()
            .map(|c| c.with_data(c.data.range(start, end)))
            .collect();

        Table {
            columns: Arc::new(columns),
            num_rows: end - start,
            time_index: self.time_index,
        }
    }

    /// Keep only the named columns, in the given order
    ///
    /// The timestamp designation follows its column if it is kept.
    pub fn project(&self, names: &[&str]) -> Result<Table, TableError> {
        let designated = self.timestamp_column_name();
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            columns.push(self.column(name)?.clone());
        }

        let mut table = Table::new(columns)?;
        if let Some(ts) = designated {
            if names.contains(&ts) {
                table = table.with_timestamp_column(ts)?;
            }
        }
        Ok(table)
    }

    /// Stable ascending sort by a temporal or numeric column, nulls last
    pub fn sort_by(&self, name: &str) -> Result<Table, TableError> {
        let column = self.column(name)?;
        let mut indices: Vec<usize> = (0..self.num_rows).collect();

        match column.data() {
            ColumnData::Temporal(v) => indices.sort_by_key(|&i| (v[i].is_none(), v[i])),
            ColumnData::Numeric(v) => indices.sort_by(|&a, &b| match (v[a], v[b]) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }),
            ColumnData::Other(_) => {
                return Err(TableError::ColumnTypeMismatch {
                    column: name.to_string(),
                    expected: "numeric or temporal".to_string(),
                    actual: ColumnType::Other.to_string(),
                })
            },
        }

        if indices.windows(2).all(|w| w[0] < w[1]) {
            return Ok(self.clone());
        }
        Ok(self.take(&indices))
    }

    /// Gather rows by index
    ///
    /// # Panics
    ///
    /// Panics if an index is out of bounds.
    pub fn take(&self, indices: &[usize]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|c| c.with_data(c.data.gather(indices)))
            .collect();

        Table {
            columns: Arc::new(columns),
            num_rows: indices.len(),
            time_index: self.time_index,
        }
    }

    fn index_of(&self, name: &str) -> Result<usize, TableError> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| TableError::ColumnNotFound(name.to_string()))
    }
}

/// Build a table from parts that are already known to be consistent
///
/// Used by the codec, which validates lengths itself.
pub(crate) fn assemble(
    columns: Vec<Column>,
    num_rows: usize,
    time_index: Option<usize>,
) -> Result<Table, TableError> {
    if let Some(c) = columns.iter().find(|c| c.len() != num_rows) {
        return Err(TableError::LengthMismatch {
            column: c.name.clone(),
            expected: num_rows,
            actual: c.len(),
        });
    }
    if let Some(i) = time_index {
        match columns.get(i) {
            Some(c) if c.column_type() == ColumnType::Temporal => {},
            _ => {
                return Err(TableError::Corrupted(format!(
                    "timestamp column index {} is not a temporal column",
                    i
                )))
            },
        }
    }
    Ok(Table {
        columns: Arc::new(columns),
        num_rows,
        time_index,
    })
}

/// Convert microseconds since the epoch into a UTC instant
pub fn micros_to_datetime(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new(vec![
            Column::other("site", vec![Some("a".into()), Some("b".into()), None]),
            Column::temporal("ts", vec![Some(30), Some(10), Some(20)]),
            Column::numeric("v", vec![Some(3.0), Some(1.0), Some(2.0)]),
        ])
        .unwrap()
    }

    #[test]
    fn test_new_designates_first_temporal() {
        let table = sample();
        assert_eq!(table.num_rows(), 3);
        assert_eq!(table.timestamp_column_name(), Some("ts"));
        assert_eq!(
            table.schema(),
            vec![
                ("site", ColumnType::Other),
                ("ts", ColumnType::Temporal),
                ("v", ColumnType::Numeric)
            ]
        );
    }

    #[test]
    fn test_new_rejects_bad_shapes() {
        let result = Table::new(vec![
            Column::numeric("a", vec![Some(1.0)]),
            Column::numeric("b", vec![Some(1.0), Some(2.0)]),
        ]);
        assert!(matches!(result, Err(TableError::LengthMismatch { .. })));

        let result = Table::new(vec![
            Column::numeric("a", vec![Some(1.0)]),
            Column::numeric("a", vec![Some(2.0)]),
        ]);
        assert!(matches!(result, Err(TableError::DuplicateColumn(_))));
    }

    #[test]
    fn test_with_timestamp_column_requires_temporal() {
        let table = sample();
        assert!(matches!(
            table.clone().with_timestamp_column("v"),
            Err(TableError::ColumnTypeMismatch { .. })
        ));
        assert!(matches!(
            table.with_timestamp_column("nope"),
            Err(TableError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_slice_clamps() {
        let table = sample();
        let s = table.slice(1, 10);
        assert_eq!(s.num_rows(), 2);
        assert_eq!(s.temporal_values("ts").unwrap(), &[Some(10), Some(20)]);

        let empty = table.slice(5, 3);
        assert_eq!(empty.num_rows(), 0);
        assert_eq!(empty.num_columns(), 3);
    }

    #[test]
    fn test_slice_does_not_alias() {
        let table = sample();
        let whole = table.slice(0, 3);
        assert_eq!(whole, table);

        let part = table.slice(0, 2);
        assert_eq!(table.num_rows(), 3);
        assert_eq!(part.num_rows(), 2);
    }

    #[test]
    fn test_sort_by_is_stable_with_nulls_last() {
        let table = Table::new(vec![
            Column::temporal("ts", vec![Some(2), None, Some(1), Some(2)]),
            Column::numeric("v", vec![Some(0.0), Some(1.0), Some(2.0), Some(3.0)]),
        ])
        .unwrap();

        let sorted = table.sort_by("ts").unwrap();
        assert_eq!(
            sorted.temporal_values("ts").unwrap(),
            &[Some(1), Some(2), Some(2), None]
        );
        assert_eq!(
            sorted.column("v").unwrap().as_numeric().unwrap(),
            &[Some(2.0), Some(0.0), Some(3.0), Some(1.0)]
        );
    }

    #[test]
    fn test_sort_by_rejects_other() {
        assert!(sample().sort_by("site").is_err());
    }

    #[test]
    fn test_project_keeps_designation() {
        let table = sample();
        let projected = table.project(&["v", "ts"]).unwrap();
        assert_eq!(projected.column_names(), vec!["v", "ts"]);
        assert_eq!(projected.timestamp_column_name(), Some("ts"));

        let no_time = table.project(&["v"]).unwrap();
        assert_eq!(no_time.timestamp_column_name(), None);
    }

    #[test]
    fn test_micros_to_datetime() {
        let dt = micros_to_datetime(1_000_000).unwrap();
        assert_eq!(dt.timestamp(), 1);
    }
}
