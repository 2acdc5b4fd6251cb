//! Range aggregation - bounded downsampling for views and charts
//!
//! Collapses a table into at most `max_points` rows by grouping rows into
//! consecutive, left-closed time windows of a fixed width and averaging the
//! numeric columns of each window.
//!
//! # Window width
//!
//! - **Known frequency**: `ceil(rows / max_points) * frequency`, so each
//!   window holds a whole number of samples.
//! - **Irregular series**: `(last - first) / max_points`, which always
//!   terminates with a bounded output even when no frequency exists.
//!
//! Both are truncated to whole seconds. A width that truncates to zero is
//! rejected. If truncation would leave more windows than the budget allows,
//! the width is widened to the smallest whole-second width that fits.
//!
//! Windows start at the first timestamp; each output row is stamped with its
//! window's start. Numeric columns are averaged ignoring nulls, other columns
//! carry the first value in the window.

use crate::error::{Error, Result};
use crate::frequency::infer_frequency;
use crate::table::{Column, ColumnData, Table};
use chrono::Duration;
use tracing::debug;

const MICROS_PER_SECOND: i64 = 1_000_000;

/// How the window width was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidthSource {
    /// From the inferred sampling frequency
    Frequency(Duration),
    /// From the span of the timestamps (frequency undetermined)
    Span,
}

/// Window layout chosen for a timestamp column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketPlan {
    /// First timestamp (microseconds); window 0 starts here
    pub origin: i64,
    /// Window width in whole seconds
    pub width_secs: i64,
    /// How the width was derived
    pub source: WidthSource,
}

impl BucketPlan {
    /// Window width as a duration
    pub fn width(&self) -> Duration {
        Duration::seconds(self.width_secs)
    }

    /// Window index of a timestamp
    fn window_of(&self, ts: i64) -> i64 {
        (ts - self.origin) / (self.width_secs * MICROS_PER_SECOND)
    }

    /// Start of a window in microseconds
    fn window_start(&self, window: i64) -> i64 {
        self.origin + window * self.width_secs * MICROS_PER_SECOND
    }
}

/// Choose the window width for ascending, non-null timestamps
///
/// # Errors
///
/// - [`Error::InvalidPointBudget`] if `max_points` is zero
/// - [`Error::EmptyTable`] if `sorted` is empty
/// - [`Error::ZeroBucketWidth`] if the width truncates to zero seconds
/// - [`Error::SpanOverflow`] if the span does not fit in an `i64`
pub fn plan_buckets(sorted: &[i64], max_points: usize) -> Result<BucketPlan> {
    if max_points == 0 {
        return Err(Error::InvalidPointBudget);
    }
    let (origin, last) = match (sorted.first(), sorted.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Err(Error::EmptyTable),
    };
    let span = last.checked_sub(origin).ok_or(Error::SpanOverflow {
        first_us: origin,
        last_us: last,
    })?;
    let budget = i64::try_from(max_points).unwrap_or(i64::MAX);

    let timestamps: Vec<Option<i64>> = sorted.iter().map(|t| Some(*t)).collect();
    let (width_us, source) = match infer_frequency(&timestamps) {
        Ok(freq) => {
            let points_per_window = sorted.len().div_ceil(max_points) as i64;
            let freq_us = freq.num_microseconds().unwrap_or(i64::MAX);
            (
                points_per_window.saturating_mul(freq_us),
                WidthSource::Frequency(freq),
            )
        },
        Err(Error::FrequencyIndeterminate { .. }) => (span / budget, WidthSource::Span),
        Err(e) => return Err(e),
    };

    let width_secs = width_us / MICROS_PER_SECOND;
    if width_secs <= 0 {
        return Err(Error::ZeroBucketWidth {
            span_us: span,
            max_points,
        });
    }

    // floor(span / width) must stay below the budget
    let min_width_secs = span / budget.saturating_mul(MICROS_PER_SECOND) + 1;
    if width_secs < min_width_secs {
        debug!(
            width_secs,
            min_width_secs, "Widening aggregation window to respect point budget"
        );
    }

    Ok(BucketPlan {
        origin,
        width_secs: width_secs.max(min_width_secs),
        source,
    })
}

/// Aggregate `table` into at most `max_points` rows by time window
///
/// Tables that already fit the budget are returned unchanged. The output is
/// sorted ascending by `timestamp_col`; rows with a null timestamp are
/// dropped.
///
/// # Errors
///
/// - [`Error::InvalidPointBudget`] for a zero budget
/// - [`Error::EmptyTable`] for a table with no rows (or no timestamped rows)
/// - [`Error::Table`] if `timestamp_col` is missing or not temporal
/// - [`Error::ZeroBucketWidth`] if the windows would have zero width
///
/// # Example
///
/// ```rust
/// use tsview::aggregate::aggregate;
/// use tsview::table::{Column, Table};
///
/// let minute = 60_000_000;
/// let table = Table::new(vec![
///     Column::temporal("ts", (0..100).map(|i| Some(i * minute)).collect()),
///     Column::numeric("v", (0..100).map(|i| Some(i as f64)).collect()),
/// ])
/// .unwrap();
///
/// let out = aggregate(&table, "ts", 10).unwrap();
/// assert_eq!(out.num_rows(), 10);
/// ```
pub fn aggregate(table: &Table, timestamp_col: &str, max_points: usize) -> Result<Table> {
    if max_points == 0 {
        return Err(Error::InvalidPointBudget);
    }
    if table.is_empty() {
        return Err(Error::EmptyTable);
    }
    table.temporal_values(timestamp_col)?;

    if table.num_rows() <= max_points {
        return Ok(table.clone());
    }

    let sorted = table.sort_by(timestamp_col)?;
    let ts: Vec<i64> = sorted
        .temporal_values(timestamp_col)?
        .iter()
        .map_while(|t| *t)
        .collect();

    let plan = plan_buckets(&ts, max_points)?;

    // Row ranges of each non-empty window
    let mut windows: Vec<(i64, usize, usize)> = Vec::new();
    let mut start = 0;
    for i in 1..=ts.len() {
        if i == ts.len() || plan.window_of(ts[i]) != plan.window_of(ts[start]) {
            windows.push((plan.window_of(ts[start]), start, i));
            start = i;
        }
    }

    debug!(
        rows = table.num_rows(),
        windows = windows.len(),
        width_secs = plan.width_secs,
        "Aggregated table"
    );

    let columns = sorted
        .columns()
        .iter()
        .map(|column| {
            if column.name() == timestamp_col {
                let starts = windows
                    .iter()
                    .map(|(w, _, _)| Some(plan.window_start(*w)))
                    .collect();
                return Column::temporal(column.name(), starts);
            }
            Column::new(column.name(), reduce(column.data(), &windows))
        })
        .collect();

    Ok(Table::new(columns)?.with_timestamp_column(timestamp_col)?)
}

/// Mean of numeric values per window, first value for everything else
fn reduce(data: &ColumnData, windows: &[(i64, usize, usize)]) -> ColumnData {
    match data {
        ColumnData::Numeric(v) => ColumnData::Numeric(
            windows
                .iter()
                .map(|(_, start, end)| mean(&v[*start..*end]))
                .collect(),
        ),
        ColumnData::Temporal(v) => {
            ColumnData::Temporal(windows.iter().map(|(_, start, _)| v[*start]).collect())
        },
        ColumnData::Other(v) => ColumnData::Other(
            windows
                .iter()
                .map(|(_, start, _)| v[*start].clone())
                .collect(),
        ),
    }
}

fn mean(values: &[Option<f64>]) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Aggregator bound to a fixed point budget
#[derive(Debug, Clone, Copy)]
pub struct RangeAggregator {
    max_points: usize,
}

impl RangeAggregator {
    /// Create an aggregator with the given point budget
    pub fn new(max_points: usize) -> Self {
        Self { max_points }
    }

    /// Point budget
    pub fn max_points(&self) -> usize {
        self.max_points
    }

    /// Aggregate `table` by `timestamp_col` within this budget
    pub fn aggregate(&self, table: &Table, timestamp_col: &str) -> Result<Table> {
        aggregate(table, timestamp_col, self.max_points)
    }
}

// ============================================================================
// Tests
// ============================================================================
