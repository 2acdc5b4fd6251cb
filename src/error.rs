//! Error types for tsview

use std::time::Duration;
use thiserror::Error;

/// Main error type
///
/// Cache transport failures ([`StoreError`]) never reach callers through this
/// type; the view cache degrades them to a miss. Domain failures are returned
/// as-is, one variant per failure an API layer maps to a status.
#[derive(Error, Debug)]
pub enum Error {
    /// No dominant spacing could be established for a timestamp column
    #[error("Unable to infer frequency: {distinct_deltas} distinct deltas and no dominant spacing")]
    FrequencyIndeterminate {
        /// Number of distinct consecutive deltas observed
        distinct_deltas: usize,
    },

    /// Requested row range does not lie inside the cached one
    #[error(
        "Range [{offset}, +{limit}) is not contained in [{prior_offset}, +{prior_limit})"
    )]
    RangeNotContained {
        /// Offset of the range already cached
        prior_offset: i64,
        /// Limit of the range already cached
        prior_limit: i64,
        /// Requested offset
        offset: i64,
        /// Requested limit
        limit: i64,
    },

    /// Dataset schema has no temporal column
    #[error("No timestamp columns found")]
    NoTimestampColumn,

    /// Cache store could not be reached
    #[error("Cache store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Raw data could not be read from durable storage
    #[error("Failed to load dataset {dataset_id}: {reason}")]
    DurableLoadFailed {
        /// Dataset that was being loaded
        dataset_id: String,
        /// Description of the failure
        reason: String,
    },

    /// Computed bucket width truncated to zero seconds
    #[error("Bucket width is zero (timestamps span {span_us}us across {max_points} points)")]
    ZeroBucketWidth {
        /// Span between first and last timestamp in microseconds
        span_us: i64,
        /// Requested point budget
        max_points: usize,
    },

    /// First and last timestamps are too far apart to measure in microseconds
    #[error("Timestamp span from {first_us}us to {last_us}us overflows")]
    SpanOverflow {
        /// Earliest timestamp in microseconds
        first_us: i64,
        /// Latest timestamp in microseconds
        last_us: i64,
    },

    /// Aggregation was asked to work on a table with no rows
    #[error("Cannot aggregate an empty table")]
    EmptyTable,

    /// Point budget must be at least one
    #[error("Point budget must be greater than zero")]
    InvalidPointBudget,

    /// Offset/limit pair is out of bounds
    #[error("Invalid row range: offset {offset}, limit {limit}")]
    InvalidRange {
        /// Requested offset
        offset: i64,
        /// Requested limit
        limit: i64,
    },

    /// A metadata record does not exist
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind ("dataset", "operation set")
        kind: &'static str,
        /// Record identifier
        id: String,
    },

    /// Series requested that the dataset does not provide
    #[error("Unknown series {series} in dataset {dataset_id}")]
    UnknownSeries {
        /// Dataset identifier
        dataset_id: String,
        /// Series column name
        series: String,
    },

    /// Table shape, column or encoding error
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    /// Forecasting failed
    #[error("Forecast error: {0}")]
    Forecast(String),

    /// Metadata store failure
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Table construction, access and encoding errors
#[derive(Error, Debug)]
pub enum TableError {
    /// Column does not exist
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Column exists but has the wrong type
    #[error("Column {column} has type {actual}, expected {expected}")]
    ColumnTypeMismatch {
        /// Column name
        column: String,
        /// Required type
        expected: String,
        /// Actual type
        actual: String,
    },

    /// Column length differs from the table's row count
    #[error("Column {column} has {actual} rows, expected {expected}")]
    LengthMismatch {
        /// Column name
        column: String,
        /// Row count of the table
        expected: usize,
        /// Row count of the column
        actual: usize,
    },

    /// Two columns share a name
    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),

    /// Encoded table is malformed
    #[error("Corrupted data: {0}")]
    Corrupted(String),

    /// Encoded table failed checksum verification
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum stored in the frame
        expected: u64,
        /// Checksum computed over the payload
        actual: u64,
    },

    /// Encoded table uses an unknown format version
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// Source file could not be converted into a table
    #[error("Conversion error: {0}")]
    Conversion(String),
}

/// Cache store transport errors
///
/// Never surfaced past the view cache; logged and treated as a miss or no-op.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Connection or command failure
    #[error("{0}")]
    Unavailable(String),

    /// Command did not complete within its deadline
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
