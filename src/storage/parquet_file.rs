//! Parquet-backed dataset loader
//!
//! Arrow types are folded into the three table column types:
//!
//! | Arrow type                          | Column type | Conversion            |
//! |-------------------------------------|-------------|-----------------------|
//! | integers, floats, decimals          | numeric     | cast to `Float64`     |
//! | `Date32`, `Date64`, `Timestamp(*)`  | temporal    | microseconds, UTC     |
//! | anything else                       | other       | cast to `Utf8`        |

use super::DatasetLoader;
use crate::error::{Error, Result, TableError};
use crate::metadata::MetadataStore;
use crate::table::{Column, ColumnData, ColumnType, Table};
use arrow::array::{Array, ArrayRef, Float64Array, StringArray, TimestampMicrosecondArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, TimeUnit};
use async_trait::async_trait;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Loads `{data_dir}/{file_name}` for a dataset
///
/// The file name comes from the dataset's metadata record. Decoding runs on
/// Tokio's blocking pool so request tasks are never stalled by file IO.
pub struct ParquetDatasetLoader {
    metadata: Arc<dyn MetadataStore>,
    data_dir: PathBuf,
}

impl ParquetDatasetLoader {
    /// Create a loader rooted at `data_dir`
    pub fn new(metadata: Arc<dyn MetadataStore>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            metadata,
            data_dir: data_dir.into(),
        }
    }

    /// Directory holding the dataset files
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[async_trait]
impl DatasetLoader for ParquetDatasetLoader {
    async fn load(&self, dataset_id: &str) -> Result<Table> {
        let dataset = self.metadata.get_dataset(dataset_id).await?;
        let path = self.data_dir.join(&dataset.file_name);
        let start = Instant::now();

        debug!("Loading dataset {} from {}", dataset_id, path.display());
        let read_path = path.clone();
        let table = tokio::task::spawn_blocking(move || read_parquet(&read_path))
            .await
            .map_err(|e| Error::DurableLoadFailed {
                dataset_id: dataset_id.to_string(),
                reason: format!("loader task failed: {}", e),
            })?
            .map_err(|e| Error::DurableLoadFailed {
                dataset_id: dataset_id.to_string(),
                reason: format!("{}: {}", path.display(), e),
            })?;

        let table = match dataset.tscol() {
            Ok(ts) => table.with_timestamp_column(ts)?,
            Err(_) => table,
        };

        info!(
            "Loaded dataset {} ({} rows, {} columns) in {:?}",
            dataset_id,
            table.num_rows(),
            table.num_columns(),
            start.elapsed()
        );
        Ok(table)
    }
}

/// Read a whole Parquet file into a [`Table`]
pub fn read_parquet(path: &Path) -> Result<Table> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(conversion)?;
    let schema = builder.schema().clone();
    let reader = builder.build().map_err(conversion)?;

    let mut data: Vec<ColumnData> = schema
        .fields()
        .iter()
        .map(|field| match classify(field.data_type()) {
            ColumnType::Numeric => ColumnData::Numeric(Vec::new()),
            ColumnType::Temporal => ColumnData::Temporal(Vec::new()),
            ColumnType::Other => ColumnData::Other(Vec::new()),
        })
        .collect();

    for batch in reader {
        let batch = batch.map_err(conversion)?;
        for (column, array) in data.iter_mut().zip(batch.columns()) {
            append(column, array)?;
        }
    }

    let columns = schema
        .fields()
        .iter()
        .zip(data)
        .map(|(field, values)| Column::new(field.name().clone(), values))
        .collect();
    Ok(Table::new(columns)?)
}

/// Column type an Arrow type is loaded as
pub fn classify(data_type: &DataType) -> ColumnType {
    match data_type {
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _) => ColumnType::Temporal,
        dt if dt.is_numeric() => ColumnType::Numeric,
        _ => ColumnType::Other,
    }
}

fn conversion(e: impl std::fmt::Display) -> TableError {
    TableError::Conversion(e.to_string())
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, expected: &str) -> std::result::Result<&'a T, TableError> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        TableError::Conversion(format!(
            "expected {} array, found {}",
            expected,
            array.data_type()
        ))
    })
}

fn append(column: &mut ColumnData, array: &ArrayRef) -> std::result::Result<(), TableError> {
    match column {
        ColumnData::Numeric(values) => {
            let array = cast(array, &DataType::Float64).map_err(conversion)?;
            values.extend(downcast::<Float64Array>(&array, "Float64")?.iter());
        },
        ColumnData::Temporal(values) => {
            // Keep the zone so the instants are not shifted to wall-clock time
            let target = match array.data_type() {
                DataType::Timestamp(_, tz) => DataType::Timestamp(TimeUnit::Microsecond, tz.clone()),
                _ => DataType::Timestamp(TimeUnit::Microsecond, None),
            };
            let array = cast(array, &target).map_err(conversion)?;
            values.extend(downcast::<TimestampMicrosecondArray>(&array, "Timestamp")?.iter());
        },
        ColumnData::Other(values) => {
            let array = cast(array, &DataType::Utf8).map_err(conversion)?;
            values.extend(
                downcast::<StringArray>(&array, "Utf8")?
                    .iter()
                    .map(|v| v.map(str::to_string)),
            );
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadataStore;
    use crate::model::Dataset;
    use arrow::array::{BooleanArray, Date32Array, Int64Array, TimestampMillisecondArray};
    use arrow::datatypes::{Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;

    fn write_sample(path: &Path) {
        let schema = Arc::new(Schema::new(vec![
            Field::new("ts", DataType::Timestamp(TimeUnit::Millisecond, None), true),
            Field::new("reading", DataType::Int64, true),
            Field::new("day", DataType::Date32, true),
            Field::new("site", DataType::Utf8, true),
            Field::new("ok", DataType::Boolean, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(TimestampMillisecondArray::from(vec![Some(1_000), Some(2_000), None])),
                Arc::new(Int64Array::from(vec![Some(7), None, Some(-2)])),
                Arc::new(Date32Array::from(vec![Some(0), Some(1), Some(2)])),
                Arc::new(StringArray::from(vec![Some("n"), Some("s"), None])),
                Arc::new(BooleanArray::from(vec![Some(true), Some(false), None])),
            ],
        )
        .unwrap();

        let file = File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_read_parquet_classifies_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.parquet");
        write_sample(&path);

        let table = read_parquet(&path).unwrap();
        assert_eq!(
            table.schema(),
            vec![
                ("ts", ColumnType::Temporal),
                ("reading", ColumnType::Numeric),
                ("day", ColumnType::Temporal),
                ("site", ColumnType::Other),
                ("ok", ColumnType::Other),
            ]
        );
        assert_eq!(
            table.temporal_values("ts").unwrap(),
            &[Some(1_000_000), Some(2_000_000), None]
        );
        assert_eq!(
            table.temporal_values("day").unwrap(),
            &[Some(0), Some(86_400_000_000), Some(172_800_000_000)]
        );
        assert_eq!(
            table.column("reading").unwrap().as_numeric().unwrap(),
            &[Some(7.0), None, Some(-2.0)]
        );
        assert_eq!(
            table.column("ok").unwrap().as_other().unwrap(),
            &[Some("true".to_string()), Some("false".to_string()), None]
        );
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_parquet(&dir.path().join("absent.parquet")),
            Err(Error::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_loader_resolves_file_from_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(&dir.path().join("sensors.parquet"));

        let metadata = Arc::new(InMemoryMetadataStore::new());
        let table = read_parquet(&dir.path().join("sensors.parquet")).unwrap();
        let dataset = metadata
            .insert_dataset(Dataset::from_table(&table, "sensors").unwrap())
            .await
            .unwrap();

        let loader = ParquetDatasetLoader::new(metadata.clone(), dir.path());
        let loaded = loader.load(&dataset.id).await.unwrap();
        assert_eq!(loaded.num_rows(), 3);
        assert_eq!(loaded.timestamp_column_name(), Some("ts"));

        // Metadata says the file exists but it has gone missing
        std::fs::remove_file(dir.path().join("sensors.parquet")).unwrap();
        assert!(matches!(
            loader.load(&dataset.id).await,
            Err(Error::DurableLoadFailed { .. })
        ));
    }
}
