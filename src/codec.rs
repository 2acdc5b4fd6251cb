//! Cache entry encoding
//!
//! Self-describing columnar binary format for tables stored in the view
//! cache. A frame carries the column names, types and row count, so a reader
//! needs nothing else to rebuild the table.
//!
//! # Frame layout
//!
//! ```text
//! +-------+---------+-------+----------+---------------------------+
//! | magic | version | flags | checksum | body (optionally LZ4)     |
//! | 4B    | 1B      | 1B    | 8B (LE)  | ...                       |
//! +-------+---------+-------+----------+---------------------------+
//!
//! body:
//!   has_range u8, [offset i64, limit i64]
//!   num_rows u64, num_columns u32, time_index u32 (u32::MAX = none)
//!   per column:
//!     name_len u32, name, type tag u8, validity bitmap (ceil(rows / 8))
//!     numeric:  rows x f64
//!     temporal: rows x i64 (microseconds)
//!     other:    rows x (len u64, utf-8 bytes)
//! ```
//!
//! All integers are little endian. The checksum is CRC-64-ECMA-182 over the
//! body exactly as stored (after compression).

use crate::error::TableError;
use crate::model::RowRange;
use crate::table::{self, Column, ColumnData, ColumnType, Table};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_64_ECMA_182};

/// Frame magic, "TSVW"
pub const MAGIC: [u8; 4] = *b"TSVW";

/// Current frame version
pub const VERSION: u8 = 2;

/// Flag bit: body is LZ4 compressed
pub const FLAG_LZ4: u8 = 0b0000_0001;

const HEADER_LEN: usize = 4 + 1 + 1 + 8;
const NO_TIME_INDEX: u32 = u32::MAX;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// A cached table and the raw-row range it was computed from
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Cached table
    pub table: Table,
    /// Raw-row range the table covers; `None` for whole-dataset entries
    pub source_range: Option<RowRange>,
}

impl CacheEntry {
    /// Entry for a whole dataset
    pub fn dataset(table: Table) -> Self {
        Self {
            table,
            source_range: None,
        }
    }

    /// Entry for a row range of a dataset
    pub fn ranged(table: Table, range: RowRange) -> Self {
        Self {
            table,
            source_range: Some(range),
        }
    }
}

/// Encode an entry into a frame
pub fn encode_entry(entry: &CacheEntry, compress: bool) -> Bytes {
    let body = encode_body(entry);
    let (flags, body) = if compress {
        (FLAG_LZ4, lz4_flex::compress_prepend_size(&body))
    } else {
        (0, body)
    };

    let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
    frame.put_slice(&MAGIC);
    frame.put_u8(VERSION);
    frame.put_u8(flags);
    frame.put_u64_le(CRC64.checksum(&body));
    frame.put_slice(&body);
    frame.freeze()
}

/// Decode a frame produced by [`encode_entry`]
pub fn decode_entry(frame: &[u8]) -> Result<CacheEntry, TableError> {
    if frame.len() < HEADER_LEN {
        return Err(TableError::Corrupted(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    }
    if frame[0..4] != MAGIC {
        return Err(TableError::Corrupted("bad magic".to_string()));
    }
    let version = frame[4];
    if version != VERSION {
        return Err(TableError::UnsupportedVersion(version));
    }
    let flags = frame[5];
    let expected = u64::from_le_bytes([
        frame[6], frame[7], frame[8], frame[9], frame[10], frame[11], frame[12], frame[13],
    ]);

    let stored = &frame[HEADER_LEN..];
    let actual = CRC64.checksum(stored);
    if actual != expected {
        return Err(TableError::ChecksumMismatch { expected, actual });
    }

    if flags & FLAG_LZ4 != 0 {
        let body = lz4_flex::decompress_size_prepended(stored)
            .map_err(|e| TableError::Corrupted(format!("lz4: {}", e)))?;
        decode_body(&body)
    } else {
        decode_body(stored)
    }
}

/// Encode a bare table (no source range)
pub fn encode_table(table: &Table, compress: bool) -> Bytes {
    encode_entry(&CacheEntry::dataset(table.clone()), compress)
}

/// Decode a bare table, discarding any source range
pub fn decode_table(frame: &[u8]) -> Result<Table, TableError> {
    decode_entry(frame).map(|entry| entry.table)
}

fn encode_body(entry: &CacheEntry) -> Vec<u8> {
    let table = &entry.table;
    let rows = table.num_rows();
    let mut buf = BytesMut::with_capacity(64 + rows * table.num_columns() * 9);

    match entry.source_range {
        Some(range) => {
            buf.put_u8(1);
            buf.put_i64_le(range.offset);
            buf.put_i64_le(range.limit);
        },
        None => buf.put_u8(0),
    }

    buf.put_u64_le(rows as u64);
    buf.put_u32_le(table.num_columns() as u32);
    buf.put_u32_le(
        table
            .timestamp_index()
            .map(|i| i as u32)
            .unwrap_or(NO_TIME_INDEX),
    );

    for column in table.columns() {
        let name = column.name().as_bytes();
        buf.put_u32_le(name.len() as u32);
        buf.put_slice(name);
        buf.put_u8(column.column_type().tag());

        let mut validity = vec![0u8; rows.div_ceil(8)];
        for (row, byte) in (0..rows).map(|r| (r, r / 8)) {
            if !column.data().is_null(row) {
                validity[byte] |= 1 << (row % 8);
            }
        }
        buf.put_slice(&validity);

        match column.data() {
            ColumnData::Numeric(v) => v.iter().for_each(|x| buf.put_f64_le(x.unwrap_or(0.0))),
            ColumnData::Temporal(v) => v.iter().for_each(|x| buf.put_i64_le(x.unwrap_or(0))),
            ColumnData::Other(v) => {
                for x in v {
                    let s = x.as_deref().unwrap_or("").as_bytes();
                    buf.put_u64_le(s.len() as u64);
                    buf.put_slice(s);
                }
            },
        }
    }

    buf.to_vec()
}

fn need(buf: &[u8], n: usize, what: &str) -> Result<(), TableError> {
    if buf.remaining() < n {
        return Err(TableError::Corrupted(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

fn decode_body(mut buf: &[u8]) -> Result<CacheEntry, TableError> {
    need(buf, 1, "range flag")?;
    let source_range = match buf.get_u8() {
        0 => None,
        1 => {
            need(buf, 16, "range")?;
            Some(RowRange::new(buf.get_i64_le(), buf.get_i64_le()))
        },
        other => {
            return Err(TableError::Corrupted(format!(
                "invalid range flag {}",
                other
            )))
        },
    };

    need(buf, 16, "table header")?;
    let rows = usize::try_from(buf.get_u64_le())
        .map_err(|_| TableError::Corrupted("row count overflow".to_string()))?;
    let num_columns = buf.get_u32_le() as usize;
    let time_index = match buf.get_u32_le() {
        NO_TIME_INDEX => None,
        i => Some(i as usize),
    };

    let mut columns = Vec::with_capacity(num_columns.min(4096));
    for _ in 0..num_columns {
        need(buf, 4, "column name length")?;
        let name_len = buf.get_u32_le() as usize;
        need(buf, name_len, "column name")?;
        let name = String::from_utf8(buf[..name_len].to_vec())
            .map_err(|_| TableError::Corrupted("column name is not utf-8".to_string()))?;
        buf.advance(name_len);

        need(buf, 1, "column type")?;
        let tag = buf.get_u8();
        let column_type = ColumnType::from_tag(tag)
            .ok_or_else(|| TableError::Corrupted(format!("unknown column type {}", tag)))?;

        let bitmap_len = rows.div_ceil(8);
        need(buf, bitmap_len, "validity bitmap")?;
        let validity = buf[..bitmap_len].to_vec();
        buf.advance(bitmap_len);
        let valid = |row: usize| validity[row / 8] & (1 << (row % 8)) != 0;

        let data = match column_type {
            ColumnType::Numeric => {
                need(buf, rows.saturating_mul(8), "numeric values")?;
                ColumnData::Numeric(
                    (0..rows)
                        .map(|row| {
                            let x = buf.get_f64_le();
                            valid(row).then_some(x)
                        })
                        .collect(),
                )
            },
            ColumnType::Temporal => {
                need(buf, rows.saturating_mul(8), "temporal values")?;
                ColumnData::Temporal(
                    (0..rows)
                        .map(|row| {
                            let x = buf.get_i64_le();
                            valid(row).then_some(x)
                        })
                        .collect(),
                )
            },
            ColumnType::Other => {
                let mut values = Vec::with_capacity(rows.min(1 << 20));
                for row in 0..rows {
                    need(buf, 8, "value length")?;
                    let len = usize::try_from(buf.get_u64_le())
                        .map_err(|_| TableError::Corrupted("value length overflow".to_string()))?;
                    need(buf, len, "value")?;
                    let s = std::str::from_utf8(&buf[..len])
                        .map_err(|_| TableError::Corrupted("value is not utf-8".to_string()))?
                        .to_string();
                    buf.advance(len);
                    values.push(valid(row).then_some(s));
                }
                ColumnData::Other(values)
            },
        };
        columns.push(Column::new(name, data));
    }

    if buf.has_remaining() {
        return Err(TableError::Corrupted(format!(
            "{} trailing bytes",
            buf.remaining()
        )));
    }

    Ok(CacheEntry {
        table: table::assemble(columns, rows, time_index)?,
        source_range,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new(vec![
            Column::numeric("load", vec![Some(1.25), None, Some(-3.5)]),
            Column::temporal(
                "ts",
                vec![Some(1_700_000_000_123_456), Some(1_700_000_000_123_457), None],
            ),
            Column::other("site", vec![Some("north".into()), None, Some("".into())]),
        ])
        .unwrap()
    }

    #[test]
    fn test_roundtrip_preserves_types_nulls_and_precision() {
        for compress in [false, true] {
            let entry = CacheEntry::ranged(sample(), RowRange::new(10, 20));
            let decoded = decode_entry(&encode_entry(&entry, compress)).unwrap();
            assert_eq!(decoded, entry);
        }
    }

    #[test]
    fn test_roundtrip_keeps_time_designation() {
        let table = Table::new(vec![
            Column::temporal("created", vec![Some(1)]),
            Column::temporal("observed", vec![Some(2)]),
        ])
        .unwrap()
        .with_timestamp_column("observed")
        .unwrap();

        let decoded = decode_table(&encode_table(&table, true)).unwrap();
        assert_eq!(decoded.timestamp_column_name(), Some("observed"));
    }

    #[test]
    fn test_empty_table() {
        let table = sample().slice(3, 1);
        let decoded = decode_table(&encode_table(&table, false)).unwrap();
        assert_eq!(decoded.num_rows(), 0);
        assert_eq!(decoded.num_columns(), 3);
    }

    #[test]
    fn test_compression_shrinks_repetitive_data() {
        let n = 10_000;
        let table = Table::new(vec![
            Column::temporal("ts", (0..n).map(|i| Some(i * 1_000_000)).collect()),
            Column::numeric("v", vec![Some(1.0); n as usize]),
        ])
        .unwrap();
        let raw = encode_table(&table, false);
        let packed = encode_table(&table, true);
        assert!(packed.len() < raw.len());
    }

    #[test]
    fn test_long_names_and_values_survive() {
        let name = "n".repeat(70_000);
        let value = "v".repeat(70_000);
        let table = Table::new(vec![
            Column::temporal("ts", vec![Some(0)]),
            Column::other(name.as_str(), vec![Some(value.clone())]),
        ])
        .unwrap();

        let decoded = decode_table(&encode_table(&table, false)).unwrap();
        assert_eq!(decoded, table);
        assert!(decoded.column(&name).is_ok());
    }

    #[test]
    fn test_rejects_corruption() {
        let frame = encode_table(&sample(), false).to_vec();

        let mut bad = frame.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        assert!(matches!(
            decode_table(&bad),
            Err(TableError::ChecksumMismatch { .. })
        ));

        let mut bad = frame.clone();
        bad[0] = b'X';
        assert!(matches!(decode_table(&bad), Err(TableError::Corrupted(_))));

        let mut bad = frame.clone();
        bad[4] = 99;
        assert!(matches!(
            decode_table(&bad),
            Err(TableError::UnsupportedVersion(99))
        ));

        assert!(decode_table(&frame[..5]).is_err());
    }
}
