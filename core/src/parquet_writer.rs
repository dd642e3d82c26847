//! Parquet Writer (spec §4.5): serializes a columnar batch to a Parquet object in the table's
//! data directory and returns per-file statistics for the commit coordinator's `add` actions.
//!
//! Grounded on `otlp2parquet`'s buffer-then-put pattern: a complete Parquet file is built
//! in-memory, then a single `ObjectStore::put` makes it visible atomically — the file is never
//! observable in a partially-written state.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::RecordBatch;
use object_store::path::Path;
use object_store::ObjectStore;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use uuid::Uuid;

use crate::actions::FileStats;
use crate::config::CompressionCodec;
use crate::error::IngestResult;

/// One emitted Parquet data file's identity and statistics (spec §4.5).
#[derive(Debug, Clone)]
pub struct DataFileStatus {
    /// Path relative to the table root, suitable for an `add` action's `path` field.
    pub relative_path: String,
    pub size_bytes: u64,
    pub row_count: u64,
    pub stats: FileStats,
}

fn compression(codec: CompressionCodec) -> Compression {
    match codec {
        CompressionCodec::Snappy => Compression::SNAPPY,
        CompressionCodec::Gzip => Compression::GZIP(Default::default()),
        CompressionCodec::Zstd => Compression::ZSTD(Default::default()),
        CompressionCodec::Uncompressed => Compression::UNCOMPRESSED,
    }
}

/// Writes `batch` as a single Parquet file under `data_dir_relative` (a table-root-relative
/// object-store path, partition subpath already included), returning its `DataFileStatus`.
///
/// `stats_columns` names the columns stats should be computed for; the primary-key column is
/// always included by the caller (spec §4.5).
pub async fn write_batch(
    store: &dyn ObjectStore,
    data_dir_relative: &Path,
    batch: &RecordBatch,
    stats_columns: &[String],
    block_bytes: usize,
    codec: CompressionCodec,
) -> IngestResult<DataFileStatus> {
    let file_name = format!("{}-0.{}.parquet", Uuid::new_v4(), codec_suffix(codec));
    let relative_path = format!("{}/{}", data_dir_relative, file_name).trim_start_matches('/').to_string();
    let object_path = Path::from(relative_path.as_str());

    let props = WriterProperties::builder()
        .set_compression(compression(codec))
        .set_max_row_group_size(row_group_size_for(block_bytes, batch))
        .build();

    let mut buffer: Vec<u8> = Vec::new();
    {
        let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))?;
        writer.write(batch)?;
        writer.close()?;
    }

    let size_bytes = buffer.len() as u64;
    store
        .put(&object_path, buffer.into())
        .await
        .map_err(crate::error::IngestError::from_object_store)?;

    let stats = compute_stats(batch, stats_columns);

    Ok(DataFileStatus {
        relative_path,
        size_bytes,
        row_count: batch.num_rows() as u64,
        stats,
    })
}

/// Serializes an arbitrary `RecordBatch` to an in-memory Parquet buffer without touching the
/// object store. Used by the Checkpointer, which writes its own fixed checkpoint schema rather
/// than a table's data schema.
pub fn checkpoint_buffer(batch: &RecordBatch) -> IngestResult<Vec<u8>> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;
    Ok(buffer)
}

fn codec_suffix(codec: CompressionCodec) -> &'static str {
    match codec {
        CompressionCodec::Snappy => "snappy",
        CompressionCodec::Gzip => "gz",
        CompressionCodec::Zstd => "zstd",
        CompressionCodec::Uncompressed => "uncompressed",
    }
}

// Row-group target size is expressed in rows by the parquet crate; approximate a byte target by
// assuming an average of 128 bytes/row (a conservative stand-in in the absence of historical
// per-table size data) and clamping to the batch's own row count so a single small batch is
// never split.
fn row_group_size_for(block_bytes: usize, batch: &RecordBatch) -> usize {
    const ASSUMED_BYTES_PER_ROW: usize = 128;
    (block_bytes / ASSUMED_BYTES_PER_ROW).max(1).min(batch.num_rows().max(1))
}

fn compute_stats(batch: &RecordBatch, stats_columns: &[String]) -> FileStats {
    let mut min_values = HashMap::new();
    let mut max_values = HashMap::new();
    let mut null_count = HashMap::new();

    for column_name in stats_columns {
        let Some((index, _)) = batch.schema().column_with_name(column_name) else {
            continue;
        };
        let column = batch.column(index);
        null_count.insert(column_name.clone(), column.null_count() as u64);
        if let Some((min, max)) = arrow_min_max(column.as_ref()) {
            min_values.insert(column_name.clone(), min);
            max_values.insert(column_name.clone(), max);
        }
    }

    FileStats {
        num_records: batch.num_rows() as u64,
        min_values,
        max_values,
        null_count,
    }
}

/// Computes (min, max) as JSON scalars for the primitive array types stats are collected over.
/// Structural columns (list/map) are skipped — Delta stats are only ever collected for leaf
/// primitive columns.
fn arrow_min_max(array: &dyn arrow_array::Array) -> Option<(serde_json::Value, serde_json::Value)> {
    use arrow_array::{
        Array, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array, StringArray,
    };
    use arrow_schema::DataType;

    match array.data_type() {
        DataType::Int32 => {
            let arr = array.as_any().downcast_ref::<Int32Array>()?;
            min_max_numeric(arr.iter().flatten().map(|v| v as i64))
        }
        DataType::Int64 => {
            let arr = array.as_any().downcast_ref::<Int64Array>()?;
            min_max_numeric(arr.iter().flatten())
        }
        DataType::Float32 => {
            let arr = array.as_any().downcast_ref::<Float32Array>()?;
            min_max_float(arr.iter().flatten().map(|v| v as f64))
        }
        DataType::Float64 => {
            let arr = array.as_any().downcast_ref::<Float64Array>()?;
            min_max_float(arr.iter().flatten())
        }
        DataType::Utf8 => {
            let arr = array.as_any().downcast_ref::<StringArray>()?;
            let mut iter = arr.iter().flatten();
            let first = iter.next()?;
            let (mut min, mut max) = (first, first);
            for v in iter {
                if v < min {
                    min = v;
                }
                if v > max {
                    max = v;
                }
            }
            Some((
                serde_json::Value::String(min.to_string()),
                serde_json::Value::String(max.to_string()),
            ))
        }
        DataType::Boolean => {
            let arr = array.as_any().downcast_ref::<BooleanArray>()?;
            let mut iter = arr.iter().flatten();
            let first = iter.next()?;
            let (mut min, mut max) = (first, first);
            for v in iter {
                min = min && v;
                max = max || v;
            }
            Some((serde_json::json!(min), serde_json::json!(max)))
        }
        _ => None,
    }
}

fn min_max_numeric<I: Iterator<Item = i64>>(mut iter: I) -> Option<(serde_json::Value, serde_json::Value)> {
    let first = iter.next()?;
    let (mut min, mut max) = (first, first);
    for v in iter {
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
    }
    Some((serde_json::json!(min), serde_json::json!(max)))
}

fn min_max_float<I: Iterator<Item = f64>>(mut iter: I) -> Option<(serde_json::Value, serde_json::Value)> {
    let first = iter.next()?;
    let (mut min, mut max) = (first, first);
    for v in iter {
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
    }
    Some((serde_json::json!(min), serde_json::json!(max)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DeltaField, DeltaType, TableSchema};
    use crate::value::{Record, Value};
    use object_store::memory::InMemory;

    fn schema() -> TableSchema {
        TableSchema {
            fields: vec![
                DeltaField {
                    name: "id".to_string(),
                    data_type: DeltaType::String,
                    nullable: false,
                },
                DeltaField {
                    name: "age".to_string(),
                    data_type: DeltaType::Integer,
                    nullable: true,
                },
            ],
            partition_columns: vec![],
        }
    }

    #[tokio::test]
    async fn writes_a_complete_parquet_file_in_one_put() {
        let store = InMemory::new();
        let records = vec![
            Record::new(vec![Value::Str("a".into()), Value::I32(10)]),
            Record::new(vec![Value::Str("b".into()), Value::Null]),
        ];
        let batch = crate::batch::assemble(&records, &schema()).unwrap();
        let status = write_batch(
            &store,
            &Path::from(""),
            &batch,
            &["id".to_string()],
            256 * 1024 * 1024,
            CompressionCodec::Snappy,
        )
        .await
        .unwrap();
        assert_eq!(status.row_count, 2);
        assert!(status.size_bytes > 0);
        assert_eq!(
            status.stats.min_values.get("id"),
            Some(&serde_json::Value::String("a".to_string()))
        );

        let listed = store.get(&Path::from(status.relative_path.as_str())).await;
        assert!(listed.is_ok());
    }
}
