//! Path Resolver (spec §4.2): pure, I/O-free functions that turn `(storage type, base path,
//! table name)` into the table's canonical root URI, and that URI into the log/data paths spec
//! §6 lays out.

use url::Url;

use crate::config::StorageType;
use crate::error::{IngestError, IngestResult};
use crate::value::Value;

fn scheme(storage_type: StorageType) -> &'static str {
    match storage_type {
        StorageType::S3A => "s3a",
        StorageType::Local => "file",
        StorageType::Hdfs => "hdfs",
        StorageType::Azure => "az",
        StorageType::Gcs => "gs",
    }
}

/// Produces the table root URI. Pure; the same inputs always yield the same URI (spec §4.2's
/// invariant).
pub fn resolve_table_root(
    storage_type: StorageType,
    base_path: &str,
    table_name: &str,
) -> IngestResult<Url> {
    let trimmed_base = base_path.trim_end_matches('/');
    let raw = format!("{}://{}/{}/", scheme(storage_type), trimmed_base, table_name);
    Ok(Url::parse(&raw)?)
}

/// `<table_root>/_delta_log/`.
pub fn log_root(table_root: &Url) -> IngestResult<Url> {
    Ok(table_root.join("_delta_log/")?)
}

/// `_delta_log/<version, zero-padded 20 digits>.json` (spec §6 on-object layout).
pub fn commit_path_for_version(table_root: &Url, version: u64) -> IngestResult<Url> {
    Ok(log_root(table_root)?.join(&format!("{version:020}.json"))?)
}

/// `_delta_log/<version, zero-padded 20 digits>.checkpoint.parquet`.
pub fn checkpoint_path_for_version(table_root: &Url, version: u64) -> IngestResult<Url> {
    Ok(log_root(table_root)?.join(&format!("{version:020}.checkpoint.parquet"))?)
}

/// The data directory for a record's partition values, given the table's ordered partition
/// columns and the Hive-style `<col>=<value>` path segments spec §6 specifies.
pub fn data_dir_for_partition(
    table_root: &Url,
    partition_columns: &[String],
    partition_values: &[(String, Value)],
) -> IngestResult<Url> {
    if partition_columns.is_empty() {
        return Ok(table_root.clone());
    }
    let mut path = table_root.clone();
    for col in partition_columns {
        let value = partition_values
            .iter()
            .find(|(name, _)| name == col)
            .map(|(_, v)| partition_value_to_path_segment(v))
            .unwrap_or_else(|| "__HIVE_DEFAULT_PARTITION__".to_string());
        path = path.join(&format!("{col}={value}/"))?;
    }
    Ok(path)
}

fn partition_value_to_path_segment(value: &Value) -> String {
    match value {
        Value::Null => "__HIVE_DEFAULT_PARTITION__".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::I32(i) => i.to_string(),
        Value::I64(i) => i.to_string(),
        Value::F32(f) => f.to_string(),
        Value::F64(f) => f.to_string(),
        Value::Str(s) => percent_encode_path_segment(s),
        Value::Bytes(b) => percent_encode_path_segment(&String::from_utf8_lossy(b)),
        // these variants never reach here: spec §3 S2 requires partition columns to be primitive.
        Value::Array(_) | Value::Map(_) | Value::Record(_) => {
            "__HIVE_DEFAULT_PARTITION__".to_string()
        }
    }
}

// Minimal Hive-style percent-encoding for partition path segments: escapes '/' and '%' so a
// value can never introduce an extra path segment or an ambiguous escape.
fn percent_encode_path_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'/' => out.push_str("%2F"),
            b'%' => out.push_str("%25"),
            _ => out.push(b as char),
        }
    }
    out
}

/// Returns an owned object-store relative `Path` (no table-root prefix) for a given absolute
/// table-relative URL, used when handing paths to `object_store::ObjectStore`.
pub fn relative_object_store_path(
    table_root: &Url,
    absolute: &Url,
) -> IngestResult<object_store::path::Path> {
    let rel = absolute.as_str().strip_prefix(table_root.as_str()).ok_or_else(|| {
        IngestError::Internal(format!(
            "path '{absolute}' is not rooted under table root '{table_root}'"
        ))
    })?;
    Ok(object_store::path::Path::from(rel))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_table_root_is_pure() {
        let a = resolve_table_root(StorageType::S3A, "my-bucket", "users").unwrap();
        let b = resolve_table_root(StorageType::S3A, "my-bucket", "users").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "s3a://my-bucket/users/");
    }

    #[test]
    fn different_storage_types_produce_different_schemes() {
        let local = resolve_table_root(StorageType::Local, "/data", "users").unwrap();
        assert_eq!(local.scheme(), "file");
        let azure = resolve_table_root(StorageType::Azure, "acct.blob", "users").unwrap();
        assert_eq!(azure.scheme(), "az");
    }

    #[test]
    fn commit_path_is_zero_padded_twenty_digits() {
        let root = resolve_table_root(StorageType::Local, "/data", "users").unwrap();
        let path = commit_path_for_version(&root, 1).unwrap();
        assert!(path.as_str().ends_with("_delta_log/00000000000000000001.json"));
    }

    #[test]
    fn data_dir_with_no_partitions_is_table_root() {
        let root = resolve_table_root(StorageType::Local, "/data", "users").unwrap();
        let dir = data_dir_for_partition(&root, &[], &[]).unwrap();
        assert_eq!(dir, root);
    }

    #[test]
    fn data_dir_encodes_partition_values() {
        let root = resolve_table_root(StorageType::Local, "/data", "users").unwrap();
        let dir = data_dir_for_partition(
            &root,
            &["country".to_string()],
            &[("country".to_string(), Value::Str("US".to_string()))],
        )
        .unwrap();
        assert!(dir.as_str().ends_with("country=US/"));
    }
}
