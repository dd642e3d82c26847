//! Delta log action structs (spec §6's "Log entry format") and their newline-delimited-JSON
//! (de)serialization. One `Action` variant maps to one JSON object per line of a commit file.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IngestResult;
use crate::schema::TableSchema;

/// `protocol` action: written on a table's first commit only (spec §6).
///
/// The engine only ever writes the minimal reader/writer protocol this spec requires (no table
/// features); this intentionally does not replicate `delta-kernel-rs`'s full table-features
/// negotiation, which is out of scope for an append-only writer.
pub const MIN_READER_VERSION: i32 = 1;
pub const MIN_WRITER_VERSION: i32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Protocol {
    #[serde(rename = "minReaderVersion")]
    pub min_reader_version: i32,
    #[serde(rename = "minWriterVersion")]
    pub min_writer_version: i32,
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            min_reader_version: MIN_READER_VERSION,
            min_writer_version: MIN_WRITER_VERSION,
        }
    }
}

/// `metaData` action: written on the first commit, and again whenever a compatible schema
/// evolution is applied (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    pub id: String,
    pub format: Format,
    #[serde(rename = "schemaString")]
    pub schema_string: String,
    #[serde(rename = "partitionColumns")]
    pub partition_columns: Vec<String>,
    pub configuration: HashMap<String, String>,
    #[serde(rename = "createdTime")]
    pub created_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Format {
    pub provider: String,
    pub options: HashMap<String, String>,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            provider: "parquet".to_string(),
            options: HashMap::new(),
        }
    }
}

impl Metadata {
    pub fn try_new(schema: &TableSchema, created_time: i64) -> IngestResult<Self> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            format: Format::default(),
            schema_string: schema.to_schema_string()?,
            partition_columns: schema.partition_columns.clone(),
            configuration: HashMap::new(),
            created_time,
        })
    }
}

/// Per-column statistics embedded in an `add` action's `stats` field, always computed for the
/// primary-key column when declared (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FileStats {
    #[serde(rename = "numRecords")]
    pub num_records: u64,
    #[serde(rename = "minValues")]
    pub min_values: HashMap<String, serde_json::Value>,
    #[serde(rename = "maxValues")]
    pub max_values: HashMap<String, serde_json::Value>,
    #[serde(rename = "nullCount")]
    pub null_count: HashMap<String, u64>,
}

/// `add` action: one per emitted Parquet file (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Add {
    pub path: String,
    #[serde(rename = "partitionValues")]
    pub partition_values: HashMap<String, String>,
    pub size: u64,
    #[serde(rename = "modificationTime")]
    pub modification_time: i64,
    #[serde(rename = "dataChange")]
    pub data_change: bool,
    /// Pre-serialized JSON stats (matching Delta's on-the-wire representation of `stats` as a
    /// JSON string, not a nested object).
    pub stats: Option<String>,
}

/// `commitInfo` action: exactly one per commit entry (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitInfo {
    pub timestamp: i64,
    #[serde(rename = "engineInfo")]
    pub engine_info: Option<String>,
    pub operation: String,
    #[serde(rename = "txnId")]
    pub txn_id: Option<String>,
    #[serde(rename = "isBlindAppend")]
    pub is_blind_append: bool,
}

impl CommitInfo {
    pub fn new(timestamp: i64, operation: impl Into<String>, txn_id: Option<String>) -> Self {
        Self {
            timestamp,
            engine_info: Some(format!(
                "delta-ingest/{}",
                env!("CARGO_PKG_VERSION")
            )),
            operation: operation.into(),
            txn_id,
            is_blind_append: true,
        }
    }
}

/// One line of a Delta commit file. Tagged by its single present key, matching Delta's
/// action-per-object-per-line wire format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Action {
    #[serde(rename = "protocol")]
    Protocol(Protocol),
    #[serde(rename = "metaData")]
    Metadata(Metadata),
    #[serde(rename = "add")]
    Add(Add),
    #[serde(rename = "commitInfo")]
    CommitInfo(CommitInfo),
}

/// Serializes a sequence of actions as newline-delimited JSON, the format every commit/
/// checkpoint log file uses (spec §6).
pub fn actions_to_ndjson(actions: &[Action]) -> IngestResult<String> {
    let mut out = String::new();
    for (i, action) in actions.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&serde_json::to_string(action)?);
    }
    Ok(out)
}

/// Parses a commit file's newline-delimited JSON content back into actions.
pub fn ndjson_to_actions(content: &str) -> IngestResult<Vec<Action>> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| Ok(serde_json::from_str(line)?))
        .collect()
}
