//! Shared fixtures for `delta_ingest_core`'s test suites: an in-memory object store, sample
//! entity schemas/records, golden log-entry JSON, and a helper for injecting a raw commit
//! directly into the store so conflict-retry scenarios don't need a second live engine.

use std::sync::Arc;

use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};
use url::Url;

use delta_ingest_core::actions::{Action, Add, CommitInfo, Format, Metadata, Protocol};
use delta_ingest_core::error::IngestResult;
use delta_ingest_core::value::{FieldSchema, FieldType, Record, RecordSchema, Value};

/// A fresh in-memory object store, the default backend for every test in this workspace
/// (mirrors `delta-kernel-rs`'s reliance on `InMemory` for its own unit tests).
pub fn in_memory_store() -> Arc<dyn ObjectStore> {
    Arc::new(InMemory::new())
}

/// A two-field `users` schema: `user_id` (non-nullable string primary key), `email` (nullable
/// string). The schema most tests register first before exercising writes.
pub fn users_schema() -> RecordSchema {
    RecordSchema::new(
        "users",
        vec![
            FieldSchema::new("user_id", FieldType::String, false),
            FieldSchema::new("email", FieldType::String, true),
        ],
    )
}

/// `users_schema()` with one additional nullable field, `signup_source`. Used to exercise
/// additive schema evolution.
pub fn users_schema_with_new_field() -> RecordSchema {
    let mut schema = users_schema();
    schema
        .fields
        .push(FieldSchema::new("signup_source", FieldType::String, true));
    schema
}

/// One `users` record: `(user_id, email)`.
pub fn user_record(user_id: &str, email: &str) -> Record {
    Record::new(vec![
        Value::Str(user_id.to_string()),
        Value::Str(email.to_string()),
    ])
}

/// A batch of `count` distinct `users` records, `user-0..user-{count-1}`.
pub fn user_records(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| user_record(&format!("user-{i}"), &format!("user-{i}@example.com")))
        .collect()
}

/// Writes a raw, hand-built commit entry directly to `table_root`'s log at `version`, bypassing
/// the engine entirely. Lets a conflict-retry test plant a competing commit between a commit
/// coordinator's base-version probe and its put-if-absent attempt (spec §4.7, P4).
pub async fn write_raw_log_entry(
    store: &dyn ObjectStore,
    table_root: &Url,
    version: u64,
    actions: &[Action],
) -> IngestResult<()> {
    let commit_url = delta_ingest_core::path::commit_path_for_version(table_root, version)?;
    let commit_path = delta_ingest_core::path::relative_object_store_path(table_root, &commit_url)?;
    let body = delta_ingest_core::actions::actions_to_ndjson(actions)?;
    store
        .put_opts(
            &commit_path,
            PutPayload::from(body.into_bytes()),
            PutOptions {
                mode: PutMode::Create,
                ..Default::default()
            },
        )
        .await
        .map_err(delta_ingest_core::error::IngestError::from_object_store)?;
    Ok(())
}

/// Lists every path currently under `table_root`'s `_delta_log/`, sorted. Useful for asserting
/// how many commit/checkpoint files a scenario produced without parsing their contents.
pub async fn list_log_paths(store: &dyn ObjectStore, table_root: &Url) -> Vec<String> {
    use futures::stream::StreamExt;
    let log_root = delta_ingest_core::path::log_root(table_root).expect("valid log root");
    let log_root_relative =
        delta_ingest_core::path::relative_object_store_path(table_root, &log_root)
            .unwrap_or_else(|_| Path::from("_delta_log/"));
    let mut names: Vec<String> = store
        .list(Some(&log_root_relative))
        .filter_map(|meta| async move { meta.ok().map(|m| m.location.to_string()) })
        .collect()
        .await;
    names.sort();
    names
}

/// A golden `protocol` action matching this engine's minimal reader/writer versions, the
/// fixture every "first commit" assertion compares against.
pub fn golden_protocol_action() -> Action {
    Action::Protocol(Protocol::default())
}

/// A golden `metaData` action for [`users_schema`], with a fixed id/timestamp so assertions can
/// compare structurally after overwriting the generated fields.
pub fn golden_metadata_action() -> Action {
    let table_schema = delta_ingest_core::schema::translate(&users_schema(), vec![]).unwrap();
    Action::Metadata(Metadata {
        id: "00000000-0000-0000-0000-000000000000".to_string(),
        format: Format::default(),
        schema_string: table_schema.to_schema_string().unwrap(),
        partition_columns: vec![],
        configuration: Default::default(),
        created_time: 0,
    })
}

/// A golden `add` action for a single Parquet data file, with a fixed path/size/timestamp.
pub fn golden_add_action(path: &str, size: u64) -> Action {
    Action::Add(Add {
        path: path.to_string(),
        partition_values: Default::default(),
        size,
        modification_time: 0,
        data_change: true,
        stats: None,
    })
}

/// A golden `commitInfo` action for a `WRITE` operation with no transaction id.
pub fn golden_commit_info_action() -> Action {
    Action::CommitInfo(CommitInfo::new(0, "WRITE", None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn raw_log_entry_round_trips() {
        let store = in_memory_store();
        let table_root = delta_ingest_core::path::resolve_table_root(
            delta_ingest_core::config::StorageType::Local,
            "fixtures",
            "users",
        )
        .unwrap();
        write_raw_log_entry(
            store.as_ref(),
            &table_root,
            0,
            &[golden_protocol_action(), golden_commit_info_action()],
        )
        .await
        .unwrap();

        let paths = list_log_paths(store.as_ref(), &table_root).await;
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("00000000000000000000.json"));
    }

    #[test]
    fn sample_schema_has_expected_fields() {
        let schema = users_schema();
        assert_eq!(schema.fields.len(), 2);
        assert_eq!(schema.fields[0].name, "user_id");
    }
}
