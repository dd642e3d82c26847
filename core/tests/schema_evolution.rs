//! End-to-end scenarios 5 ("schema evolution accept") and 6 ("schema evolution reject"), and
//! property P7, from the write-path spec.

use std::sync::Arc;

use delta_ingest_core::actions::Action;
use delta_ingest_core::config::EvolutionPolicy;
use delta_ingest_core::value::{FieldSchema, FieldType, Record, Value};
use delta_ingest_core::{EngineConfig, IngestError};
use delta_ingest_test_utils::{in_memory_store, list_log_paths, user_record, users_schema, users_schema_with_new_field};

#[tokio::test]
async fn additive_evolution_is_accepted_and_carries_updated_metadata() {
    let store = in_memory_store();
    let mut config = EngineConfig::default();
    config.base_path = "evolve-accept".to_string();
    let engine = delta_ingest_core::WriteEngine::new(config, Arc::clone(&store)).unwrap();

    engine
        .register_entity(
            "users",
            users_schema(),
            "user_id".to_string(),
            vec![],
            EvolutionPolicy::BackwardCompatible,
        )
        .await
        .unwrap();
    engine.write("users", vec![user_record("u1", "u1@x")]).await.unwrap();

    // additive: adds a nullable `signup_source` field, keeping every existing field intact.
    engine
        .register_entity(
            "users",
            users_schema_with_new_field(),
            "user_id".to_string(),
            vec![],
            EvolutionPolicy::BackwardCompatible,
        )
        .await
        .unwrap();

    let records = vec![Record::new(vec![
        Value::Str("u2".to_string()),
        Value::Str("u2@x".to_string()),
        Value::Str("referral".to_string()),
    ])];
    let version = engine.write("users", records).await.unwrap();
    assert_eq!(version, 1, "the second write lands on the version right after table creation");

    let table_root = delta_ingest_core::path::resolve_table_root(
        delta_ingest_core::config::StorageType::Local,
        "evolve-accept",
        "users",
    )
    .unwrap();
    let commit_path = delta_ingest_core::path::relative_object_store_path(
        &table_root,
        &delta_ingest_core::path::commit_path_for_version(&table_root, version).unwrap(),
    )
    .unwrap();
    let bytes = store.as_ref().get(&commit_path).await.unwrap().bytes().await.unwrap();
    let text = String::from_utf8_lossy(&bytes);
    let actions = delta_ingest_core::actions::ndjson_to_actions(&text).unwrap();

    let metadata_action = actions.iter().find_map(|a| match a {
        Action::Metadata(m) => Some(m),
        _ => None,
    });
    // the commit coordinator tracks the schema it last wrote per table and re-emits `metaData`
    // the first time a write observes a different (but still compatible) schema than that.
    let metadata_action = metadata_action.expect("schema evolution must carry an updated metaData action");
    assert!(
        metadata_action.schema_string.contains("signup_source"),
        "the updated metaData action must describe the evolved three-field schema"
    );
}

#[tokio::test]
async fn incompatible_evolution_is_rejected_and_old_entry_is_preserved() {
    let store = in_memory_store();
    let mut config = EngineConfig::default();
    config.base_path = "evolve-reject".to_string();
    let engine = delta_ingest_core::WriteEngine::new(config, Arc::clone(&store)).unwrap();

    let s1 = delta_ingest_core::RecordSchema::new(
        "users",
        vec![FieldSchema::new("id", FieldType::I32, false)],
    );
    engine
        .register_entity(
            "users",
            s1.clone(),
            "id".to_string(),
            vec![],
            EvolutionPolicy::BackwardCompatible,
        )
        .await
        .unwrap();
    engine
        .write("users", vec![Record::new(vec![Value::I32(1)])])
        .await
        .unwrap();

    let s2 = delta_ingest_core::RecordSchema::new(
        "users",
        vec![FieldSchema::new("id", FieldType::String, false)],
    );
    let err = engine
        .register_entity(
            "users",
            s2,
            "id".to_string(),
            vec![],
            EvolutionPolicy::BackwardCompatible,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::IncompatibleSchema { .. }));

    // the registry entry must still be S1: a write under its original shape keeps succeeding.
    let version = engine
        .write("users", vec![Record::new(vec![Value::I32(2)])])
        .await
        .unwrap();
    assert_eq!(version, 1);

    let table_root = delta_ingest_core::path::resolve_table_root(
        delta_ingest_core::config::StorageType::Local,
        "evolve-reject",
        "users",
    )
    .unwrap();
    let paths = list_log_paths(store.as_ref(), &table_root).await;
    assert_eq!(paths.len(), 2, "the rejected evolution attempt wrote no log entry of its own");
}
