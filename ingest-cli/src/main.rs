//! A minimal demonstration binary for `delta_ingest_core` (spec §0.5 of `SPEC_FULL.md`).
//!
//! Wires an [`EngineConfig`], a `LocalFileSystem`/`InMemory` object store, registers one entity
//! from a JSON schema file, and writes newline-delimited JSON records read from stdin (or a
//! file). This is explicitly a thin exerciser, not the request-handler/HTTP layer spec §1 scopes
//! out of the core.

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use serde::Deserialize;

use delta_ingest_core::config::{EvolutionPolicy, StorageType};
use delta_ingest_core::value::{FieldSchema, FieldType, Record, RecordSchema, Value};
use delta_ingest_core::{EngineConfig, IngestResult, WriteEngine};

#[derive(Parser)]
#[command(author, version, about = "Exercise delta_ingest_core end-to-end", long_about = None)]
struct Cli {
    /// Root directory for the local object store. Ignored when `--in-memory` is set.
    #[arg(long, default_value = "./ingest-data")]
    base_path: PathBuf,

    /// Use an in-memory object store instead of the local filesystem (handy for smoke tests).
    #[arg(long)]
    in_memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an entity from a JSON schema file and write records read from stdin (or
    /// `--records`), then print the committed version.
    Ingest {
        /// Path to a JSON entity schema file (see `SchemaFile` below for the shape).
        #[arg(long)]
        schema: PathBuf,
        /// Path to a newline-delimited JSON records file; reads stdin if omitted.
        #[arg(long)]
        records: Option<PathBuf>,
    },
}

/// On-disk shape of an entity schema file, the CLI's stand-in for the HTTP layer's input
/// validation/schema registration endpoint (spec §1 scopes that layer out of the core).
#[derive(Deserialize)]
struct SchemaFile {
    table_name: String,
    primary_key_column: String,
    #[serde(default)]
    partition_columns: Vec<String>,
    #[serde(default)]
    evolution_policy: EvolutionPolicyArg,
    fields: Vec<FieldSchemaFile>,
}

#[derive(Deserialize)]
struct FieldSchemaFile {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    nullable: bool,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum EvolutionPolicyArg {
    #[default]
    BackwardCompatible,
    ForwardCompatible,
    Full,
    None,
}

impl From<EvolutionPolicyArg> for EvolutionPolicy {
    fn from(value: EvolutionPolicyArg) -> Self {
        match value {
            EvolutionPolicyArg::BackwardCompatible => EvolutionPolicy::BackwardCompatible,
            EvolutionPolicyArg::ForwardCompatible => EvolutionPolicy::ForwardCompatible,
            EvolutionPolicyArg::Full => EvolutionPolicy::Full,
            EvolutionPolicyArg::None => EvolutionPolicy::None,
        }
    }
}

fn parse_field_type(raw: &str) -> Result<FieldType, String> {
    Ok(match raw {
        "string" => FieldType::String,
        "i32" | "int32" | "integer" => FieldType::I32,
        "i64" | "int64" | "long" => FieldType::I64,
        "f32" | "float" => FieldType::F32,
        "f64" | "double" => FieldType::F64,
        "bool" | "boolean" => FieldType::Bool,
        "binary" => FieldType::Binary,
        "enum" => FieldType::Enum,
        other if other.starts_with("array<") && other.ends_with('>') => {
            let inner = &other["array<".len()..other.len() - 1];
            FieldType::Array(Box::new(parse_field_type(inner)?))
        }
        other if other.starts_with("map<") && other.ends_with('>') => {
            let inner = &other["map<".len()..other.len() - 1];
            FieldType::Map(Box::new(parse_field_type(inner)?))
        }
        other => return Err(format!("unrecognized field type '{other}'")),
    })
}

fn load_record_schema(file: &SchemaFile) -> Result<RecordSchema, String> {
    let fields = file
        .fields
        .iter()
        .map(|f| Ok(FieldSchema::new(f.name.clone(), parse_field_type(&f.field_type)?, f.nullable)))
        .collect::<Result<Vec<_>, String>>()?;
    Ok(RecordSchema::new(file.table_name.clone(), fields))
}

/// Converts one JSON object line into a [`Record`] positioned by the schema's field order. A
/// field absent from the JSON object becomes `Value::Null`, deferring the nullable/non-nullable
/// decision to the Batch Assembler (spec §4.4), exactly as a real request-handler layer would
/// hand the core a sparse record.
fn json_line_to_record(schema: &RecordSchema, line: &str) -> Result<Record, String> {
    let json: serde_json::Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let serde_json::Value::Object(map) = json else {
        return Err("each record line must be a JSON object".to_string());
    };
    let values = schema
        .fields
        .iter()
        .map(|f| json_to_value(map.get(&f.name).unwrap_or(&serde_json::Value::Null), &f.field_type))
        .collect::<Result<Vec<_>, String>>()?;
    Ok(Record::new(values))
}

fn json_to_value(json: &serde_json::Value, field_type: &FieldType) -> Result<Value, String> {
    if json.is_null() {
        return Ok(Value::Null);
    }
    Ok(match field_type {
        FieldType::String | FieldType::Enum => {
            Value::Str(json.as_str().ok_or("expected string")?.to_string())
        }
        FieldType::I32 => Value::I32(json.as_i64().ok_or("expected integer")? as i32),
        FieldType::I64 => Value::I64(json.as_i64().ok_or("expected integer")?),
        FieldType::F32 => Value::F32(json.as_f64().ok_or("expected float")? as f32),
        FieldType::F64 => Value::F64(json.as_f64().ok_or("expected float")?),
        FieldType::Bool => Value::Bool(json.as_bool().ok_or("expected bool")?),
        FieldType::Binary => Value::Bytes(json.as_str().ok_or("expected base64 string")?.as_bytes().to_vec()),
        FieldType::Array(inner) => {
            let items = json.as_array().ok_or("expected array")?;
            Value::Array(
                items
                    .iter()
                    .map(|item| json_to_value(item, inner))
                    .collect::<Result<Vec<_>, String>>()?,
            )
        }
        FieldType::Map(inner) => {
            let obj = json.as_object().ok_or("expected object for map")?;
            Value::Map(
                obj.iter()
                    .map(|(k, v)| Ok((k.clone(), json_to_value(v, inner)?)))
                    .collect::<Result<Vec<_>, String>>()?,
            )
        }
        FieldType::Record(_) => {
            let obj = json.as_object().ok_or("expected object for nested record")?;
            Value::Record(
                obj.iter()
                    .map(|(k, v)| Ok((k.clone(), json_to_value(v, &FieldType::String)?)))
                    .collect::<Result<Vec<_>, String>>()?,
            )
        }
    })
}

fn build_store(cli: &Cli) -> IngestResult<Arc<dyn ObjectStore>> {
    if cli.in_memory {
        return Ok(Arc::new(InMemory::new()));
    }
    fs::create_dir_all(&cli.base_path).map_err(|e| {
        delta_ingest_core::IngestError::InvalidConfig(format!(
            "failed to create base path {}: {e}",
            cli.base_path.display()
        ))
    })?;
    let store = LocalFileSystem::new_with_prefix(&cli.base_path).map_err(|e| {
        delta_ingest_core::IngestError::InvalidConfig(format!("invalid base path: {e}"))
    })?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match try_main(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn try_main(cli: Cli) -> Result<(), String> {
    let mut config = EngineConfig::default();
    config.storage_type = StorageType::Local;
    config.base_path = cli.base_path.to_string_lossy().to_string();

    let store = build_store(&cli).map_err(|e| e.to_string())?;
    let engine = WriteEngine::new(config, store).map_err(|e| e.to_string())?;

    match &cli.command {
        Commands::Ingest { schema, records } => {
            let schema_text = fs::read_to_string(schema).map_err(|e| e.to_string())?;
            let schema_file: SchemaFile = serde_json::from_str(&schema_text).map_err(|e| e.to_string())?;
            let record_schema = load_record_schema(&schema_file)?;
            let table_name = schema_file.table_name.clone();

            engine
                .register_entity(
                    &table_name,
                    record_schema.clone(),
                    schema_file.primary_key_column.clone(),
                    schema_file.partition_columns.clone(),
                    schema_file.evolution_policy.into(),
                )
                .await
                .map_err(|e| e.to_string())?;

            let input = read_input(records)?;
            let mut batch = Vec::new();
            for line in input.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                batch.push(json_line_to_record(&record_schema, line)?);
            }
            if batch.is_empty() {
                println!("no records to write");
                return Ok(());
            }

            let version = engine.write(&table_name, batch).await.map_err(|e| e.to_string())?;
            println!("committed {table_name} at version {version}");
            let metrics = engine.metrics().await;
            println!("{metrics:?}");
            Ok(())
        }
    }
}

fn read_input(path: &Option<PathBuf>) -> Result<String, String> {
    match path {
        Some(p) => fs::read_to_string(p).map_err(|e| e.to_string()),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).map_err(|e| e.to_string())?;
            Ok(buf)
        }
    }
}
