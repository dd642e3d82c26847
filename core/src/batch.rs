//! Batch Assembler (spec §4.4): turns a non-empty set of [`Record`]s into a columnar
//! `arrow::RecordBatch` matching the target Delta schema, with null-bitmaps and per-field
//! coercion.

use std::sync::Arc;

use arrow_array::builder::{
    ArrayBuilder, BinaryBuilder, BooleanBuilder, Float32Builder, Float64Builder, Int32Builder,
    Int64Builder, ListBuilder, MapBuilder, StringBuilder,
};
use arrow_array::RecordBatch;
use arrow_schema::{DataType, Field, Fields, Schema, SchemaRef};

use crate::error::{IngestError, IngestResult};
use crate::schema::{DeltaType, TableSchema};
use crate::value::{Record, Value};

/// The arrow `Schema` equivalent of a [`TableSchema`], cached by callers that assemble many
/// batches against the same target schema.
pub fn arrow_schema(schema: &TableSchema) -> SchemaRef {
    let fields: Vec<Field> = schema
        .fields
        .iter()
        .map(|f| Field::new(&f.name, delta_type_to_arrow(&f.data_type), f.nullable))
        .collect();
    Arc::new(Schema::new(fields))
}

fn delta_type_to_arrow(t: &DeltaType) -> DataType {
    match t {
        DeltaType::String => DataType::Utf8,
        DeltaType::Integer => DataType::Int32,
        DeltaType::Long => DataType::Int64,
        DeltaType::Float => DataType::Float32,
        DeltaType::Double => DataType::Float64,
        DeltaType::Boolean => DataType::Boolean,
        DeltaType::Binary => DataType::Binary,
        DeltaType::Array {
            element,
            contains_null,
        } => DataType::List(Arc::new(Field::new(
            "item",
            delta_type_to_arrow(element),
            *contains_null,
        ))),
        DeltaType::Map {
            value,
            value_contains_null,
        } => {
            let entries = Fields::from(vec![
                Field::new("keys", DataType::Utf8, false),
                Field::new("values", delta_type_to_arrow(value), *value_contains_null),
            ]);
            DataType::Map(
                Arc::new(Field::new("entries", DataType::Struct(entries), false)),
                false,
            )
        }
    }
}

/// Assembles `records` into a single `RecordBatch` matching `schema` (spec §4.4).
///
/// `records` must be non-empty; every output column has length `records.len()` (invariant C1),
/// enforced by construction since every builder is driven through exactly one pass over
/// `records`.
pub fn assemble(records: &[Record], schema: &TableSchema) -> IngestResult<RecordBatch> {
    if records.is_empty() {
        return Err(IngestError::Internal(
            "assemble called with an empty record set".to_string(),
        ));
    }

    let mut columns = Vec::with_capacity(schema.fields.len());
    for (field_index, field) in schema.fields.iter().enumerate() {
        let arrow_type = delta_type_to_arrow(&field.data_type);
        let mut builder = make_builder(&arrow_type, records.len());
        for record in records {
            let value = record.get(field_index).cloned().unwrap_or(Value::Null);
            append_value(builder.as_mut(), &arrow_type, &value, field.nullable, &field.name)?;
        }
        columns.push(builder.finish());
    }

    let arrow_schema_ref = arrow_schema(schema);
    Ok(RecordBatch::try_new(arrow_schema_ref, columns)?)
}

fn make_builder(data_type: &DataType, capacity: usize) -> Box<dyn ArrayBuilder> {
    match data_type {
        DataType::Int32 => Box::new(Int32Builder::with_capacity(capacity)),
        DataType::Int64 => Box::new(Int64Builder::with_capacity(capacity)),
        DataType::Float32 => Box::new(Float32Builder::with_capacity(capacity)),
        DataType::Float64 => Box::new(Float64Builder::with_capacity(capacity)),
        DataType::Boolean => Box::new(BooleanBuilder::with_capacity(capacity)),
        DataType::Utf8 => Box::new(StringBuilder::with_capacity(capacity, capacity * 16)),
        DataType::Binary => Box::new(BinaryBuilder::with_capacity(capacity, capacity * 16)),
        DataType::List(inner) => {
            let values_builder = make_builder(inner.data_type(), capacity);
            Box::new(ListBuilder::new(values_builder).with_field(inner.as_ref().clone()))
        }
        DataType::Map(entries_field, _) => {
            let DataType::Struct(fields) = entries_field.data_type() else {
                unreachable!("map entries field is always a struct");
            };
            let value_type = fields[1].data_type();
            let values_builder = make_builder(value_type, capacity);
            Box::new(MapBuilder::new(
                None,
                StringBuilder::with_capacity(capacity, capacity * 16),
                values_builder,
            ))
        }
        other => unreachable!("unsupported arrow builder target type: {other:?}"),
    }
}

/// Appends one coerced value onto `builder`. Mismatches that cannot be information-preservingly
/// coerced (spec §4.4) fail with `ValidationFailure`; a missing/null value on a non-nullable
/// column also fails.
fn append_value(
    builder: &mut dyn ArrayBuilder,
    data_type: &DataType,
    value: &Value,
    nullable: bool,
    field_name: &str,
) -> IngestResult<()> {
    if matches!(value, Value::Null) {
        if !nullable {
            return Err(IngestError::ValidationFailure(format!(
                "field '{field_name}' is non-nullable but value is missing"
            )));
        }
        append_null(builder, data_type, field_name)?;
        return Ok(());
    }

    match data_type {
        DataType::Int32 => {
            let v = match value {
                Value::I32(v) => *v,
                _ => return coercion_error(field_name, value, "int32"),
            };
            downcast_mut::<Int32Builder>(builder, field_name)?.append_value(v);
        }
        DataType::Int64 => {
            let v = match value {
                Value::I64(v) => *v,
                Value::I32(v) => *v as i64, // information-preserving widening
                _ => return coercion_error(field_name, value, "int64"),
            };
            downcast_mut::<Int64Builder>(builder, field_name)?.append_value(v);
        }
        DataType::Float32 => {
            let v = match value {
                Value::F32(v) => *v,
                _ => return coercion_error(field_name, value, "float32"),
            };
            downcast_mut::<Float32Builder>(builder, field_name)?.append_value(v);
        }
        DataType::Float64 => {
            let v = match value {
                Value::F64(v) => *v,
                Value::F32(v) => *v as f64, // information-preserving widening
                _ => return coercion_error(field_name, value, "float64"),
            };
            downcast_mut::<Float64Builder>(builder, field_name)?.append_value(v);
        }
        DataType::Boolean => {
            let v = match value {
                Value::Bool(v) => *v,
                _ => return coercion_error(field_name, value, "bool"),
            };
            downcast_mut::<BooleanBuilder>(builder, field_name)?.append_value(v);
        }
        DataType::Utf8 => {
            let v = match value {
                Value::Str(v) => v.clone(),
                // nested records are flattened to JSON strings at write time (spec §9)
                Value::Record(fields) => serde_json::to_string(&record_fields_to_json(fields))?,
                _ => return coercion_error(field_name, value, "string"),
            };
            downcast_mut::<StringBuilder>(builder, field_name)?.append_value(v);
        }
        DataType::Binary => {
            let v = match value {
                Value::Bytes(v) => v.clone(),
                _ => return coercion_error(field_name, value, "binary"),
            };
            downcast_mut::<BinaryBuilder>(builder, field_name)?.append_value(v);
        }
        DataType::List(inner) => {
            let Value::Array(items) = value else {
                return coercion_error(field_name, value, "array");
            };
            let list_builder = builder
                .as_any_mut()
                .downcast_mut::<ListBuilder<Box<dyn ArrayBuilder>>>()
                .ok_or_else(|| {
                    IngestError::Internal(format!("builder type mismatch for field '{field_name}'"))
                })?;
            for item in items {
                append_value(
                    list_builder.values().as_mut(),
                    inner.data_type(),
                    item,
                    inner.is_nullable(),
                    field_name,
                )?;
            }
            list_builder.append(true);
        }
        DataType::Map(entries_field, _) => {
            let Value::Map(entries) = value else {
                return coercion_error(field_name, value, "map");
            };
            let DataType::Struct(fields) = entries_field.data_type() else {
                unreachable!("map entries field is always a struct");
            };
            let value_type = fields[1].data_type().clone();
            let map_builder = builder
                .as_any_mut()
                .downcast_mut::<MapBuilder<StringBuilder, Box<dyn ArrayBuilder>>>()
                .ok_or_else(|| {
                    IngestError::Internal(format!("builder type mismatch for field '{field_name}'"))
                })?;
            for (key, entry_value) in entries {
                map_builder.keys().append_value(key);
                append_value(
                    map_builder.values().as_mut(),
                    &value_type,
                    entry_value,
                    fields[1].is_nullable(),
                    field_name,
                )?;
            }
            map_builder.append(true)?;
        }
        other => {
            return Err(IngestError::Internal(format!(
                "unsupported arrow append target type: {other:?}"
            )))
        }
    }
    Ok(())
}

fn append_null(builder: &mut dyn ArrayBuilder, data_type: &DataType, field_name: &str) -> IngestResult<()> {
    match data_type {
        DataType::Int32 => downcast_mut::<Int32Builder>(builder, field_name)?.append_null(),
        DataType::Int64 => downcast_mut::<Int64Builder>(builder, field_name)?.append_null(),
        DataType::Float32 => downcast_mut::<Float32Builder>(builder, field_name)?.append_null(),
        DataType::Float64 => downcast_mut::<Float64Builder>(builder, field_name)?.append_null(),
        DataType::Boolean => downcast_mut::<BooleanBuilder>(builder, field_name)?.append_null(),
        DataType::Utf8 => downcast_mut::<StringBuilder>(builder, field_name)?.append_null(),
        DataType::Binary => downcast_mut::<BinaryBuilder>(builder, field_name)?.append_null(),
        DataType::List(_) => {
            builder
                .as_any_mut()
                .downcast_mut::<ListBuilder<Box<dyn ArrayBuilder>>>()
                .ok_or_else(|| {
                    IngestError::Internal(format!("builder type mismatch for field '{field_name}'"))
                })?
                .append(false);
        }
        DataType::Map(..) => {
            builder
                .as_any_mut()
                .downcast_mut::<MapBuilder<StringBuilder, Box<dyn ArrayBuilder>>>()
                .ok_or_else(|| {
                    IngestError::Internal(format!("builder type mismatch for field '{field_name}'"))
                })?
                .append(false)?;
        }
        other => {
            return Err(IngestError::Internal(format!(
                "unsupported arrow null target type: {other:?}"
            )))
        }
    }
    Ok(())
}

fn downcast_mut<'a, T: ArrayBuilder>(
    builder: &'a mut dyn ArrayBuilder,
    field_name: &str,
) -> IngestResult<&'a mut T> {
    builder
        .as_any_mut()
        .downcast_mut::<T>()
        .ok_or_else(|| IngestError::Internal(format!("builder type mismatch for field '{field_name}'")))
}

fn coercion_error<T>(field_name: &str, value: &Value, expected: &str) -> IngestResult<T> {
    Err(IngestError::ValidationFailure(format!(
        "field '{field_name}' expected {expected}, got {value:?}"
    )))
}

fn record_fields_to_json(fields: &[(String, Value)]) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = fields
        .iter()
        .map(|(k, v)| (k.clone(), value_to_json(v)))
        .collect();
    serde_json::Value::Object(map)
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::I32(i) => serde_json::json!(i),
        Value::I64(i) => serde_json::json!(i),
        Value::F32(f) => serde_json::json!(f),
        Value::F64(f) => serde_json::json!(f),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(base64::encode(b)),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(entries) => {
            let map: serde_json::Map<String, serde_json::Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
        Value::Record(fields) => record_fields_to_json(fields),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DeltaField, DeltaType};

    fn simple_schema() -> TableSchema {
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

    #[test]
    fn assembles_equal_length_columns() {
        let schema = simple_schema();
        let records = vec![
            Record::new(vec![Value::Str("a".into()), Value::I32(1)]),
            Record::new(vec![Value::Str("b".into()), Value::Null]),
        ];
        let batch = assemble(&records, &schema).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.column(0).len(), batch.column(1).len());
        assert_eq!(batch.column(1).null_count(), 1);
    }

    #[test]
    fn missing_non_nullable_field_fails() {
        let schema = simple_schema();
        let records = vec![Record::new(vec![Value::Null, Value::I32(1)])];
        let err = assemble(&records, &schema).unwrap_err();
        assert!(matches!(err, IngestError::ValidationFailure(_)));
    }

    #[test]
    fn int32_widens_to_int64() {
        let schema = TableSchema {
            fields: vec![DeltaField {
                name: "big".to_string(),
                data_type: DeltaType::Long,
                nullable: false,
            }],
            partition_columns: vec![],
        };
        let records = vec![Record::new(vec![Value::I32(7)])];
        let batch = assemble(&records, &schema).unwrap();
        assert_eq!(batch.num_rows(), 1);
    }

    #[test]
    fn all_null_nullable_column_is_valid() {
        let schema = simple_schema();
        let records = vec![
            Record::new(vec![Value::Str("a".into()), Value::Null]),
            Record::new(vec![Value::Str("b".into()), Value::Null]),
        ];
        let batch = assemble(&records, &schema).unwrap();
        assert_eq!(batch.column(1).null_count(), 2);
    }

    #[test]
    fn empty_records_is_rejected() {
        let schema = simple_schema();
        let err = assemble(&[], &schema).unwrap_err();
        assert!(matches!(err, IngestError::Internal(_)));
    }

    #[test]
    fn nested_record_bytes_are_base64_encoded_in_the_flattened_json() {
        let schema = TableSchema {
            fields: vec![DeltaField {
                name: "payload".to_string(),
                data_type: DeltaType::String,
                nullable: false,
            }],
            partition_columns: vec![],
        };
        let records = vec![Record::new(vec![Value::Record(vec![(
            "blob".to_string(),
            Value::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]),
        )])])];
        let batch = assemble(&records, &schema).unwrap();
        let column = batch.column(0).as_any().downcast_ref::<arrow_array::StringArray>().unwrap();
        let flattened: serde_json::Value = serde_json::from_str(column.value(0)).unwrap();
        assert_eq!(flattened["blob"], serde_json::Value::String(base64::encode([0xDE, 0xAD, 0xBE, 0xEF])));
    }
}
