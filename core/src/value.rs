//! The self-describing record model (spec §3, §9). A `Record` is an ordered row of typed
//! [`Value`]s bound to a [`RecordSchema`]; field access is by ordinal after schema binding, so no
//! runtime reflection is needed once a record is constructed against its schema.

use std::collections::HashSet;

use crate::error::{IngestError, IngestResult};

/// A tagged-union value, matching spec §9's polymorphism-over-record-types design note.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(Vec<(String, Value)>),
    Record(Vec<(String, Value)>),
}

/// The primitive/structural type universe a record field may carry (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Binary,
    Enum,
    Array(Box<FieldType>),
    Map(Box<FieldType>),
    /// A nested record, identified by name so self-referential cycles can be detected.
    Record(RecordSchema),
}

/// A single field in a record schema: name, type, and nullability.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable,
        }
    }
}

/// A self-describing record schema: a name plus an ordered list of fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl RecordSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Walks the schema looking for a record type that references its own name, transitively.
    /// Grounded on spec §4.1's "Cycles in the record-schema ... fail with UnsupportedSchema."
    pub fn check_acyclic(&self) -> IngestResult<()> {
        let mut visiting = HashSet::new();
        Self::check_acyclic_inner(&self.name, &self.fields, &mut visiting)
    }

    fn check_acyclic_inner(
        name: &str,
        fields: &[FieldSchema],
        visiting: &mut HashSet<String>,
    ) -> IngestResult<()> {
        if !visiting.insert(name.to_string()) {
            return Err(IngestError::UnsupportedSchema(format!(
                "cyclic record schema detected at '{name}'"
            )));
        }
        for field in fields {
            Self::check_field_acyclic(&field.field_type, visiting)?;
        }
        visiting.remove(name);
        Ok(())
    }

    fn check_field_acyclic(
        field_type: &FieldType,
        visiting: &mut HashSet<String>,
    ) -> IngestResult<()> {
        match field_type {
            FieldType::Array(inner) | FieldType::Map(inner) => {
                Self::check_field_acyclic(inner, visiting)
            }
            FieldType::Record(nested) => {
                Self::check_acyclic_inner(&nested.name, &nested.fields, visiting)
            }
            _ => Ok(()),
        }
    }
}

/// A single row bound to a [`RecordSchema`]: values in schema field order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}
