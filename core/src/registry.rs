//! Entity Metadata Registry (spec §4.9): table name -> `{primary key, partition columns,
//! evolution policy, schema}`. Reader-shared, writer-exclusive only for the brief atomic swap.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::EvolutionPolicy;
use crate::error::{IngestError, IngestResult};
use crate::schema::{self, TableSchema};
use crate::value::RecordSchema;

/// Registry entry for a single table (spec §3 `EntityMetadata`).
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    pub table_name: String,
    pub primary_key_column: String,
    pub partition_columns: Vec<String>,
    pub evolution_policy: EvolutionPolicy,
    pub record_schema: RecordSchema,
    pub table_schema: TableSchema,
}

/// Bounded in-memory keyed mapping from table name to [`EntityMetadata`] (spec §4.9).
///
/// A registration that would overwrite an existing entry builds the new `Arc<EntityMetadata>`
/// fully before taking the write lock, so the old entry stays visible to readers until the new
/// one is completely constructed (spec §4.9's atomicity requirement).
pub struct EntityRegistry {
    entries: RwLock<HashMap<String, Arc<EntityMetadata>>>,
    capacity: usize,
}

impl EntityRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub async fn get(&self, table_name: &str) -> Option<Arc<EntityMetadata>> {
        self.entries.read().await.get(table_name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Inserts a new entry or atomically replaces an existing one, validating schema evolution
    /// against the prior entry when the policy calls for it (spec §4.1, §4.9).
    pub async fn register(
        &self,
        table_name: &str,
        record_schema: RecordSchema,
        primary_key_column: String,
        partition_columns: Vec<String>,
        evolution_policy: EvolutionPolicy,
    ) -> IngestResult<()> {
        let table_schema = schema::translate(&record_schema, partition_columns.clone())?;

        let existing = self.get(table_name).await;
        if let Some(existing) = &existing {
            if matches!(evolution_policy, EvolutionPolicy::BackwardCompatible) {
                schema::check_backward_compatible(&existing.table_schema, &table_schema).map_err(
                    |e| match e {
                        IngestError::IncompatibleSchema { reason, .. } => {
                            IngestError::IncompatibleSchema {
                                table: table_name.to_string(),
                                reason,
                            }
                        }
                        other => other,
                    },
                )?;
            }
        } else if self.entries.read().await.len() >= self.capacity {
            return Err(IngestError::InvalidConfig(format!(
                "entity registry at capacity ({})",
                self.capacity
            )));
        }

        let entry = Arc::new(EntityMetadata {
            table_name: table_name.to_string(),
            primary_key_column,
            partition_columns,
            evolution_policy,
            record_schema,
            table_schema,
        });

        let mut entries = self.entries.write().await;
        entries.insert(table_name.to_string(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{FieldSchema, FieldType};

    fn simple_schema(name: &str) -> RecordSchema {
        RecordSchema::new(
            name,
            vec![
                FieldSchema::new("id", FieldType::String, false),
                FieldSchema::new("value", FieldType::I32, true),
            ],
        )
    }

    #[tokio::test]
    async fn register_then_get() {
        let registry = EntityRegistry::new(10);
        registry
            .register(
                "users",
                simple_schema("users"),
                "id".to_string(),
                vec![],
                EvolutionPolicy::BackwardCompatible,
            )
            .await
            .unwrap();
        assert!(registry.get("users").await.is_some());
        assert!(registry.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn rejects_incompatible_evolution_and_keeps_old_entry() {
        let registry = EntityRegistry::new(10);
        registry
            .register(
                "users",
                simple_schema("users"),
                "id".to_string(),
                vec![],
                EvolutionPolicy::BackwardCompatible,
            )
            .await
            .unwrap();

        let incompatible = RecordSchema::new(
            "users",
            vec![FieldSchema::new("id", FieldType::I32, false)],
        );
        let err = registry
            .register(
                "users",
                incompatible,
                "id".to_string(),
                vec![],
                EvolutionPolicy::BackwardCompatible,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::IncompatibleSchema { .. }));

        let entry = registry.get("users").await.unwrap();
        assert_eq!(entry.record_schema.fields.len(), 2);
    }

    #[tokio::test]
    async fn accepts_additive_evolution() {
        let registry = EntityRegistry::new(10);
        registry
            .register(
                "users",
                simple_schema("users"),
                "id".to_string(),
                vec![],
                EvolutionPolicy::BackwardCompatible,
            )
            .await
            .unwrap();

        let mut evolved = simple_schema("users");
        evolved
            .fields
            .push(FieldSchema::new("email", FieldType::String, true));
        registry
            .register(
                "users",
                evolved,
                "id".to_string(),
                vec![],
                EvolutionPolicy::BackwardCompatible,
            )
            .await
            .unwrap();
        assert_eq!(registry.get("users").await.unwrap().record_schema.fields.len(), 3);
    }
}
