//! [`WriteEngine`]: the facade implementing spec §6's Core API. Wires the Write Queue, Commit
//! Coordinator, Metadata Cache, Checkpointer, and Entity Metadata Registry together and owns the
//! background dispatcher/commit-worker tasks for the engine's lifetime.

use std::sync::Arc;
use std::time::Duration;

use object_store::ObjectStore;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::checkpoint::Checkpointer;
use crate::commit::CommitCoordinator;
use crate::config::{EngineConfig, EvolutionPolicy};
use crate::error::{IngestError, IngestResult};
use crate::metadata_cache::MetadataCache;
use crate::metrics::{CommitCounters, MetricsSnapshot};
use crate::registry::EntityRegistry;
use crate::value::{Record, RecordSchema};
use crate::write_queue::{self, SharedDispatchMetrics, WriteQueueHandle};
use crate::Version;

/// The write-path storage engine's external facade (spec §6's Core API).
///
/// Construction spawns two kinds of background task for the engine's lifetime (spec §9
/// "Background workers and shutdown"): one dispatcher task draining the Write Queue on its
/// configured cadence, and per-batch commit work bounded to `commit_workers` concurrent commits
/// via a semaphore (spec §5's "fixed commit-worker pool").
pub struct WriteEngine {
    queue: WriteQueueHandle,
    registry: Arc<EntityRegistry>,
    metadata_cache: Arc<MetadataCache>,
    checkpointer: Arc<Checkpointer>,
    commit_counters: Arc<CommitCounters>,
    dispatch_metrics: Arc<SharedDispatchMetrics>,
    config: EngineConfig,
    dispatcher_handle: JoinHandle<()>,
}

impl WriteEngine {
    /// Builds a new engine over `store`, validating `config` first (spec §0.3).
    pub fn new(config: EngineConfig, store: Arc<dyn ObjectStore>) -> IngestResult<Self> {
        config.validate()?;

        let registry = Arc::new(EntityRegistry::new(config.registry_capacity));
        let metadata_cache = Arc::new(MetadataCache::new(
            config.metadata_cache_capacity,
            config.cache_ttl(),
        ));
        let checkpointer = Arc::new(Checkpointer::new(Arc::clone(&store), config.clone()));
        let commit_counters = Arc::new(CommitCounters::default());
        let commit_coordinator = Arc::new(CommitCoordinator::new(
            Arc::clone(&store),
            config.clone(),
            Arc::clone(&metadata_cache),
            Arc::clone(&checkpointer),
            Arc::clone(&commit_counters),
        ));

        let (queue, mut dispatcher) = write_queue::channel(config.clone());
        let dispatch_metrics = dispatcher.metrics_handle();
        let commit_permits = Arc::new(Semaphore::new(config.commit_workers.max(1)));
        let dispatch_registry = Arc::clone(&registry);

        let dispatcher_handle = tokio::spawn(async move {
            dispatcher
                .run(move |batch| {
                    let registry = Arc::clone(&dispatch_registry);
                    let coordinator = Arc::clone(&commit_coordinator);
                    let permits = Arc::clone(&commit_permits);
                    tokio::spawn(async move {
                        let _permit = permits.acquire_owned().await.expect("semaphore not closed");
                        let table_name = batch.table_name.clone();
                        match registry.get(&table_name).await {
                            Some(entity) => {
                                if let Err(err) = coordinator.commit_batch(entity, batch).await {
                                    warn!(table = %table_name, error = %err, "batch commit failed");
                                }
                            }
                            None => {
                                warn!(table = %table_name, "batch drained for an unregistered table");
                                let err = IngestError::UnknownTable(table_name);
                                batch.resolve_failure(err.category(), err.to_string());
                            }
                        }
                    });
                })
                .await;
            info!("dispatcher loop exited");
        });

        Ok(Self {
            queue,
            registry,
            metadata_cache,
            checkpointer,
            commit_counters,
            dispatch_metrics,
            config,
            dispatcher_handle,
        })
    }

    /// Enqueues `records` for `table_name` and awaits their commit (spec §6 `write`).
    ///
    /// Fails fast with [`IngestError::UnknownTable`] if no entity is registered; the registry
    /// check happens here so an unregistered write never occupies queue capacity (spec §3
    /// invariant E1). Enforces the per-request deadline (`write_timeout_ms`, spec §5).
    #[tracing::instrument(skip(self, records), fields(table = %table_name, rows = records.len()))]
    pub async fn write(&self, table_name: &str, records: Vec<Record>) -> IngestResult<Version> {
        if self.registry.get(table_name).await.is_none() {
            return Err(IngestError::UnknownTable(table_name.to_string()));
        }

        let handle = self.queue.enqueue(table_name.to_string(), records)?;
        match tokio::time::timeout(self.config.write_timeout(), handle.wait()).await {
            Ok(result) => result,
            Err(_elapsed) => Err(IngestError::Timeout(self.config.write_timeout())),
        }
    }

    /// Inserts or atomically replaces an entity registry entry (spec §6 `register_entity`).
    pub async fn register_entity(
        &self,
        table_name: &str,
        record_schema: RecordSchema,
        primary_key_column: String,
        partition_columns: Vec<String>,
        evolution_policy: EvolutionPolicy,
    ) -> IngestResult<()> {
        self.registry
            .register(
                table_name,
                record_schema,
                primary_key_column,
                partition_columns,
                evolution_policy,
            )
            .await
    }

    /// A point-in-time snapshot of every engine counter/gauge (spec §6 `metrics`).
    pub async fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot::from_parts(
            &self.commit_counters,
            &self.checkpointer,
            self.dispatch_metrics.snapshot(),
            self.queue.depth(),
            self.registry.len().await as u64,
            self.metadata_cache.len().await as u64,
        )
    }

    /// Drains the write queue with a finite deadline, then resolves any remaining handles with
    /// `Cancelled` (spec §9 "Background workers and shutdown"). Returns once the dispatcher loop
    /// has exited or the deadline elapses, whichever comes first.
    pub async fn shutdown(self, drain_deadline: Duration) {
        drop(self.queue);
        match tokio::time::timeout(drain_deadline, self.dispatcher_handle).await {
            Ok(Ok(())) => info!("engine shut down cleanly"),
            Ok(Err(err)) => warn!(error = %err, "dispatcher task panicked during shutdown"),
            Err(_) => warn!("shutdown drain deadline elapsed; remaining requests are cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{FieldSchema, FieldType, Value};
    use object_store::memory::InMemory;

    fn test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.batch_timeout_ms = 5;
        config.base_path = "test-base".to_string();
        config
    }

    #[tokio::test]
    async fn write_to_unknown_table_fails_fast() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let engine = WriteEngine::new(test_config(), store).unwrap();
        let err = engine.write("ghost", vec![]).await.unwrap_err();
        assert!(matches!(err, IngestError::UnknownTable(_)));
    }

    #[tokio::test]
    async fn register_then_write_commits() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let engine = WriteEngine::new(test_config(), store).unwrap();
        let schema = RecordSchema::new(
            "users",
            vec![
                FieldSchema::new("user_id", FieldType::String, false),
                FieldSchema::new("email", FieldType::String, true),
            ],
        );
        engine
            .register_entity(
                "users",
                schema,
                "user_id".to_string(),
                vec![],
                EvolutionPolicy::BackwardCompatible,
            )
            .await
            .unwrap();

        let records = vec![Record::new(vec![
            Value::Str("u1".to_string()),
            Value::Str("u1@x".to_string()),
        ])];
        let version = engine.write("users", records).await.unwrap();
        assert_eq!(version, 0);
    }
}
