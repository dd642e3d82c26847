//! Engine configuration (spec §6's "Configuration surface" table). Loading from environment or
//! file formats is the request-handler layer's concern; this struct only defines the recognized
//! keys, their defaults, and validates them.

use std::time::Duration;

use crate::error::{IngestError, IngestResult};

/// Backend a table's root URI resolves against (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    S3A,
    Local,
    Hdfs,
    Azure,
    Gcs,
}

/// How partition values are derived for a written record (spec's configuration table names
/// this knob; actual partitioning is driven by the table's declared partition columns, the
/// strategy selects how values are *computed* when a record doesn't carry them literally).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PartitionStrategy {
    #[default]
    None,
    DateBased,
    HashBased,
    RangeBased,
    Custom,
}

/// Parquet compression codec (spec's `compression_codec` key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionCodec {
    #[default]
    Snappy,
    Gzip,
    Zstd,
    Uncompressed,
}

/// Schema evolution policy for a registered entity (spec §3 `EntityMetadata`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EvolutionPolicy {
    #[default]
    BackwardCompatible,
    ForwardCompatible,
    Full,
    None,
}

/// Every recognized configuration key from spec §6, with the documented defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub batch_timeout_ms: u64,
    pub max_batch_size: usize,
    pub max_retries: u32,
    pub checkpoint_interval: u64,
    pub connection_pool_size: usize,
    pub write_timeout_ms: u64,
    pub commit_workers: usize,
    pub cache_ttl_ms: u64,
    pub schema_cache_ttl_ms: u64,
    pub evolution_policy: EvolutionPolicy,
    /// Root of the configured storage backend under which every table's root URI is resolved
    /// (spec §4.2's `base-path` input). E.g. a bucket name for `S3A`, a filesystem root for
    /// `LOCAL`.
    pub base_path: String,
    pub storage_type: StorageType,
    pub partition_strategy: PartitionStrategy,
    pub parquet_block_bytes: usize,
    pub compression_codec: CompressionCodec,
    /// Write queue capacity. Not individually named in spec §6's table, but spec §4.6 fixes its
    /// default at `10 * max_batch_size`; exposed so callers can override it explicitly.
    pub queue_capacity: usize,
    /// Cache bound (spec §4.3 "Bounded size contract").
    pub metadata_cache_capacity: usize,
    /// Entity registry bound, same rationale as the metadata cache.
    pub registry_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let max_batch_size = 1000;
        Self {
            batch_timeout_ms: 50,
            max_batch_size,
            max_retries: 3,
            checkpoint_interval: 10,
            connection_pool_size: 200,
            write_timeout_ms: 30_000,
            commit_workers: 2,
            cache_ttl_ms: 30_000,
            schema_cache_ttl_ms: 300_000,
            evolution_policy: EvolutionPolicy::BackwardCompatible,
            base_path: ".".to_string(),
            storage_type: StorageType::Local,
            partition_strategy: PartitionStrategy::None,
            parquet_block_bytes: 256 * 1024 * 1024,
            compression_codec: CompressionCodec::Snappy,
            queue_capacity: 10 * max_batch_size,
            metadata_cache_capacity: 1000,
            registry_capacity: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn schema_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.schema_cache_ttl_ms)
    }

    /// `calculate_optimal_batch_size()` from spec §4.6, parameterized by the current queue
    /// depth.
    pub fn optimal_batch_size(&self, current_depth: usize) -> usize {
        let base = self.max_batch_size;
        if current_depth > 1000 {
            (2 * base).min(10_000)
        } else if current_depth > 100 {
            base
        } else {
            (base / 2).max(10)
        }
    }

    /// Rejects configurations that would make the engine's invariants unsatisfiable.
    pub fn validate(&self) -> IngestResult<()> {
        if self.max_batch_size == 0 {
            return Err(IngestError::InvalidConfig(
                "max_batch_size must be > 0".into(),
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(IngestError::InvalidConfig(
                "checkpoint_interval must be > 0".into(),
            ));
        }
        if self.commit_workers == 0 {
            return Err(IngestError::InvalidConfig(
                "commit_workers must be >= 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(IngestError::InvalidConfig(
                "queue_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}
