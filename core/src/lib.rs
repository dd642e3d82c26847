//! Write-optimized ingestion engine for Delta Lake tables over a generic
//! [`object_store::ObjectStore`] backend.
//!
//! This crate is the write-path storage engine: it turns self-describing
//! [`Record`](value::Record)s into columnar Parquet data files and commits them to a table's
//! Delta transaction log under optimistic concurrency control. The HTTP surface, input
//! validation, configuration loading, metrics export, and the read path are deliberately left
//! to callers of this crate.
//!
//! The entry point is [`engine::WriteEngine`].

pub mod actions;
pub mod batch;
pub mod checkpoint;
pub mod commit;
pub mod config;
pub mod engine;
pub mod error;
pub mod metadata_cache;
pub mod metrics;
pub mod parquet_writer;
pub mod path;
pub mod registry;
pub mod schema;
pub mod value;
pub mod write_queue;

pub use config::EngineConfig;
pub use engine::WriteEngine;
pub use error::{IngestError, IngestResult};
pub use value::{Record, RecordSchema, Value};

/// Table commit version. Mirrors the Delta `_delta_log/<version>.json` numbering: monotonically
/// increasing per table, starting at 0.
pub type Version = u64;
