//! Metadata Cache (spec §4.3): per-table `{schema, snapshot_version, ...}` with a TTL and
//! explicit invalidation, bounded by an LRU eviction policy so dynamic entity registration can't
//! grow it without bound.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tokio::sync::{Mutex, RwLock};

use crate::error::IngestResult;
use crate::schema::TableSchema;
use crate::Version;

/// `CachedTableMetadata` (spec §3): the schema and latest known snapshot version for a table, as
/// of `loaded_at`. `snapshot_version` here is a read-path convenience only — the Commit
/// Coordinator always reads the log directly to determine a transaction's base version (spec §3
/// invariant on `CachedTableMetadata`).
#[derive(Debug, Clone)]
pub struct CachedTableMetadata {
    pub schema: TableSchema,
    pub snapshot_version: Version,
    pub loaded_at: Instant,
}

struct Entry {
    metadata: Arc<CachedTableMetadata>,
}

/// Per-key single-flight load guard plus the LRU-ordered backing map.
struct Inner {
    entries: IndexMap<String, Entry>,
    capacity: usize,
}

/// A bounded, TTL-expiring cache of per-table metadata (spec §4.3).
///
/// Concurrent readers may observe the current entry; on a miss, exactly one loader runs per key
/// (a per-key `tokio::sync::Mutex` serializes misses onto a single load) while other missers
/// await that same load rather than stampeding the object store.
pub struct MetadataCache {
    inner: RwLock<Inner>,
    load_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    ttl: Duration,
}

impl MetadataCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: IndexMap::new(),
                capacity,
            }),
            load_locks: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the cached entry for `table` if present and not expired, without triggering a
    /// load.
    pub async fn peek(&self, table: &str) -> Option<Arc<CachedTableMetadata>> {
        let inner = self.inner.read().await;
        let entry = inner.entries.get(table)?;
        if entry.metadata.loaded_at.elapsed() > self.ttl {
            return None;
        }
        Some(Arc::clone(&entry.metadata))
    }

    /// Returns the cached entry for `table`, invoking `loader` on a miss or TTL expiry.
    /// Concurrent callers racing on the same key share one in-flight load.
    pub async fn get_or_load<F, Fut>(&self, table: &str, loader: F) -> IngestResult<Arc<CachedTableMetadata>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = IngestResult<CachedTableMetadata>>,
    {
        if let Some(cached) = self.peek(table).await {
            return Ok(cached);
        }

        let lock = {
            let mut locks = self.load_locks.lock().await;
            Arc::clone(
                locks
                    .entry(table.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let _guard = lock.lock().await;

        // Re-check: another waiter on the same lock may have just populated the entry.
        if let Some(cached) = self.peek(table).await {
            return Ok(cached);
        }

        let loaded = loader().await?;
        let metadata = Arc::new(loaded);
        self.insert(table, Arc::clone(&metadata)).await;
        Ok(metadata)
    }

    async fn insert(&self, table: &str, metadata: Arc<CachedTableMetadata>) {
        let mut inner = self.inner.write().await;
        inner.entries.shift_remove(table);
        inner.entries.insert(table.to_string(), Entry { metadata });
        while inner.entries.len() > inner.capacity {
            inner.entries.shift_remove_index(0);
        }
    }

    /// Explicit invalidation: called after a successful commit, before the caller's handle is
    /// resolved (spec §4.3).
    pub async fn invalidate(&self, table: &str) {
        let mut inner = self.inner.write().await;
        inner.entries.shift_remove(table);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }
}
