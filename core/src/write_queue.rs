//! Write Queue (spec §4.6): a bounded MPSC structure that accepts per-table write requests and a
//! background dispatcher that coalesces them into per-table transaction-sized groups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::{ErrorCategory, IngestError, IngestResult};
use crate::value::Record;
use crate::{EngineConfig, Version};

/// What a request's completion handle is ultimately resolved with. A failure carries its original
/// [`ErrorCategory`] alongside the rendered message so `WriteHandle::wait` can reconstruct an
/// `IngestError` of the same category instead of collapsing every failure to `Internal` (spec
/// §7).
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    Committed(Version),
    Failed(ErrorCategory, String),
    Cancelled,
}

/// `WriteRequest` (spec §3): one caller's records for one table, owned by the queue until
/// grouped into a batch.
pub struct WriteRequest {
    pub table_name: String,
    pub records: Vec<Record>,
    pub enqueue_time: Instant,
    completion: oneshot::Sender<WriteOutcome>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

/// The caller-held half of a [`WriteRequest`]: resolves when the request's batch commits, fails
/// terminally, or is cancelled.
pub struct WriteHandle {
    receiver: oneshot::Receiver<WriteOutcome>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

impl WriteHandle {
    pub async fn wait(self) -> IngestResult<Version> {
        match self.receiver.await {
            Ok(WriteOutcome::Committed(version)) => Ok(version),
            Ok(WriteOutcome::Failed(category, message)) => {
                Err(IngestError::Categorized { category, message })
            }
            Ok(WriteOutcome::Cancelled) => Err(IngestError::Cancelled),
            Err(_) => Err(IngestError::Internal(
                "completion handle dropped without resolution".to_string(),
            )),
        }
    }

    /// Marks the request cancelled. Honored exactly if the dispatcher has not yet drained it
    /// (spec §5 "Cancellation and timeouts").
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// `WriteBatch` (spec §3): one or more coalesced requests for a single table, formed atomically
/// by the dispatcher's drain.
pub struct WriteBatch {
    pub table_name: String,
    pub records: Vec<Record>,
    completions: Vec<oneshot::Sender<WriteOutcome>>,
}

impl WriteBatch {
    /// Resolves every completion handle in the batch with the same version (success path).
    /// A handle must never be leaked unresolved (spec §4.7 "Failure isolation") — this consumes
    /// `self` so the compiler enforces every sender is used exactly once.
    pub fn resolve_success(self, version: Version) {
        for completion in self.completions {
            let _ = completion.send(WriteOutcome::Committed(version));
        }
    }

    /// Resolves every completion handle with the same terminal error category and message
    /// (failure path). Carrying the category lets every caller in the batch see the same error
    /// taxonomy classification the commit coordinator observed (spec §7).
    pub fn resolve_failure(self, category: ErrorCategory, message: String) {
        for completion in self.completions {
            let _ = completion.send(WriteOutcome::Failed(category, message.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A drained-but-not-yet-partitioned request, tracked so the dispatcher can skip cancelled
/// handles while preserving enqueue order within and across coalesced batches (spec §5).
struct DrainedRequest {
    table_name: String,
    records: Vec<Record>,
    completion: oneshot::Sender<WriteOutcome>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

/// The producer-facing side of the write queue.
#[derive(Clone)]
pub struct WriteQueueHandle {
    sender: mpsc::Sender<DrainedRequest>,
    depth: Arc<AtomicU64>,
}

impl WriteQueueHandle {
    /// Enqueues a write request. Returns immediately; never blocks the producer (spec §4.6).
    /// `QueueFull` is returned immediately with no side effects when the queue is at capacity.
    pub fn enqueue(&self, table_name: String, records: Vec<Record>) -> IngestResult<WriteHandle> {
        let (tx, rx) = oneshot::channel();
        let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let request = DrainedRequest {
            table_name,
            records,
            completion: tx,
            cancelled: Arc::clone(&cancelled),
        };
        match self.sender.try_send(request) {
            Ok(()) => {
                self.depth.fetch_add(1, Ordering::Relaxed);
                Ok(WriteHandle {
                    receiver: rx,
                    cancelled,
                })
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(IngestError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(IngestError::Internal(
                "write queue dispatcher has shut down".to_string(),
            )),
        }
    }

    pub fn depth(&self) -> u64 {
        self.depth.load(Ordering::Relaxed)
    }
}

/// Per-cycle coalescing counters (spec §4.6's "consolidation counter").
#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchMetrics {
    pub cycles: u64,
    pub requests_drained: u64,
    pub batches_formed: u64,
    pub consolidations: u64,
    pub cancelled: u64,
}

/// Atomic-backed counterpart of [`DispatchMetrics`], shared so a caller can read a live snapshot
/// after the owning [`Dispatcher`] has been moved into its background task (spec §6 `metrics()`
/// needs to see dispatch activity the engine facade no longer holds a direct handle to).
#[derive(Debug, Default)]
pub struct SharedDispatchMetrics {
    cycles: AtomicU64,
    requests_drained: AtomicU64,
    batches_formed: AtomicU64,
    consolidations: AtomicU64,
    cancelled: AtomicU64,
}

impl SharedDispatchMetrics {
    pub fn snapshot(&self) -> DispatchMetrics {
        DispatchMetrics {
            cycles: self.cycles.load(Ordering::Relaxed),
            requests_drained: self.requests_drained.load(Ordering::Relaxed),
            batches_formed: self.batches_formed.load(Ordering::Relaxed),
            consolidations: self.consolidations.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Background dispatcher: drains the queue on a fixed cadence (or when depth exceeds
/// `max_batch_size`), partitions by table, coalesces same-table partitions within a cycle, and
/// hands each resulting [`WriteBatch`] to `on_batch`.
pub struct Dispatcher {
    receiver: mpsc::Receiver<DrainedRequest>,
    depth: Arc<AtomicU64>,
    config: EngineConfig,
    metrics: Arc<SharedDispatchMetrics>,
}

/// Constructs a [`WriteQueueHandle`]/[`Dispatcher`] pair sized per `config.queue_capacity`.
pub fn channel(config: EngineConfig) -> (WriteQueueHandle, Dispatcher) {
    let (sender, receiver) = mpsc::channel(config.queue_capacity);
    let depth = Arc::new(AtomicU64::new(0));
    (
        WriteQueueHandle {
            sender,
            depth: Arc::clone(&depth),
        },
        Dispatcher {
            receiver,
            depth,
            config,
            metrics: Arc::new(SharedDispatchMetrics::default()),
        },
    )
}

impl Dispatcher {
    pub fn metrics(&self) -> DispatchMetrics {
        self.metrics.snapshot()
    }

    /// Clones the shared metrics handle out, for a caller to retain after `self` is moved into a
    /// background task (e.g. `tokio::spawn(dispatcher.run(...))`).
    pub fn metrics_handle(&self) -> Arc<SharedDispatchMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Runs the dispatch loop until the channel is closed (shutdown). `on_batch` is invoked once
    /// per per-table coalesced batch formed in a cycle; it should hand the batch to the commit
    /// coordinator without blocking the dispatcher for long (spawn if commit work is slow).
    pub async fn run<F>(&mut self, mut on_batch: F)
    where
        F: FnMut(WriteBatch),
    {
        let mut ticker = tokio::time::interval(self.config.batch_timeout());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                // wake immediately once depth crosses max_batch_size between ticks
                _ = self.wait_for_overflow() => {}
            }
            if !self.drain_cycle(&mut on_batch).await {
                break;
            }
        }
    }

    async fn wait_for_overflow(&self) {
        loop {
            if self.depth.load(Ordering::Relaxed) as usize > self.config.max_batch_size {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }

    /// Drains and dispatches one cycle's worth of requests. Returns `false` once the channel is
    /// closed and drained, signalling shutdown.
    #[tracing::instrument(skip_all)]
    async fn drain_cycle<F>(&mut self, on_batch: &mut F) -> bool
    where
        F: FnMut(WriteBatch),
    {
        let target = self.config.optimal_batch_size(self.depth.load(Ordering::Relaxed) as usize);
        let mut drained = Vec::with_capacity(target.min(4096));
        let mut channel_closed = false;

        // the mpsc channel itself provides the atomicity the spec calls for: `try_recv` either
        // returns a request that was fully enqueued or nothing at all, so there is no window in
        // which a dispatcher observes "empty" while racing a concurrent `enqueue`.
        while drained.len() < target {
            match self.receiver.try_recv() {
                Ok(request) => {
                    self.depth.fetch_sub(1, Ordering::Relaxed);
                    drained.push(request);
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    channel_closed = true;
                    break;
                }
            }
        }

        self.metrics.cycles.fetch_add(1, Ordering::Relaxed);
        self.metrics.requests_drained.fetch_add(drained.len() as u64, Ordering::Relaxed);

        if !drained.is_empty() {
            self.partition_and_dispatch(drained, on_batch);
        }

        !(channel_closed)
    }

    fn partition_and_dispatch<F>(&mut self, drained: Vec<DrainedRequest>, on_batch: &mut F)
    where
        F: FnMut(WriteBatch),
    {
        // preserve first-enqueued-first-appended order per table by walking the drain in order
        // and appending into per-table accumulators (spec §5's row-order guarantee).
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, (Vec<Record>, Vec<oneshot::Sender<WriteOutcome>>)> =
            HashMap::new();

        for request in drained {
            if request.cancelled.load(Ordering::SeqCst) {
                self.metrics.cancelled.fetch_add(1, Ordering::Relaxed);
                let _ = request.completion.send(WriteOutcome::Cancelled);
                debug!(table = %request.table_name, "skipping cancelled write request");
                continue;
            }
            let entry = groups.entry(request.table_name.clone()).or_insert_with(|| {
                order.push(request.table_name.clone());
                (Vec::new(), Vec::new())
            });
            if !entry.1.is_empty() {
                // a batch for this table already accrued this cycle: coalescing.
                self.metrics.consolidations.fetch_add(1, Ordering::Relaxed);
            }
            entry.0.extend(request.records);
            entry.1.push(request.completion);
        }

        for table_name in order {
            let Some((records, completions)) = groups.remove(&table_name) else {
                continue;
            };
            if records.is_empty() {
                continue;
            }
            self.metrics.batches_formed.fetch_add(1, Ordering::Relaxed);
            on_batch(WriteBatch {
                table_name,
                records,
                completions,
            });
        }
    }
}
