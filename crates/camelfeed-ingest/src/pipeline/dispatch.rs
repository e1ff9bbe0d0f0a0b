//! Persistence dispatcher.
//!
//! The consumer loop hands each commit's classified writes to a
//! [`Dispatcher`] and moves on. A fixed pool of worker threads applies the
//! writes to the [`PostStore`].
//!
//! # Ordering
//!
//! Batches are routed by a hash of the repository DID, so every write for a
//! given repository (and therefore every write for a given post URI) goes
//! through the same worker queue in stream order. Within a batch deletes run
//! before inserts.
//!
//! # Backpressure
//!
//! Each worker has a bounded queue. [`Dispatcher::dispatch`] awaits queue
//! space, so a slow store slows the consumer instead of growing memory.
//!
//! # Failures
//!
//! A failed batch is logged and counted. It does not stop the worker or the
//! consumer loop. A store that panics is treated the same way: the panic is
//! caught per batch and the worker moves on to the next one.
//!
//! # Concurrency
//!
//! Workers only write in parallel if the store allows it. [`SqliteStore`]
//! serializes every statement behind a single connection mutex, so with it
//! the pool mainly buys per-repository ordering and a buffer between intake
//! and disk. Cursor checkpoints from the consumer share that mutex and can
//! wait briefly behind a worker's batch.
//!
//! [`SqliteStore`]: super::SqliteStore

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use camelfeed_core::MatchedPost;
use metrics::{counter, histogram};
use tokio::sync::mpsc;

use super::store::PostStore;
use crate::{Error, Result};

/// Writes derived from one commit event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistBatch {
    /// Sequence number of the originating commit.
    pub seq: u64,
    /// Repository DID, used for routing.
    pub repo: String,
    /// URIs to delete.
    pub deletes: Vec<String>,
    /// Matched posts to insert.
    pub creates: Vec<MatchedPost>,
}

impl PersistBatch {
    /// True if the batch carries no writes.
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.creates.is_empty()
    }
}

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Queue capacity per worker.
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

/// Dispatcher counters.
#[derive(Debug, Default)]
struct Counters {
    batches_applied: AtomicU64,
    batches_failed: AtomicU64,
    posts_deleted: AtomicU64,
    posts_inserted: AtomicU64,
}

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Batches applied without error.
    pub batches_applied: u64,
    /// Batches where a delete or insert failed.
    pub batches_failed: u64,
    /// URIs submitted for deletion in successful delete steps.
    pub posts_deleted: u64,
    /// Posts submitted for insert in successful insert steps.
    pub posts_inserted: u64,
}

/// Fixed pool of persistence workers.
pub struct Dispatcher {
    senders: Vec<mpsc::Sender<PersistBatch>>,
    handles: Vec<thread::JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl Dispatcher {
    /// Spawn the worker threads.
    pub fn start(config: DispatchConfig, store: Arc<dyn PostStore>) -> Result<Self> {
        if config.workers == 0 {
            return Err(Error::Config("dispatcher needs at least one worker".into()));
        }
        if config.queue_capacity == 0 {
            return Err(Error::Config("dispatch queue capacity must be > 0".into()));
        }

        let counters = Arc::new(Counters::default());
        let mut senders = Vec::with_capacity(config.workers);
        let mut handles = Vec::with_capacity(config.workers);

        for id in 0..config.workers {
            let (tx, rx) = mpsc::channel(config.queue_capacity);
            let store = Arc::clone(&store);
            let counters = Arc::clone(&counters);

            let handle = thread::Builder::new()
                .name(format!("dispatch-{id}"))
                .spawn(move || worker_loop(id, rx, store, counters))?;

            senders.push(tx);
            handles.push(handle);
        }

        tracing::info!(
            "Dispatcher started: {} workers, queue capacity {}",
            config.workers,
            config.queue_capacity
        );

        Ok(Self {
            senders,
            handles,
            counters,
        })
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    /// Index of the worker that handles `repo`.
    pub fn worker_for(&self, repo: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        repo.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Enqueue a batch, waiting for queue space. Empty batches are dropped.
    pub async fn dispatch(&self, batch: PersistBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let worker = self.worker_for(&batch.repo);
        counter!("dispatch_batches_total").increment(1);

        self.senders[worker]
            .send(batch)
            .await
            .map_err(|e| Error::ChannelSend(format!("worker {worker} closed: seq {}", e.0.seq)))
    }

    /// Close the queues, wait for workers to drain them, and return final
    /// counters.
    pub fn shutdown(self) -> DispatchStats {
        let Self {
            senders,
            handles,
            counters,
        } = self;

        drop(senders);

        for handle in handles {
            if let Err(e) = handle.join() {
                tracing::error!("Dispatch worker panicked: {:?}", e);
            }
        }

        let stats = counters.snapshot();
        tracing::info!(
            "Dispatcher drained: {} batches applied, {} failed",
            stats.batches_applied,
            stats.batches_failed
        );
        stats
    }
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            batches_applied: self.batches_applied.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            posts_deleted: self.posts_deleted.load(Ordering::Relaxed),
            posts_inserted: self.posts_inserted.load(Ordering::Relaxed),
        }
    }
}

fn worker_loop(
    id: usize,
    mut rx: mpsc::Receiver<PersistBatch>,
    store: Arc<dyn PostStore>,
    counters: Arc<Counters>,
) {
    tracing::debug!("Dispatch worker {} started", id);

    while let Some(batch) = rx.blocking_recv() {
        let start = Instant::now();
        let ok = panic::catch_unwind(AssertUnwindSafe(|| {
            apply_batch(store.as_ref(), &batch, &counters)
        }))
        .unwrap_or_else(|payload| {
            tracing::error!(
                seq = batch.seq,
                worker = id,
                "could not handle message: store panicked: {}",
                panic_message(payload.as_ref())
            );
            counter!("dispatch_errors_total", "op" => "panic").increment(1);
            false
        });
        histogram!("dispatch_batch_duration_seconds").record(start.elapsed().as_secs_f64());

        if ok {
            counters.batches_applied.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.batches_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    tracing::debug!("Dispatch worker {} stopped", id);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Apply one batch: deletes, then inserts. Returns false if either step failed.
///
/// A failed delete does not skip the inserts.
fn apply_batch(store: &dyn PostStore, batch: &PersistBatch, counters: &Counters) -> bool {
    let mut ok = true;

    if !batch.deletes.is_empty() {
        match store.remove_by_uri(&batch.deletes) {
            Ok(()) => {
                counters
                    .posts_deleted
                    .fetch_add(batch.deletes.len() as u64, Ordering::Relaxed);
                counter!("dispatch_posts_deleted_total").increment(batch.deletes.len() as u64);
            }
            Err(e) => {
                tracing::error!(seq = batch.seq, "could not handle message: delete failed: {}", e);
                counter!("dispatch_errors_total", "op" => "delete").increment(1);
                ok = false;
            }
        }
    }

    if !batch.creates.is_empty() {
        match store.insert_ignoring_conflicts(&batch.creates) {
            Ok(()) => {
                counters
                    .posts_inserted
                    .fetch_add(batch.creates.len() as u64, Ordering::Relaxed);
                counter!("dispatch_posts_inserted_total").increment(batch.creates.len() as u64);
            }
            Err(e) => {
                tracing::error!(seq = batch.seq, "could not handle message: insert failed: {}", e);
                counter!("dispatch_errors_total", "op" => "insert").increment(1);
                ok = false;
            }
        }
    }

    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SqliteStore;
    use chrono::Utc;
    use parking_lot::Mutex;

    fn matched(uri: &str) -> MatchedPost {
        MatchedPost {
            uri: uri.to_string(),
            cid: "bafy".to_string(),
            indexed_at: Utc::now(),
        }
    }

    /// Records calls in order.
    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<String>>,
    }

    impl PostStore for RecordingStore {
        fn remove_by_uri(&self, uris: &[String]) -> Result<()> {
            self.calls.lock().push(format!("delete {}", uris.join(",")));
            Ok(())
        }

        fn insert_ignoring_conflicts(&self, posts: &[MatchedPost]) -> Result<()> {
            let uris: Vec<_> = posts.iter().map(|p| p.uri.as_str()).collect();
            self.calls.lock().push(format!("insert {}", uris.join(",")));
            Ok(())
        }
    }

    /// Fails every call.
    struct FailingStore;

    impl PostStore for FailingStore {
        fn remove_by_uri(&self, _uris: &[String]) -> Result<()> {
            Err(Error::Database("store unavailable".into()))
        }

        fn insert_ignoring_conflicts(&self, _posts: &[MatchedPost]) -> Result<()> {
            Err(Error::Database("store unavailable".into()))
        }
    }

    /// Panics on any insert containing `poison`, records the rest.
    struct PanickingStore {
        poison: String,
        inner: RecordingStore,
    }

    impl PostStore for PanickingStore {
        fn remove_by_uri(&self, uris: &[String]) -> Result<()> {
            self.inner.remove_by_uri(uris)
        }

        fn insert_ignoring_conflicts(&self, posts: &[MatchedPost]) -> Result<()> {
            if posts.iter().any(|p| p.uri == self.poison) {
                panic!("corrupt row for {}", self.poison);
            }
            self.inner.insert_ignoring_conflicts(posts)
        }
    }

    #[test]
    fn test_rejects_zero_workers() {
        let store: Arc<dyn PostStore> = Arc::new(RecordingStore::default());
        let config = DispatchConfig {
            workers: 0,
            queue_capacity: 8,
        };
        assert!(matches!(
            Dispatcher::start(config, store),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_apply_batch_deletes_before_inserts() {
        let store = RecordingStore::default();
        let counters = Counters::default();
        let batch = PersistBatch {
            seq: 1,
            repo: "did:plc:a".into(),
            deletes: vec!["at://a/1".into()],
            creates: vec![matched("at://a/2")],
        };

        assert!(apply_batch(&store, &batch, &counters));
        assert_eq!(
            *store.calls.lock(),
            vec!["delete at://a/1".to_string(), "insert at://a/2".to_string()]
        );
        assert_eq!(counters.snapshot().posts_deleted, 1);
        assert_eq!(counters.snapshot().posts_inserted, 1);
    }

    #[test]
    fn test_apply_batch_failure_is_reported() {
        let counters = Counters::default();
        let batch = PersistBatch {
            seq: 1,
            repo: "did:plc:a".into(),
            deletes: vec!["at://a/1".into()],
            creates: vec![matched("at://a/2")],
        };

        assert!(!apply_batch(&FailingStore, &batch, &counters));
        assert_eq!(counters.snapshot(), DispatchStats::default());
    }

    #[test]
    fn test_worker_for_is_stable() {
        let store: Arc<dyn PostStore> = Arc::new(RecordingStore::default());
        let dispatcher = Dispatcher::start(DispatchConfig::default(), store).unwrap();

        let first = dispatcher.worker_for("did:plc:abc");
        for _ in 0..10 {
            assert_eq!(dispatcher.worker_for("did:plc:abc"), first);
        }
        assert!(first < dispatcher.workers());

        dispatcher.shutdown();
    }

    #[tokio::test]
    async fn test_dispatch_preserves_order_per_repo() {
        let store = Arc::new(RecordingStore::default());
        let dispatcher = Dispatcher::start(
            DispatchConfig {
                workers: 3,
                queue_capacity: 2,
            },
            store.clone(),
        )
        .unwrap();

        for i in 0..20 {
            dispatcher
                .dispatch(PersistBatch {
                    seq: i,
                    repo: "did:plc:same".into(),
                    deletes: vec![],
                    creates: vec![matched(&format!("at://same/{i}"))],
                })
                .await
                .unwrap();
        }

        let stats = dispatcher.shutdown();
        assert_eq!(stats.batches_applied, 20);

        let expected: Vec<String> = (0..20).map(|i| format!("insert at://same/{i}")).collect();
        assert_eq!(*store.calls.lock(), expected);
    }

    #[tokio::test]
    async fn test_empty_batch_is_dropped() {
        let store = Arc::new(RecordingStore::default());
        let dispatcher = Dispatcher::start(DispatchConfig::default(), store.clone()).unwrap();

        dispatcher
            .dispatch(PersistBatch {
                seq: 7,
                repo: "did:plc:a".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let stats = dispatcher.shutdown();
        assert_eq!(stats.batches_applied, 0);
        assert!(store.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failing_store_keeps_worker_alive() {
        let dispatcher = Dispatcher::start(
            DispatchConfig {
                workers: 1,
                queue_capacity: 4,
            },
            Arc::new(FailingStore),
        )
        .unwrap();

        for i in 0..5 {
            dispatcher
                .dispatch(PersistBatch {
                    seq: i,
                    repo: "did:plc:a".into(),
                    deletes: vec![],
                    creates: vec![matched("at://a/1")],
                })
                .await
                .unwrap();
        }

        let stats = dispatcher.shutdown();
        assert_eq!(stats.batches_failed, 5);
        assert_eq!(stats.batches_applied, 0);
    }

    #[tokio::test]
    async fn test_dispatch_into_sqlite() {
        let store = Arc::new(SqliteStore::open_in_memory("test").unwrap());
        let dispatcher = Dispatcher::start(DispatchConfig::default(), store.clone()).unwrap();

        dispatcher
            .dispatch(PersistBatch {
                seq: 1,
                repo: "did:plc:a".into(),
                deletes: vec![],
                creates: vec![matched("at://a/1"), matched("at://a/2")],
            })
            .await
            .unwrap();
        dispatcher
            .dispatch(PersistBatch {
                seq: 2,
                repo: "did:plc:a".into(),
                deletes: vec!["at://a/1".into()],
                creates: vec![],
            })
            .await
            .unwrap();

        dispatcher.shutdown();
        assert_eq!(store.post_count().unwrap(), 1);
        assert!(store.get_post("at://a/2").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_panicking_store_keeps_worker_alive() {
        let store = Arc::new(PanickingStore {
            poison: "at://a/3".into(),
            inner: RecordingStore::default(),
        });
        let dispatcher = Dispatcher::start(
            DispatchConfig {
                workers: 1,
                queue_capacity: 1,
            },
            store.clone(),
        )
        .unwrap();

        for i in 1..=6 {
            dispatcher
                .dispatch(PersistBatch {
                    seq: i,
                    repo: "did:plc:a".into(),
                    deletes: vec![],
                    creates: vec![matched(&format!("at://a/{i}"))],
                })
                .await
                .unwrap();
        }

        let stats = dispatcher.shutdown();
        assert_eq!(stats.batches_failed, 1);
        assert_eq!(stats.batches_applied, 5);
        assert_eq!(store.inner.calls.lock().len(), 5);
    }
}
