use logpulse_kernel::{ChunkId, LogRecord};
use logpulse_node::config::{Config, IngestConfig, OverflowPolicy};
use logpulse_node::coordinator::{BatchWriter, FlushOutcome, IngestCoordinator};
use logpulse_node::errors::IngestError;
use logpulse_node::runtime::NodeRuntime;
use logpulse_persistence::fixtures::sample_record;
use logpulse_persistence::{ChunkStore, PersistenceError, StoreOptions};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::watch;
use tokio::time::Instant;

fn ingest_config(buffer_size: usize, flush_interval_ms: u64) -> IngestConfig {
    IngestConfig {
        buffer_size,
        flush_interval_ms,
        ..IngestConfig::default()
    }
}

fn node_config(root: &Path, ingest: IngestConfig) -> Config {
    let mut cfg = Config::default();
    cfg.storage.path = root.to_path_buf();
    cfg.storage.sync_writes = false;
    cfg.ingest = ingest;
    cfg
}

fn all_records(root: &Path) -> Vec<LogRecord> {
    let store = ChunkStore::open(StoreOptions::new(root)).unwrap();
    let mut out = Vec::new();
    for meta in store.list_chunks().unwrap() {
        out.extend(store.read_chunk(meta.unwrap().id).unwrap());
    }
    out
}

#[tokio::test(start_paused = true)]
async fn test_single_record_flushed_once_interval_elapses() {
    let dir = tempdir().unwrap();
    let store = Arc::new(ChunkStore::open(StoreOptions::new(dir.path())).unwrap());
    let coord = IngestCoordinator::new(store.clone(), &ingest_config(1000, 5000));

    coord.submit(sample_record(1)).await.unwrap();

    tokio::time::advance(Duration::from_millis(4999)).await;
    assert_eq!(coord.flush_once().await, FlushOutcome::Idle);
    assert!(store.read_chunk(store.open_chunk_id()).unwrap().is_empty());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(matches!(
        coord.flush_once().await,
        FlushOutcome::Written { records: 1, attempts: 1, .. }
    ));
    assert_eq!(
        store.read_chunk(store.open_chunk_id()).unwrap(),
        vec![sample_record(1)]
    );

    // Nothing else was buffered, so no second write follows.
    tokio::time::advance(Duration::from_millis(5000)).await;
    assert_eq!(coord.flush_once().await, FlushOutcome::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_full_buffer_flushes_before_interval() {
    let dir = tempdir().unwrap();
    let store = Arc::new(ChunkStore::open(StoreOptions::new(dir.path())).unwrap());
    let coord = IngestCoordinator::new(store.clone(), &ingest_config(4, 60_000));

    for i in 0..4 {
        coord.submit(sample_record(i)).await.unwrap();
    }
    assert!(matches!(
        coord.flush_once().await,
        FlushOutcome::Written { records: 4, .. }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_acknowledged_record_is_lost() {
    let dir = tempdir().unwrap();
    let mut ingest = ingest_config(16, 10);
    ingest.enqueue_timeout_ms = 10_000;
    let runtime = NodeRuntime::start(node_config(dir.path(), ingest)).unwrap();

    let mut producers = Vec::new();
    for p in 0..4u64 {
        let coord = runtime.coordinator().clone();
        producers.push(tokio::spawn(async move {
            for i in 0..100u64 {
                coord.submit(sample_record(p * 1000 + i)).await.unwrap();
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }
    runtime.shutdown().await;

    let mut got: Vec<LogRecord> = all_records(dir.path());
    assert_eq!(got.len(), 400);
    got.sort_by_key(|r| r.timestamp());
    got.dedup();
    assert_eq!(got.len(), 400);
}

#[tokio::test]
async fn test_shutdown_drains_remaining_records() {
    let dir = tempdir().unwrap();
    let runtime = NodeRuntime::start(node_config(dir.path(), ingest_config(1000, 60_000))).unwrap();
    let coord = runtime.coordinator().clone();

    for i in 0..5 {
        coord.submit(sample_record(i)).await.unwrap();
    }
    runtime.shutdown().await;

    assert!(matches!(
        coord.submit(sample_record(99)).await,
        Err(IngestError::ShuttingDown)
    ));
    let expected: Vec<LogRecord> = (0..5).map(sample_record).collect();
    assert_eq!(all_records(dir.path()), expected);
}

#[tokio::test(start_paused = true)]
async fn test_drop_oldest_keeps_newest_records() {
    let dir = tempdir().unwrap();
    let store = Arc::new(ChunkStore::open(StoreOptions::new(dir.path())).unwrap());
    let mut ingest = ingest_config(3, 60_000);
    ingest.overflow_policy = OverflowPolicy::DropOldest;
    let coord = IngestCoordinator::new(store.clone(), &ingest);

    for i in 0..5 {
        coord.submit(sample_record(i)).await.unwrap();
    }
    coord.shutdown_flush().await;

    assert_eq!(coord.stats().records_evicted, 2);
    assert_eq!(
        store.read_chunk(store.open_chunk_id()).unwrap(),
        vec![sample_record(2), sample_record(3), sample_record(4)]
    );
}

struct BrokenDisk;

impl BatchWriter for BrokenDisk {
    fn write_batch(&self, _records: &[LogRecord]) -> Result<ChunkId, PersistenceError> {
        Err(PersistenceError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "no space left on device",
        )))
    }
}

#[tokio::test(start_paused = true)]
async fn test_persistent_write_failure_drops_batch_after_retries() {
    let coord = IngestCoordinator::new(Arc::new(BrokenDisk), &ingest_config(100, 10));

    for i in 0..3 {
        coord.submit(sample_record(i)).await.unwrap();
    }
    tokio::time::advance(Duration::from_millis(10)).await;

    let started = tokio::time::Instant::now();
    let outcome = coord.flush_once().await;
    assert_eq!(outcome, FlushOutcome::Dropped { records: 3, attempts: 4 });
    // Backoff of 100, 200 and 400 ms between the four attempts.
    assert!(tokio::time::Instant::now() - started >= Duration::from_millis(700));

    let stats = coord.stats();
    assert_eq!(stats.retries, 3);
    assert_eq!(stats.records_dropped, 3);
    assert!(coord.buffer().is_empty());
}

/// Store-backed writer that counts batch writes.
struct CountingStore {
    store: ChunkStore,
    writes: AtomicUsize,
}

impl CountingStore {
    fn open(root: &Path) -> Arc<Self> {
        Arc::new(Self {
            store: ChunkStore::open(StoreOptions::new(root)).unwrap(),
            writes: AtomicUsize::new(0),
        })
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn open_chunk_records(&self) -> Vec<LogRecord> {
        self.store.read_chunk(self.store.open_chunk_id()).unwrap()
    }
}

impl BatchWriter for CountingStore {
    fn write_batch(&self, records: &[LogRecord]) -> Result<ChunkId, PersistenceError> {
        let chunk = self.store.write(records)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(chunk)
    }
}

/// Give the flush loop up to `budget` of virtual time to reach `writes`.
async fn wait_for_writes(writer: &CountingStore, writes: usize, budget: Duration) {
    let deadline = Instant::now() + budget;
    while writer.writes() < writes && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_flush_loop_writes_once_after_interval() {
    let dir = tempdir().unwrap();
    let writer = CountingStore::open(dir.path());
    let coord = Arc::new(IngestCoordinator::new(writer.clone(), &ingest_config(1000, 5000)));
    let (tx, rx) = watch::channel(false);

    coord.submit(sample_record(1)).await.unwrap();
    let task = coord.clone().spawn_flush_loop(rx);

    tokio::time::sleep(Duration::from_millis(4999)).await;
    assert_eq!(writer.writes(), 0);

    wait_for_writes(&writer, 1, Duration::from_millis(100)).await;
    assert_eq!(writer.writes(), 1);
    assert_eq!(writer.open_chunk_records(), vec![sample_record(1)]);

    // Several more intervals with nothing buffered.
    tokio::time::sleep(Duration::from_millis(20_000)).await;
    assert_eq!(writer.writes(), 1);

    tx.send(true).unwrap();
    task.await.unwrap();
    assert_eq!(writer.writes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_flush_loop_wakes_when_buffer_fills() {
    let dir = tempdir().unwrap();
    let writer = CountingStore::open(dir.path());
    let coord = Arc::new(IngestCoordinator::new(writer.clone(), &ingest_config(4, 60_000)));
    let (tx, rx) = watch::channel(false);
    let task = coord.clone().spawn_flush_loop(rx);

    let started = Instant::now();
    for i in 0..4 {
        coord.submit(sample_record(i)).await.unwrap();
    }

    wait_for_writes(&writer, 1, Duration::from_secs(1)).await;
    assert_eq!(writer.writes(), 1);
    assert!(Instant::now() - started < Duration::from_secs(60));
    let expected: Vec<LogRecord> = (0..4).map(sample_record).collect();
    assert_eq!(writer.open_chunk_records(), expected);

    tx.send(true).unwrap();
    task.await.unwrap();
}
