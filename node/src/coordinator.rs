// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Ingest Coordinator
//!
//! Owns the path from an accepted record to a durable chunk:
//! validation, buffering with backpressure, and the periodic flush that
//! hands drained batches to the store with bounded retries.
//!
//! A batch that still fails after the last retry is dropped and logged at
//! error level. That is data loss and is counted as such.

use crate::buffer::IngestBuffer;
use crate::config::IngestConfig;
use crate::errors::IngestError;
use logpulse_kernel::{ChunkId, LogRecord};
use logpulse_persistence::{ChunkStore, PersistenceError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Upper bound for the doubling retry delay.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Durable sink for drained batches.
///
/// Called from a blocking thread; implementations may do synchronous I/O.
pub trait BatchWriter: Send + Sync + 'static {
    fn write_batch(&self, records: &[LogRecord]) -> Result<ChunkId, PersistenceError>;
}

impl BatchWriter for ChunkStore {
    fn write_batch(&self, records: &[LogRecord]) -> Result<ChunkId, PersistenceError> {
        self.write(records)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was due.
    Idle,
    Written { chunk: ChunkId, records: usize, attempts: u32 },
    /// Every attempt failed; the batch is gone.
    Dropped { records: usize, attempts: u32 },
}

#[derive(Debug, Default)]
pub struct FlushStats {
    pub batches_written: AtomicU64,
    pub records_written: AtomicU64,
    pub batches_dropped: AtomicU64,
    pub records_dropped: AtomicU64,
    pub retries: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushStatsSnapshot {
    pub batches_written: u64,
    pub records_written: u64,
    pub batches_dropped: u64,
    pub records_dropped: u64,
    pub records_evicted: u64,
    pub retries: u64,
}

impl FlushStats {
    /// `records_evicted` lives on the buffer and is filled in by the coordinator.
    pub fn snapshot(&self) -> FlushStatsSnapshot {
        FlushStatsSnapshot {
            batches_written: self.batches_written.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            records_evicted: 0,
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

pub struct IngestCoordinator {
    buffer: Arc<IngestBuffer>,
    writer: Arc<dyn BatchWriter>,
    enqueue_timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
    /// Serializes drain-and-write so batches reach the store in drain order.
    flush_lock: Mutex<()>,
    stats: FlushStats,
}

impl IngestCoordinator {
    pub fn new(writer: Arc<dyn BatchWriter>, config: &IngestConfig) -> Self {
        let buffer = IngestBuffer::new(
            config.buffer_size,
            config.flush_interval(),
            config.overflow_policy,
        );
        Self {
            buffer: Arc::new(buffer),
            writer,
            enqueue_timeout: config.enqueue_timeout(),
            max_retries: config.flush_max_retries,
            retry_backoff: config.retry_backoff(),
            flush_lock: Mutex::new(()),
            stats: FlushStats::default(),
        }
    }

    pub fn buffer(&self) -> &Arc<IngestBuffer> {
        &self.buffer
    }

    pub fn stats(&self) -> FlushStatsSnapshot {
        FlushStatsSnapshot {
            records_evicted: self.buffer.evicted(),
            ..self.stats.snapshot()
        }
    }

    /// Validate and buffer one record.
    ///
    /// Waits at most the configured enqueue timeout for buffer space.
    pub async fn submit(&self, record: LogRecord) -> Result<(), IngestError> {
        if let Err(e) = record.validate() {
            metrics::counter!("logpulse_records_rejected_total", 1);
            return Err(e.into());
        }

        let deadline = Instant::now() + self.enqueue_timeout;
        match self.buffer.enqueue(record, deadline).await {
            Ok(()) => {
                metrics::counter!("logpulse_records_submitted_total", 1);
                Ok(())
            }
            Err(e) => {
                metrics::counter!("logpulse_records_rejected_total", 1);
                Err(e)
            }
        }
    }

    /// Drain the buffer if due and persist the batch.
    pub async fn flush_once(&self) -> FlushOutcome {
        let _guard = self.flush_lock.lock().await;
        let batch = self.buffer.drain_if_due(Instant::now());
        self.write_with_retry(batch).await
    }

    /// Close the buffer and persist everything still in it.
    pub async fn shutdown_flush(&self) -> FlushOutcome {
        self.buffer.close();
        let _guard = self.flush_lock.lock().await;
        let batch = self.buffer.drain_all();
        self.write_with_retry(batch).await
    }

    async fn write_with_retry(&self, batch: Vec<LogRecord>) -> FlushOutcome {
        if batch.is_empty() {
            return FlushOutcome::Idle;
        }

        let records: Arc<[LogRecord]> = batch.into();
        let count = records.len();
        let mut backoff = self.retry_backoff;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let writer = self.writer.clone();
            let batch = records.clone();
            let started = std::time::Instant::now();

            let result = tokio::task::spawn_blocking(move || writer.write_batch(&batch)).await;
            match result {
                Ok(Ok(chunk)) => {
                    metrics::histogram!(
                        "logpulse_flush_duration_seconds",
                        started.elapsed().as_secs_f64()
                    );
                    metrics::counter!("logpulse_records_flushed_total", count as u64);
                    self.stats.batches_written.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .records_written
                        .fetch_add(count as u64, Ordering::Relaxed);
                    tracing::debug!(records = count, chunk = %chunk, attempts, "Flushed batch");
                    return FlushOutcome::Written {
                        chunk,
                        records: count,
                        attempts,
                    };
                }
                Ok(Err(e)) => {
                    tracing::warn!(records = count, attempt = attempts, error = %e, "Flush attempt failed");
                }
                Err(e) => {
                    tracing::error!(records = count, attempt = attempts, error = %e, "Flush task aborted");
                }
            }

            if attempts > self.max_retries {
                tracing::error!(
                    records = count,
                    attempts,
                    "Dropping batch after exhausting flush retries; records are lost"
                );
                metrics::counter!("logpulse_records_dropped_total", count as u64);
                self.stats.batches_dropped.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .records_dropped
                    .fetch_add(count as u64, Ordering::Relaxed);
                return FlushOutcome::Dropped {
                    records: count,
                    attempts,
                };
            }

            metrics::counter!("logpulse_flush_retries_total", 1);
            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_RETRY_BACKOFF);
        }
    }

    /// Background flush task.
    ///
    /// Checks the buffer several times per flush interval and immediately
    /// when it fills. On shutdown it performs one final drain-and-write.
    pub fn spawn_flush_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = (self.buffer.flush_interval() / 4).max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(period_ms = period.as_millis() as u64, "Flush loop started");

            while !*shutdown.borrow() {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.buffer.wait_full() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
                self.flush_once().await;
            }

            match self.shutdown_flush().await {
                FlushOutcome::Written { records, .. } => {
                    tracing::info!(records, "Final flush complete")
                }
                FlushOutcome::Dropped { records, .. } => {
                    tracing::error!(records, "Final flush failed")
                }
                FlushOutcome::Idle => tracing::info!("Final flush: buffer empty"),
            }
        })
    }
}
