// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Retention Sweeper
//!
//! Periodically deletes sealed chunks whose creation time is older than the
//! retention window. The open chunk is never touched.

use logpulse_kernel::{RetentionWindow, Timestamp};
use logpulse_persistence::{ChunkStore, PersistenceError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Floor for the sweep period; `tokio::time::interval` rejects zero.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Result of one pass over the store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub retained: usize,
    /// Open or unsealed chunks, which are never candidates.
    pub skipped_open: usize,
    pub failed: usize,
}

pub struct RetentionSweeper {
    store: Arc<ChunkStore>,
    window: RetentionWindow,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<ChunkStore>, window: RetentionWindow, interval: Duration) -> Self {
        Self {
            store,
            window,
            interval: interval.max(MIN_SWEEP_INTERVAL),
        }
    }

    pub fn window(&self) -> RetentionWindow {
        self.window
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One full pass. Blocking.
    pub fn sweep_once(&self, now: Timestamp) -> SweepReport {
        self.sweep_until(now, || false)
    }

    /// Like `sweep_once` but stops between chunks once `stop` returns true.
    pub fn sweep_until(&self, now: Timestamp, stop: impl Fn() -> bool) -> SweepReport {
        let mut report = SweepReport::default();
        if !self.window.is_enabled() {
            return report;
        }

        let chunks = match self.store.list_chunks() {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(error = %e, "Retention sweep could not list chunks");
                report.failed += 1;
                return report;
            }
        };

        for entry in chunks {
            if stop() {
                tracing::debug!("Retention sweep interrupted");
                break;
            }

            let meta = match entry {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable chunk");
                    report.failed += 1;
                    continue;
                }
            };
            report.scanned += 1;

            if !meta.sealed || meta.id == self.store.open_chunk_id() {
                report.skipped_open += 1;
                continue;
            }
            if !self.window.is_expired(meta.created_at, now) {
                report.retained += 1;
                continue;
            }

            match self.store.delete(meta.id) {
                Ok(()) => {
                    report.deleted += 1;
                    metrics::counter!("logpulse_chunks_deleted_total", 1);
                    tracing::info!(chunk = %meta.id, bytes = meta.disk_bytes, "Deleted expired chunk");
                }
                // Someone else got there first.
                Err(e) if e.is_not_found() => {
                    tracing::debug!(chunk = %meta.id, "Chunk already deleted");
                }
                Err(PersistenceError::ChunkOpen(_)) | Err(PersistenceError::NotSealed(_)) => {
                    report.skipped_open += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(chunk = %meta.id, error = %e, "Failed to delete expired chunk");
                }
            }
        }

        report
    }

    /// Run `sweep_once` every interval until shutdown.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !self.window.is_enabled() {
                tracing::info!("Retention disabled");
                return;
            }

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                days = self.window.days(),
                interval_secs = self.interval.as_secs(),
                "Retention sweeper started"
            );

            while !*shutdown.borrow() {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let sweeper = self.clone();
                let stop = shutdown.clone();
                let result = tokio::task::spawn_blocking(move || {
                    sweeper.sweep_until(Timestamp::now(), || *stop.borrow())
                })
                .await;

                match result {
                    Ok(report) => tracing::info!(
                        scanned = report.scanned,
                        deleted = report.deleted,
                        retained = report.retained,
                        failed = report.failed,
                        "Retention sweep finished"
                    ),
                    Err(e) => tracing::error!(error = %e, "Retention sweep aborted"),
                }
            }

            tracing::info!("Retention sweeper stopped");
        })
    }
}
