// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Ingest Buffer
//!
//! Bounded in-memory queue between the ingest path and the chunk store.
//!
//! # Semantics
//! - `enqueue` never lets the queue exceed its capacity. When full it either
//!   waits for a drain until the caller's deadline (`Block`) or evicts the
//!   oldest record (`DropOldest`)
//! - `drain_if_due` hands out everything buffered once the queue is full or
//!   the flush interval has passed since the last non-empty drain
//! - Reaching capacity raises the full signal so the flush loop drains early

use crate::config::OverflowPolicy;
use crate::errors::IngestError;
use logpulse_kernel::LogRecord;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

struct BufferState {
    queue: VecDeque<LogRecord>,
    last_drain: Instant,
    closed: bool,
}

pub struct IngestBuffer {
    capacity: usize,
    flush_interval: Duration,
    policy: OverflowPolicy,
    state: Mutex<BufferState>,
    /// Woken after every drain.
    space: Notify,
    /// Permit stored whenever the queue reaches capacity.
    full: Notify,
    evicted: AtomicU64,
}

impl IngestBuffer {
    pub fn new(capacity: usize, flush_interval: Duration, policy: OverflowPolicy) -> Self {
        Self {
            capacity: capacity.max(1),
            flush_interval,
            policy,
            state: Mutex::new(BufferState {
                queue: VecDeque::with_capacity(capacity.max(1)),
                last_drain: Instant::now(),
                closed: false,
            }),
            space: Notify::new(),
            full: Notify::new(),
            evicted: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records discarded by the `DropOldest` policy.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Add a record, waiting no later than `deadline` for space.
    pub async fn enqueue(&self, record: LogRecord, deadline: Instant) -> Result<(), IngestError> {
        loop {
            // Register for the wakeup before looking at the queue so a drain
            // between the check and the wait is not missed.
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return Err(IngestError::ShuttingDown);
                }

                if state.queue.len() < self.capacity {
                    state.queue.push_back(record);
                    let depth = state.queue.len();
                    drop(state);
                    metrics::gauge!("logpulse_buffer_depth", depth as f64);
                    if depth >= self.capacity {
                        self.full.notify_one();
                    }
                    return Ok(());
                }

                if self.policy == OverflowPolicy::DropOldest {
                    state.queue.pop_front();
                    state.queue.push_back(record);
                    drop(state);
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("logpulse_records_evicted_total", 1);
                    self.full.notify_one();
                    return Ok(());
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(IngestError::BufferFull);
            }
        }
    }

    /// Take every buffered record if the buffer is full or the flush interval
    /// has elapsed since the last drain. Empty otherwise.
    pub fn drain_if_due(&self, now: Instant) -> Vec<LogRecord> {
        let mut state = self.lock();
        if state.queue.is_empty() {
            return Vec::new();
        }
        let full = state.queue.len() >= self.capacity;
        let elapsed = now.saturating_duration_since(state.last_drain) >= self.flush_interval;
        if !full && !elapsed {
            return Vec::new();
        }

        state.last_drain = now;
        let batch: Vec<LogRecord> = state.queue.drain(..).collect();
        drop(state);

        self.space.notify_waiters();
        metrics::gauge!("logpulse_buffer_depth", 0.0);
        batch
    }

    /// Take everything regardless of timing.
    pub fn drain_all(&self) -> Vec<LogRecord> {
        let mut state = self.lock();
        if !state.queue.is_empty() {
            state.last_drain = Instant::now();
        }
        let batch: Vec<LogRecord> = state.queue.drain(..).collect();
        drop(state);

        self.space.notify_waiters();
        batch
    }

    /// Refuse further records and release blocked producers.
    pub fn close(&self) {
        self.lock().closed = true;
        self.space.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Resolves once the queue has reached capacity.
    pub async fn wait_full(&self) {
        self.full.notified().await
    }
}
