// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Wall-clock timestamps with nanosecond precision.

use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Times before the epoch clamp to `EPOCH`, times past `i64::MAX` ns saturate.
    pub fn from_system_time(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Timestamp(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)),
            Err(_) => Self::EPOCH,
        }
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    pub fn is_set(&self) -> bool {
        self.0 > 0
    }

    pub fn saturating_sub(&self, d: Duration) -> Self {
        let nanos = i64::try_from(d.as_nanos()).unwrap_or(i64::MAX);
        Timestamp(self.0.saturating_sub(nanos))
    }

    pub fn saturating_add(&self, d: Duration) -> Self {
        let nanos = i64::try_from(d.as_nanos()).unwrap_or(i64::MAX);
        Timestamp(self.0.saturating_add(nanos))
    }
}

/// Strictly increasing wall clock.
///
/// Each `now()` is greater than every value this clock returned before, even
/// when the system clock steps backwards. Chunk creation times are stamped
/// with it so that id order and creation order agree.
#[derive(Debug, Default)]
pub struct TimestampClock {
    last: AtomicI64,
}

impl TimestampClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock whose next reading is strictly after `floor`.
    pub fn starting_after(floor: Timestamp) -> Self {
        Self { last: AtomicI64::new(floor.0) }
    }

    pub fn now(&self) -> Timestamp {
        let wall = Timestamp::now().0;
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = if wall > prev { wall } else { prev.saturating_add(1) };
            match self.last.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return Timestamp(next),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Raise the floor so later readings land after `t`.
    pub fn observe(&self, t: Timestamp) {
        self.last.fetch_max(t.0, Ordering::AcqRel);
    }
}
