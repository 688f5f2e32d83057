// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Retention window arithmetic.

use crate::config::NANOS_PER_DAY;
use crate::types::timestamp::Timestamp;

/// Maximum age a chunk may reach before it becomes eligible for deletion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionWindow {
    days: u32,
}

impl RetentionWindow {
    /// `0` disables retention: nothing ever expires.
    pub fn from_days(days: u32) -> Self {
        Self { days }
    }

    pub fn days(&self) -> u32 {
        self.days
    }

    pub fn is_enabled(&self) -> bool {
        self.days > 0
    }

    /// Oldest creation time still retained at `now`.
    pub fn cutoff(&self, now: Timestamp) -> Option<Timestamp> {
        if !self.is_enabled() {
            return None;
        }
        let span = NANOS_PER_DAY.saturating_mul(self.days as i64);
        Some(Timestamp(now.0.saturating_sub(span)))
    }

    pub fn is_expired(&self, created_at: Timestamp, now: Timestamp) -> bool {
        match self.cutoff(now) {
            Some(cutoff) => created_at < cutoff,
            None => false,
        }
    }
}
