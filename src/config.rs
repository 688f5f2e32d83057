// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Configuration constants.

/// Maximum number of label pairs on a single record.
pub const MAX_LABELS: usize = 64;

/// Maximum length in bytes of a label name.
pub const MAX_LABEL_NAME_LEN: usize = 128;

/// Maximum length in bytes of a label value.
pub const MAX_LABEL_VALUE_LEN: usize = 2048;

/// Nanoseconds in one retention day.
pub const NANOS_PER_DAY: i64 = 86_400 * 1_000_000_000;
