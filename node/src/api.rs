// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use logpulse_kernel::{LabelSet, LogRecord, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub records: Vec<IngestRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRecord {
    /// Nanoseconds since the Unix epoch. Required; `0` or absent is rejected.
    #[serde(default)]
    pub timestamp_ns: i64,
    #[serde(default)]
    pub labels: LabelSet,
    pub message: String,
}

impl From<IngestRecord> for LogRecord {
    fn from(r: IngestRecord) -> Self {
        LogRecord::new(Timestamp(r.timestamp_ns), r.labels, r.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub accepted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub buffered: usize,
}
