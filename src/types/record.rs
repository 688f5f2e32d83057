// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Log record definition.

use crate::error::ValidationError;
use crate::types::labels::LabelSet;
use crate::types::timestamp::Timestamp;
use serde::{Deserialize, Serialize};

/// A single ingested log line. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    timestamp: Timestamp,
    labels: LabelSet,
    message: Vec<u8>,
}

impl LogRecord {
    pub fn new(timestamp: Timestamp, labels: LabelSet, message: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            labels,
            message: message.into(),
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// Shape check applied before a record enters the ingest buffer.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.timestamp.is_set() {
            return Err(ValidationError::MissingTimestamp(self.timestamp.0));
        }
        self.labels.validate()
    }
}
