//! Data model shared by the pusher, encoder and client.
//!
//! A [`Record`] is one rendered log line, a [`Batch`] is the ordered group of
//! records that is pushed to Loki in a single request, and [`Labels`] identify
//! the stream all batches belong to.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Static label set identifying the log stream at the Loki side.
///
/// A `BTreeMap` keeps the serialized label object in a stable order.
pub type Labels = BTreeMap<String, String>;

/// A single log record accepted for shipment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Instant the event was produced
    pub timestamp: DateTime<Utc>,

    /// Severity label, e.g. `info`
    pub severity: String,

    /// Fully rendered log line
    pub message: String,
}

impl Record {
    /// Create a record stamped with the current time.
    pub fn new(severity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::at(Utc::now(), severity, message)
    }

    /// Create a record with an explicit timestamp.
    pub fn at(
        timestamp: DateTime<Utc>,
        severity: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            severity: severity.into(),
            message: message.into(),
        }
    }
}

/// An ordered batch of records, flushed together as one push request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    records: Vec<Record>,
}

impl Batch {
    /// Create a batch from records in arrival order.
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Get the number of records in the batch.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl From<Vec<Record>> for Batch {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}
