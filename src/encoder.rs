//! Loki push payload encoding.
//!
//! Turns a [`Batch`] and the configured [`Labels`] into the JSON document
//! accepted by `POST /loki/api/v1/push`:
//!
//! ```json
//! {"streams":[{"stream":{"app":"api"},"values":[["1700000000000000000","msg"]]}]}
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::record::{Batch, Labels};

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Top-level push request body.
#[derive(Debug, Serialize)]
pub struct PushRequest<'a> {
    pub streams: Vec<Stream<'a>>,
}

/// One labelled stream with its `[timestamp, line]` pairs.
#[derive(Debug, Serialize)]
pub struct Stream<'a> {
    pub stream: &'a Labels,
    pub values: Vec<(String, &'a str)>,
}

impl PushRequest<'_> {
    /// Total number of log lines across all streams.
    pub fn line_count(&self) -> usize {
        self.streams.iter().map(|s| s.values.len()).sum()
    }
}

/// Encode a batch into a single-stream push request.
///
/// Values keep the batch order. An empty batch yields a valid request with an
/// empty `values` list.
pub fn encode<'a>(batch: &'a Batch, labels: &'a Labels) -> PushRequest<'a> {
    let values = batch
        .records()
        .iter()
        .map(|record| (unix_nanos(&record.timestamp), record.message.as_str()))
        .collect();

    PushRequest {
        streams: vec![Stream {
            stream: labels,
            values,
        }],
    }
}

/// Nanoseconds since the Unix epoch as a base-10 string.
///
/// Computed in 128-bit arithmetic so every representable instant encodes.
pub fn unix_nanos(timestamp: &DateTime<Utc>) -> String {
    let nanos =
        i128::from(timestamp.timestamp()) * NANOS_PER_SEC + i128::from(timestamp.timestamp_subsec_nanos());
    nanos.to_string()
}
