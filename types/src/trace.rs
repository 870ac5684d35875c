//! Trace file line model.
//!
//! Each frame received by a trace sink becomes one line:
//! `frame_timestamp recv_timestamp sequence_number size\n`, timestamps in
//! seconds with microsecond precision, e.g. `12.345000 12.346120 42 65536`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One parsed trace line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Capture timestamp of the frame, seconds
    pub frame_timestamp: f64,
    /// Wall-clock time the frame was received, seconds
    pub recv_timestamp: f64,
    /// Sequence number assigned by the frame source
    pub sequence_number: u64,
    /// Declared frame size in bytes
    pub size: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceParseError {
    #[error("Expected 4 fields, found {0}")]
    FieldCount(usize),

    #[error("Invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6} {:.6} {} {}",
            self.frame_timestamp, self.recv_timestamp, self.sequence_number, self.size
        )
    }
}

/// Round `seconds` onto the microsecond grid a trace line can hold.
///
/// A rounded value survives a write and parse unchanged.
pub fn round_to_micros(seconds: f64) -> f64 {
    (seconds * 1_000_000.0).round() / 1_000_000.0
}

impl TraceRecord {
    /// Build a record with both timestamps rounded to microseconds.
    pub fn new(
        frame_timestamp: f64,
        recv_timestamp: f64,
        sequence_number: u64,
        size: usize,
    ) -> Self {
        Self {
            frame_timestamp: round_to_micros(frame_timestamp),
            recv_timestamp: round_to_micros(recv_timestamp),
            sequence_number,
            size,
        }
    }

    /// Render the record as a newline-terminated trace line.
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }
}

fn parse_field<T: FromStr>(field: &'static str, value: &str) -> Result<T, TraceParseError> {
    value.parse().map_err(|_| TraceParseError::InvalidField {
        field,
        value: value.to_string(),
    })
}

impl FromStr for TraceRecord {
    type Err = TraceParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [frame_ts, recv_ts, seqn, size] = fields[..] else {
            return Err(TraceParseError::FieldCount(fields.len()));
        };

        Ok(Self {
            frame_timestamp: parse_field("frame_timestamp", frame_ts)?,
            recv_timestamp: parse_field("recv_timestamp", recv_ts)?,
            sequence_number: parse_field("sequence_number", seqn)?,
            size: parse_field("size", size)?,
        })
    }
}
