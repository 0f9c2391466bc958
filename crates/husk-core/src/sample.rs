//! Decoded telemetry samples

use serde::Serialize;

/// One decoded, scaled reading on a named stream.
///
/// The key comes from the closed stream catalog of the active ECU
/// profile, the timestamp is wall-clock milliseconds at the moment of
/// decoding (not the ECU's internal clock), and the value is always
/// `f64` regardless of the raw payload width. Samples are immutable once
/// emitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub key: &'static str,
    pub timestamp_ms: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(key: &'static str, timestamp_ms: i64, value: f64) -> Self {
        Self {
            key,
            timestamp_ms,
            value,
        }
    }
}
