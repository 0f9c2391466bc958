//! husk-ecu - ECU profiles for the vehicle pipeline
//!
//! An ECU profile knows three things about a particular controller
//! family: how to answer its SecurityAccess seed with a key, which DIDs
//! are worth polling and how often, and how each DID's raw payload
//! becomes named, scaled samples. Currently the only profile is the
//! Husqvarna/KTM K701.

pub mod k701;
pub mod keys;

pub use k701::{K701, POLL_TABLE};
pub use keys::{generate_key, KeyError, SecurityLevel};

use std::time::Duration;

/// One decoded reading: a stream key from the profile's catalog and the
/// scaled physical value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DidValue {
    pub key: &'static str,
    pub value: f64,
}

impl DidValue {
    pub fn new(key: &'static str, value: f64) -> Self {
        Self { key, value }
    }
}

/// A DID the scheduler should poll, and how often.
#[derive(Debug, Clone, Copy)]
pub struct PollEntry {
    pub did: u16,
    pub interval: Duration,
}

/// Decoder seam between the protocol layer and the stream pipeline.
///
/// `decode` returns zero or more samples: zero for unknown DIDs and
/// too-short payloads (neither is an error on a live bus), several for
/// DIDs that pack multiple signals (the levers DID yields clutch and
/// front brake).
pub trait EcuProfile: Send + Sync {
    fn decode(&self, did: u32, data: &[u8]) -> Vec<DidValue>;
}
