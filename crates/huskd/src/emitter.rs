//! Decode-and-broadcast step shared by every driver
//!
//! Raw DID payloads become samples through the ECU profile and go out
//! through the hub, stamped with wall-clock time at decode. Discrete
//! streams get a carry-over point one millisecond before each new value
//! so a step function renders as a staircase instead of a ramp.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use husk_core::{EventHub, Sample};
use husk_ecu::EcuProfile;

pub struct SampleEmitter {
    hub: Arc<EventHub>,
    profile: Arc<dyn EcuProfile>,
    discrete: HashSet<&'static str>,
    previous: HashMap<&'static str, f64>,
}

impl SampleEmitter {
    pub fn new(
        hub: Arc<EventHub>,
        profile: Arc<dyn EcuProfile>,
        discrete_keys: impl IntoIterator<Item = &'static str>,
    ) -> Self {
        Self {
            hub,
            profile,
            discrete: discrete_keys.into_iter().collect(),
            previous: HashMap::new(),
        }
    }

    /// Decode one DID payload and broadcast the resulting samples.
    /// Returns how many samples went out (carry-overs included).
    pub fn emit(&mut self, did: u32, data: &[u8]) -> usize {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.emit_at(did, data, now_ms)
    }

    /// As [`emit`](Self::emit) with an explicit timestamp; the replay
    /// tests use this for determinism.
    pub fn emit_at(&mut self, did: u32, data: &[u8], now_ms: i64) -> usize {
        let values = self.profile.decode(did, data);
        let mut emitted = 0;

        for value in &values {
            if self.discrete.contains(value.key) {
                if let Some(&previous) = self.previous.get(value.key) {
                    // Vertical edge for the step renderer.
                    self.hub
                        .broadcast(Sample::new(value.key, now_ms - 1, previous));
                    emitted += 1;
                }
            }
            self.hub.broadcast(Sample::new(value.key, now_ms, value.value));
            self.previous.insert(value.key, value.value);
            emitted += 1;
        }
        emitted
    }
}
