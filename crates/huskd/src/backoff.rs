//! Exponential backoff for transient bus failures

use std::time::Duration;

const INITIAL: Duration = Duration::from_millis(1);
const CAP: Duration = Duration::from_secs(1);

/// Doubling delay, 1 ms up to 1 s, reset on any success.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self { current: INITIAL }
    }

    /// The delay to apply now; doubles for next time.
    pub fn step(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(CAP);
        delay
    }

    pub fn reset(&mut self) {
        self.current = INITIAL;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
