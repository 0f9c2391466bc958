//! Cooperative DID polling schedule
//!
//! One row per configured DID. Each scheduler pass resumes round-robin
//! after the previously chosen row and picks the first one whose
//! interval has elapsed; when nothing is due it reports how long until
//! something is. Responses are fingerprinted (XOR byte plus length) so
//! unchanged ECU state produces no redundant samples or log writes.

use std::time::{Duration, Instant};

use husk_ecu::PollEntry;

/// Cheap content summary of a DID response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    xor: u8,
    len: u8,
}

pub fn fingerprint(data: &[u8]) -> Fingerprint {
    Fingerprint {
        xor: data.iter().fold(0, |acc, &b| acc ^ b),
        len: data.len() as u8,
    }
}

#[derive(Debug)]
struct PollRow {
    did: u16,
    interval: Duration,
    last_poll: Option<Instant>,
    last_fingerprint: Option<Fingerprint>,
}

impl PollRow {
    fn due(&self, now: Instant) -> bool {
        match self.last_poll {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        }
    }

    fn remaining(&self, now: Instant) -> Duration {
        match self.last_poll {
            None => Duration::ZERO,
            Some(last) => self
                .interval
                .saturating_sub(now.duration_since(last)),
        }
    }
}

/// What the driver should do next.
#[derive(Debug, PartialEq, Eq)]
pub enum NextPoll {
    /// Poll the row at this index now.
    Due(usize),
    /// Nothing due; sleep at most this long (cancelable).
    Idle(Duration),
}

#[derive(Debug)]
pub struct PollSchedule {
    rows: Vec<PollRow>,
    cursor: usize,
}

impl PollSchedule {
    pub fn new(entries: &[PollEntry]) -> Self {
        let rows = entries
            .iter()
            .map(|e| PollRow {
                did: e.did,
                interval: e.interval,
                last_poll: None,
                last_fingerprint: None,
            })
            .collect::<Vec<_>>();
        let cursor = rows.len().saturating_sub(1); // first pass starts at row 0
        Self { rows, cursor }
    }

    pub fn did(&self, index: usize) -> u16 {
        self.rows[index].did
    }

    /// Pick the next due DID, scanning round-robin from the row after
    /// the previous pick so fast DIDs cannot starve slow ones.
    pub fn next(&mut self, now: Instant) -> NextPoll {
        let n = self.rows.len();
        for offset in 0..n {
            let index = (self.cursor + 1 + offset) % n;
            if self.rows[index].due(now) {
                self.cursor = index;
                return NextPoll::Due(index);
            }
        }

        let wait = self
            .rows
            .iter()
            .map(|row| row.remaining(now))
            .min()
            .unwrap_or(Duration::from_millis(100));
        NextPoll::Idle(wait.max(Duration::from_millis(1)))
    }

    /// Record when the request went out. Timeouts count too; the row's
    /// interval gates attempts, not successes.
    pub fn mark_attempt(&mut self, index: usize, now: Instant) {
        self.rows[index].last_poll = Some(now);
    }

    /// Record a response payload. Returns true when it differs from the
    /// previous one for this DID (first responses always differ).
    pub fn note_response(&mut self, index: usize, data: &[u8]) -> bool {
        let fp = fingerprint(data);
        let row = &mut self.rows[index];
        let changed = row.last_fingerprint != Some(fp);
        row.last_fingerprint = Some(fp);
        changed
    }
}
