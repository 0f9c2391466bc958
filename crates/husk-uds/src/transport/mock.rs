//! Scripted transport for protocol tests

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::UdsTransport;
use crate::error::TransportError;

/// Test transport that replays a scripted queue of responses and records
/// every payload sent to it. An empty queue behaves like a silent ECU:
/// `recv` times out.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Vec<u8>>>,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next payload `recv` will yield.
    pub fn push_response(&self, response: impl Into<Vec<u8>>) {
        self.responses.lock().push_back(response.into());
    }

    /// Everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl UdsTransport for MockTransport {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.sent.lock().push(payload.to_vec());
        Ok(())
    }

    async fn recv(&self, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.responses
            .lock()
            .pop_front()
            .ok_or(TransportError::Timeout)
    }
}
