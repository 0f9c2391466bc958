//! Transports that move raw UDS payloads
//!
//! Two real backends plus a mock:
//! - [`user_space::IsoTpLink`]: ISO 15765-2 implemented in user space
//!   over two raw SocketCAN sockets (Linux only). Used by the live
//!   vehicle driver.
//! - [`kernel::KernelIsoTp`]: the kernel's `CAN_ISOTP` socket (Linux
//!   only). Used by the ROM dumper; observably identical.
//! - [`mock::MockTransport`]: scripted responses for tests.
//!
//! A transport only moves payloads. Pairing requests with responses,
//! negative-response handling and bus serialization live in
//! [`crate::UdsClient`].

pub mod mock;

#[cfg(target_os = "linux")]
pub mod kernel;
#[cfg(target_os = "linux")]
pub mod user_space;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

/// Payload-level transport for UDS messages.
#[async_trait]
pub trait UdsTransport: Send + Sync {
    /// Transmit one UDS payload.
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next payload from the ECU.
    async fn recv(&self, timeout: Duration) -> Result<Vec<u8>, TransportError>;
}
