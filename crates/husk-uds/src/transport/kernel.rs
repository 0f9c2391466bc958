//! Kernel CAN_ISOTP socket transport
//!
//! The Linux kernel speaks ISO-TP natively; the socket hands us whole
//! UDS payloads with segmentation and flow control done below. Used by
//! the ROM dumper, where the big TransferData blocks make the kernel's
//! tuned flow control worthwhile. The observable contract is identical
//! to the user-space link.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use socketcan::StandardId;
use socketcan_isotp::IsoTpSocket;

use super::UdsTransport;
use crate::error::TransportError;

/// Poll interval while waiting on the non-blocking socket.
const RX_POLL: Duration = Duration::from_millis(1);

pub struct KernelIsoTp {
    socket: Arc<Mutex<IsoTpSocket>>,
}

impl KernelIsoTp {
    /// Bind to `interface` listening on `rx_id`, transmitting on `tx_id`.
    pub fn new(interface: &str, tx_id: u16, rx_id: u16) -> Result<Self, TransportError> {
        let tx = StandardId::new(tx_id)
            .ok_or_else(|| TransportError::InvalidConfig(format!("bad CAN ID {tx_id:#x}")))?;
        let rx = StandardId::new(rx_id)
            .ok_or_else(|| TransportError::InvalidConfig(format!("bad CAN ID {rx_id:#x}")))?;

        let socket = IsoTpSocket::open(interface, rx, tx)
            .map_err(|e| TransportError::ConnectionFailed(format!("open CAN_ISOTP: {e}")))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::InvalidConfig(format!("set non-blocking: {e}")))?;

        Ok(Self {
            socket: Arc::new(Mutex::new(socket)),
        })
    }
}

#[async_trait]
impl UdsTransport for KernelIsoTp {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let socket = self.socket.clone();
        let payload = payload.to_vec();
        tokio::task::spawn_blocking(move || {
            let guard = socket.lock();
            guard
                .write(&payload)
                .map_err(|e| TransportError::SendFailed(e.to_string()))
        })
        .await
        .map_err(|e| TransportError::SendFailed(format!("write task: {e}")))?
    }

    async fn recv(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let socket = self.socket.clone();
        tokio::task::spawn_blocking(move || {
            let deadline = Instant::now() + timeout;
            loop {
                {
                    let mut guard = socket.lock();
                    match guard.read() {
                        Ok(data) if !data.is_empty() => return Ok(data.to_vec()),
                        Ok(_) => {}
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                        Err(e) => {
                            return Err(TransportError::Protocol(format!("CAN_ISOTP read: {e}")))
                        }
                    }
                }
                if Instant::now() >= deadline {
                    return Err(TransportError::Timeout);
                }
                std::thread::sleep(RX_POLL);
            }
        })
        .await
        .map_err(|e| TransportError::Protocol(format!("read task: {e}")))?
    }
}
