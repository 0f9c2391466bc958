//! User-space ISO-TP (ISO 15765-2) over raw SocketCAN
//!
//! Two sockets on the same interface: one dedicated to a background
//! reader thread that filters for the ECU's response ID, one for
//! transmission. Single frames, first/consecutive frames and the flow
//! control step are handled here; the link stays a dumb payload mover
//! from the client's point of view.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame, Socket, StandardId};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::UdsTransport;
use crate::error::TransportError;

/// How long the far end gets to answer a first frame with flow control.
const FLOW_CONTROL_TIMEOUT: Duration = Duration::from_millis(100);

/// Reader thread poll interval on an idle bus.
const RX_POLL: Duration = Duration::from_millis(1);

/// ISO-TP caps a segmented transfer at 12 bits of length.
const MAX_TRANSFER: usize = 4095;

/// PCI frame types, high nibble of the first data byte.
mod pci {
    pub const SINGLE: u8 = 0x0;
    pub const FIRST: u8 = 0x1;
    pub const CONSECUTIVE: u8 = 0x2;
    pub const FLOW_CONTROL: u8 = 0x3;
}

pub struct IsoTpLink {
    tx_socket: Arc<Mutex<CanSocket>>,
    tx_id: StandardId,
    /// Frames from the response ID, delivered by the reader thread.
    frames: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    running: Arc<AtomicBool>,
}

impl IsoTpLink {
    /// Open the link on `interface`, e.g. tx 0x7E0 / rx 0x7E8.
    pub fn new(interface: &str, tx_id: u16, rx_id: u16) -> Result<Self, TransportError> {
        let tx_id = StandardId::new(tx_id)
            .ok_or_else(|| TransportError::InvalidConfig(format!("bad CAN ID {tx_id:#x}")))?;

        let rx_socket = open_socket(interface)?;
        let tx_socket = open_socket(interface)?;

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        spawn_reader(rx_socket, u32::from(rx_id), frame_tx, running.clone());

        debug!(interface, "iso-tp link up");
        Ok(Self {
            tx_socket: Arc::new(Mutex::new(tx_socket)),
            tx_id,
            frames: tokio::sync::Mutex::new(frame_rx),
            running,
        })
    }

    async fn write_raw(&self, data: &[u8]) -> Result<(), TransportError> {
        let frame = CanFrame::new(self.tx_id, data)
            .ok_or_else(|| TransportError::SendFailed("CAN frame over 8 bytes".to_string()))?;
        let socket = self.tx_socket.clone();
        tokio::task::spawn_blocking(move || {
            socket
                .lock()
                .write_frame(&frame)
                .map_err(|e| TransportError::SendFailed(e.to_string()))
        })
        .await
        .map_err(|e| TransportError::SendFailed(format!("write task: {e}")))?
    }

    /// Next frame from the response ID before `deadline`.
    async fn next_frame(
        &self,
        frames: &mut mpsc::UnboundedReceiver<Vec<u8>>,
        deadline: Instant,
    ) -> Result<Vec<u8>, TransportError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TransportError::Timeout);
        }
        match tokio::time::timeout(remaining, frames.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn send_segmented(
        &self,
        payload: &[u8],
        frames: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Result<(), TransportError> {
        let total = payload.len();
        let mut first = vec![
            0x10 | ((total >> 8) as u8 & 0x0F),
            (total & 0xFF) as u8,
        ];
        first.extend_from_slice(&payload[..6]);
        self.write_raw(&first).await?;

        let (mut block_size, st_min) = self.await_flow_control(frames).await?;

        let mut sequence: u8 = 1;
        let mut sent_in_block: u8 = 0;
        let mut pos = 6;
        while pos < total {
            let chunk = (total - pos).min(7);
            let mut cf = vec![0x20 | sequence];
            cf.extend_from_slice(&payload[pos..pos + chunk]);
            self.write_raw(&cf).await?;
            pos += chunk;
            sequence = (sequence + 1) & 0x0F;

            if let Some(pause) = st_min_pause(st_min) {
                tokio::time::sleep(pause).await;
            }
            if block_size != 0 && pos < total {
                sent_in_block += 1;
                if sent_in_block == block_size {
                    let (next_bs, _) = self.await_flow_control(frames).await?;
                    block_size = next_bs;
                    sent_in_block = 0;
                }
            }
        }
        Ok(())
    }

    /// Wait for a clear-to-send flow control; returns `(block_size, st_min)`.
    async fn await_flow_control(
        &self,
        frames: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Result<(u8, u8), TransportError> {
        let deadline = Instant::now() + FLOW_CONTROL_TIMEOUT;
        loop {
            let frame = self.next_frame(frames, deadline).await?;
            if frame[0] >> 4 != pci::FLOW_CONTROL {
                trace!(data = ?frame, "ignoring non-FC frame during segmented send");
                continue;
            }
            match frame[0] & 0x0F {
                0x0 => {
                    let block_size = frame.get(1).copied().unwrap_or(0);
                    let st_min = frame.get(2).copied().unwrap_or(0);
                    return Ok((block_size, st_min));
                }
                0x1 => continue, // wait; the ECU will send another FC
                _ => {
                    return Err(TransportError::Protocol(
                        "flow control reported overflow".to_string(),
                    ))
                }
            }
        }
    }

    async fn recv_segmented(
        &self,
        first: &[u8],
        frames: &mut mpsc::UnboundedReceiver<Vec<u8>>,
        deadline: Instant,
    ) -> Result<Vec<u8>, TransportError> {
        let total = (((first[0] & 0x0F) as usize) << 8) | first[1] as usize;
        if total > MAX_TRANSFER {
            return Err(TransportError::Protocol(format!(
                "first frame declares {total} bytes"
            )));
        }

        let mut buf = Vec::with_capacity(total);
        let head = first.len().min(2 + total) - 2;
        buf.extend_from_slice(&first[2..2 + head]);

        // Clear to send, no block limit, no separation time.
        self.write_raw(&[0x30, 0x00, 0x00]).await?;

        let mut expected_sn: u8 = 1;
        while buf.len() < total {
            let frame = self.next_frame(frames, deadline).await?;
            if frame[0] >> 4 != pci::CONSECUTIVE {
                trace!(data = ?frame, "ignoring non-CF frame during reassembly");
                continue;
            }
            if frame[0] & 0x0F != expected_sn {
                return Err(TransportError::Protocol(format!(
                    "sequence number mismatch: expected {expected_sn}, got {}",
                    frame[0] & 0x0F
                )));
            }
            let chunk = (frame.len() - 1).min(total - buf.len());
            buf.extend_from_slice(&frame[1..1 + chunk]);
            expected_sn = (expected_sn + 1) & 0x0F;
        }
        Ok(buf)
    }
}

#[async_trait]
impl UdsTransport for IsoTpLink {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if payload.is_empty() || payload.len() > MAX_TRANSFER {
            return Err(TransportError::Protocol(format!(
                "payload of {} bytes not sendable over iso-tp",
                payload.len()
            )));
        }

        let mut frames = self.frames.lock().await;
        // Drop stale frames left over from an earlier, timed-out exchange.
        while frames.try_recv().is_ok() {}

        if payload.len() <= 7 {
            let mut frame = vec![payload.len() as u8];
            frame.extend_from_slice(payload);
            self.write_raw(&frame).await
        } else {
            self.send_segmented(payload, &mut frames).await
        }
    }

    async fn recv(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut frames = self.frames.lock().await;
        let deadline = Instant::now() + timeout;
        loop {
            let frame = self.next_frame(&mut frames, deadline).await?;
            match frame[0] >> 4 {
                pci::SINGLE => {
                    let len = (frame[0] & 0x0F) as usize;
                    if len > 7 || len + 1 > frame.len() {
                        return Err(TransportError::Protocol(format!(
                            "single frame with invalid length {len}"
                        )));
                    }
                    return Ok(frame[1..1 + len].to_vec());
                }
                pci::FIRST if frame.len() >= 2 => {
                    return self.recv_segmented(&frame, &mut frames, deadline).await
                }
                _ => {
                    // A stray CF/FC never starts a transfer.
                    trace!(data = ?frame, "ignoring frame outside a transfer");
                }
            }
        }
    }
}

impl Drop for IsoTpLink {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

fn open_socket(interface: &str) -> Result<CanSocket, TransportError> {
    let socket = CanSocket::open(interface)
        .map_err(|e| TransportError::ConnectionFailed(format!("open {interface}: {e}")))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| TransportError::InvalidConfig(format!("set non-blocking: {e}")))?;
    Ok(socket)
}

fn spawn_reader(
    socket: CanSocket,
    rx_id: u32,
    frames: mpsc::UnboundedSender<Vec<u8>>,
    running: Arc<AtomicBool>,
) {
    std::thread::Builder::new()
        .name("isotp-rx".to_string())
        .spawn(move || {
            while running.load(Ordering::Relaxed) {
                match socket.read_frame() {
                    Ok(frame) => {
                        if frame.raw_id() != rx_id || frame.data().is_empty() {
                            continue;
                        }
                        if frames.send(frame.data().to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(RX_POLL);
                    }
                    Err(e) => {
                        warn!(?e, "CAN read error");
                        std::thread::sleep(Duration::from_millis(100));
                    }
                }
            }
            debug!("iso-tp reader stopped");
        })
        .expect("spawn isotp-rx thread");
}

/// Interpret an FC STmin byte: 0x01–0x7F are milliseconds, 0xF1–0xF9 are
/// 100–900 µs, everything else means no pause.
fn st_min_pause(st_min: u8) -> Option<Duration> {
    match st_min {
        0x01..=0x7F => Some(Duration::from_millis(st_min as u64)),
        0xF1..=0xF9 => Some(Duration::from_micros((st_min - 0xF0) as u64 * 100)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn st_min_interpretation() {
        assert_eq!(st_min_pause(0x00), None);
        assert_eq!(st_min_pause(0x05), Some(Duration::from_millis(5)));
        assert_eq!(st_min_pause(0x7F), Some(Duration::from_millis(127)));
        assert_eq!(st_min_pause(0xF1), Some(Duration::from_micros(100)));
        assert_eq!(st_min_pause(0x80), None);
    }
}
