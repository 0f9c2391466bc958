//! UDS client
//!
//! Pairs requests with responses over any [`UdsTransport`], handling
//! negative responses, `responsePending` deadline extension and response
//! shape validation. Every exchange, TesterPresent included, goes through
//! one bus mutex so the keepalive can never interleave with an in-flight
//! transaction on a shared link.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::UdsError;
use crate::nrc::Nrc;
use crate::transport::UdsTransport;
use crate::wire::{security, service, ALFID_CANDIDATES, SUPPRESS_POSITIVE_RESPONSE};

/// Deadline for one ReadDataByIdentifier round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_millis(50);

/// Deadline for each step of the security handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(300);

pub struct UdsClient {
    transport: Arc<dyn UdsTransport>,
    /// Serializes bus exchanges; see module docs.
    bus: tokio::sync::Mutex<()>,
    request_timeout: Duration,
    handshake_timeout: Duration,
    /// First ALFID the ECU accepted for ReadMemoryByAddress.
    alfid: Mutex<Option<u8>>,
}

impl UdsClient {
    pub fn new(transport: Arc<dyn UdsTransport>) -> Self {
        Self {
            transport,
            bus: tokio::sync::Mutex::new(()),
            request_timeout: REQUEST_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            alfid: Mutex::new(None),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Send `request` and wait for its positive response.
    ///
    /// `7F <sid> 78` (responsePending) restarts the receive deadline one
    /// iteration at a time; any other negative response is returned as
    /// [`UdsError::NegativeResponse`]. Unrelated payloads (stale answers
    /// to a timed-out request) are ignored.
    pub async fn request(&self, request: &[u8], timeout: Duration) -> Result<Vec<u8>, UdsError> {
        let sid = request[0];
        let expected = sid.wrapping_add(service::POSITIVE_OFFSET);

        let _bus = self.bus.lock().await;
        self.transport.send(request).await?;

        loop {
            let response = self.transport.recv(timeout).await.map_err(|e| match e {
                crate::error::TransportError::Timeout => UdsError::Timeout,
                other => UdsError::Transport(other),
            })?;

            match response.first() {
                Some(&first) if first == expected => return Ok(response),
                Some(&service::NEGATIVE_RESPONSE) => {
                    if response.len() < 3 {
                        return Err(UdsError::InvalidResponse(
                            "negative response shorter than 3 bytes".to_string(),
                        ));
                    }
                    if response[1] != sid {
                        trace!(?response, "negative response for another service, ignoring");
                        continue;
                    }
                    let nrc = Nrc::from_byte(response[2]);
                    if nrc == Nrc::ResponsePending {
                        trace!(sid = format!("{sid:#04x}"), "response pending, extending deadline");
                        continue;
                    }
                    return Err(UdsError::NegativeResponse { service: sid, nrc });
                }
                _ => {
                    trace!(?response, "unrelated payload while waiting, ignoring");
                }
            }
        }
    }

    /// ReadDataByIdentifier (0x22). Returns the record data with the
    /// `62 <did>` echo stripped and verified.
    pub async fn read_data_by_identifier(&self, did: u16) -> Result<Vec<u8>, UdsError> {
        let did_be = did.to_be_bytes();
        let request = [service::READ_DATA_BY_ID, did_be[0], did_be[1]];
        let response = self.request(&request, self.request_timeout).await?;

        if response.len() < 3 || response[1] != did_be[0] || response[2] != did_be[1] {
            return Err(UdsError::InvalidResponse(format!(
                "RDBI echo mismatch for DID {did:#06x}"
            )));
        }
        Ok(response[3..].to_vec())
    }

    /// SecurityAccess seed request (0x27, odd sub-function). Returns the
    /// two seed bytes.
    pub async fn request_seed(&self, level: u8) -> Result<[u8; 2], UdsError> {
        let sub = seed_sub_function(level)?;
        let response = self
            .request(&[service::SECURITY_ACCESS, sub], self.handshake_timeout)
            .await?;

        if response.len() < 4 || response[1] != sub {
            return Err(UdsError::InvalidResponse(format!(
                "seed response for level {level} malformed"
            )));
        }
        Ok([response[2], response[3]])
    }

    /// SecurityAccess key submission (0x27, even sub-function).
    pub async fn send_key(&self, level: u8, key: [u8; 2]) -> Result<(), UdsError> {
        let sub = seed_sub_function(level)? + 1;
        let response = self
            .request(
                &[service::SECURITY_ACCESS, sub, key[0], key[1]],
                self.handshake_timeout,
            )
            .await?;

        if response.len() < 2 || response[1] != sub {
            return Err(UdsError::InvalidResponse(format!(
                "key response for level {level} malformed"
            )));
        }
        debug!(level, "security access granted");
        Ok(())
    }

    /// TesterPresent (0x3E) with suppressed positive response; fire and
    /// forget, but still serialized against transactions.
    pub async fn tester_present(&self) -> Result<(), UdsError> {
        let _bus = self.bus.lock().await;
        self.transport
            .send(&[service::TESTER_PRESENT, SUPPRESS_POSITIVE_RESPONSE])
            .await?;
        Ok(())
    }

    /// ReadMemoryByAddress (0x23). Probes the ALFID enumeration until the
    /// ECU accepts one, then sticks with it while it still fits the
    /// address and size.
    pub async fn read_memory_by_address(
        &self,
        address: u32,
        size: usize,
    ) -> Result<Vec<u8>, UdsError> {
        if let Some(alfid) = self.cached_alfid(address, size) {
            return self.read_memory_with(alfid, address, size).await;
        }

        let mut last_err = UdsError::InvalidResponse("no usable ALFID".to_string());
        for alfid in ALFID_CANDIDATES {
            if !alfid_fits(alfid, address, size) {
                continue;
            }
            match self.read_memory_with(alfid, address, size).await {
                Ok(data) => {
                    debug!(alfid = format!("{alfid:#04x}"), "ALFID accepted");
                    *self.alfid.lock() = Some(alfid);
                    return Ok(data);
                }
                Err(e) if e.is_out_of_range() || e.is_transient() => {
                    trace!(alfid = format!("{alfid:#04x}"), error = %e, "ALFID rejected");
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    fn cached_alfid(&self, address: u32, size: usize) -> Option<u8> {
        let mut cached = self.alfid.lock();
        match *cached {
            Some(alfid) if alfid_fits(alfid, address, size) => Some(alfid),
            Some(_) => {
                // Address grew past the cached format; re-probe.
                *cached = None;
                None
            }
            None => None,
        }
    }

    async fn read_memory_with(
        &self,
        alfid: u8,
        address: u32,
        size: usize,
    ) -> Result<Vec<u8>, UdsError> {
        let mut request = vec![service::READ_MEMORY_BY_ADDRESS, alfid];
        push_be(&mut request, address as u64, (alfid >> 4) as usize);
        push_be(&mut request, size as u64, (alfid & 0x0F) as usize);

        let response = self.request(&request, self.request_timeout).await?;
        Ok(response[1..].to_vec())
    }

    /// RequestUpload (0x35). Returns the usable data bytes per
    /// TransferData block (maxNumberOfBlockLength minus the two response
    /// overhead bytes).
    pub async fn request_upload(&self, address: u32, size: usize) -> Result<u32, UdsError> {
        let alfid = ALFID_CANDIDATES
            .into_iter()
            .find(|&a| alfid_fits(a, address, size))
            .ok_or_else(|| {
                UdsError::InvalidResponse(format!("no ALFID fits {address:#x}+{size:#x}"))
            })?;

        let mut request = vec![service::REQUEST_UPLOAD, 0x00, alfid];
        push_be(&mut request, address as u64, (alfid >> 4) as usize);
        push_be(&mut request, size as u64, (alfid & 0x0F) as usize);

        let response = self.request(&request, self.handshake_timeout).await?;
        if response.len() < 2 {
            return Err(UdsError::InvalidResponse(
                "RequestUpload response too short".to_string(),
            ));
        }

        let len_bytes = (response[1] >> 4) as usize;
        if response.len() < 2 + len_bytes || len_bytes == 0 {
            return Err(UdsError::InvalidResponse(
                "RequestUpload response missing maxNumberOfBlockLength".to_string(),
            ));
        }
        let mut max_block: u32 = 0;
        for &byte in &response[2..2 + len_bytes] {
            max_block = (max_block << 8) | byte as u32;
        }
        Ok(max_block.saturating_sub(2))
    }

    /// TransferData (0x36) in the upload direction: requests the next
    /// block from the ECU. Returns the echoed counter and the data.
    pub async fn transfer_data_upload(&self, counter: u8) -> Result<(u8, Vec<u8>), UdsError> {
        let response = self
            .request(&[service::TRANSFER_DATA, counter], self.handshake_timeout)
            .await?;
        if response.len() < 2 {
            return Err(UdsError::InvalidResponse(
                "TransferData response too short".to_string(),
            ));
        }
        Ok((response[1], response[2..].to_vec()))
    }

    /// RequestTransferExit (0x37).
    pub async fn request_transfer_exit(&self) -> Result<(), UdsError> {
        self.request(&[service::REQUEST_TRANSFER_EXIT], self.handshake_timeout)
            .await?;
        Ok(())
    }
}

fn seed_sub_function(level: u8) -> Result<u8, UdsError> {
    match level {
        2 => Ok(security::L2_REQUEST_SEED),
        3 => Ok(security::L3_REQUEST_SEED),
        other => Err(UdsError::InvalidResponse(format!(
            "security level {other} not supported"
        ))),
    }
}

/// Whether `alfid` can encode this address and size.
fn alfid_fits(alfid: u8, address: u32, size: usize) -> bool {
    let addr_bytes = (alfid >> 4) as u32;
    let size_bytes = (alfid & 0x0F) as u32;
    if addr_bytes == 0 || size_bytes == 0 {
        return false;
    }
    let addr_fits = addr_bytes >= 4 || u64::from(address) < 1u64 << (8 * addr_bytes);
    let size_fits = size_bytes >= 4 || (size as u64) < 1u64 << (8 * size_bytes);
    addr_fits && size_fits
}

/// Append the lowest `count` bytes of `value`, big-endian.
fn push_be(out: &mut Vec<u8>, value: u64, count: usize) {
    for i in (0..count).rev() {
        out.push((value >> (8 * i)) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn client() -> (Arc<MockTransport>, UdsClient) {
        let transport = Arc::new(MockTransport::new());
        let client = UdsClient::new(transport.clone());
        (transport, client)
    }

    #[tokio::test]
    async fn rdbi_strips_validated_echo() {
        let (transport, client) = client();
        transport.push_response(vec![0x62, 0x01, 0x00, 0x0F, 0xA0]);

        let data = client.read_data_by_identifier(0x0100).await.unwrap();
        assert_eq!(data, vec![0x0F, 0xA0]);
        assert_eq!(transport.sent(), vec![vec![0x22, 0x01, 0x00]]);
    }

    #[tokio::test]
    async fn rdbi_echo_mismatch_is_protocol_error() {
        let (transport, client) = client();
        transport.push_response(vec![0x62, 0x00, 0x09, 0x00]);

        let err = client.read_data_by_identifier(0x0100).await.unwrap_err();
        assert!(matches!(err, UdsError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn response_pending_extends_the_wait() {
        let (transport, client) = client();
        transport.push_response(vec![0x7F, 0x22, 0x78]);
        transport.push_response(vec![0x7F, 0x22, 0x78]);
        transport.push_response(vec![0x62, 0x00, 0x09, 0x00, 0x5A]);

        let data = client.read_data_by_identifier(0x0009).await.unwrap();
        assert_eq!(data, vec![0x00, 0x5A]);
        // One request on the wire; the pendings only re-armed the receive.
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn other_negatives_surface_the_nrc() {
        let (transport, client) = client();
        transport.push_response(vec![0x7F, 0x22, 0x31]);

        let err = client.read_data_by_identifier(0x0100).await.unwrap_err();
        assert!(err.is_out_of_range());
    }

    #[tokio::test]
    async fn silence_is_a_timeout() {
        let (_transport, client) = client();
        let err = client.read_data_by_identifier(0x0100).await.unwrap_err();
        assert!(matches!(err, UdsError::Timeout));
    }

    #[tokio::test]
    async fn seed_request_uses_level_sub_function() {
        let (transport, client) = client();
        transport.push_response(vec![0x67, 0x05, 0xAB, 0xCD]);

        let seed = client.request_seed(3).await.unwrap();
        assert_eq!(seed, [0xAB, 0xCD]);
        assert_eq!(transport.sent(), vec![vec![0x27, 0x05]]);
    }

    #[tokio::test]
    async fn level_one_is_rejected() {
        let (_transport, client) = client();
        assert!(client.request_seed(1).await.is_err());
    }

    #[tokio::test]
    async fn tester_present_never_reads() {
        let (transport, client) = client();
        client.tester_present().await.unwrap();
        assert_eq!(transport.sent(), vec![vec![0x3E, 0x80]]);
    }

    #[tokio::test]
    async fn alfid_probe_caches_first_accepted() {
        let (transport, client) = client();
        // First candidate 0x31 rejected out-of-range, second accepted.
        transport.push_response(vec![0x7F, 0x23, 0x31]);
        transport.push_response(vec![0x63, 0xDE, 0xAD]);

        let data = client.read_memory_by_address(0x1000, 2).await.unwrap();
        assert_eq!(data, vec![0xDE, 0xAD]);

        let sent = transport.sent();
        assert_eq!(sent[0], vec![0x23, 0x31, 0x00, 0x10, 0x00, 0x02]);
        assert_eq!(sent[1], vec![0x23, 0x32, 0x00, 0x10, 0x00, 0x00, 0x02]);

        // Next read reuses 0x32 without probing.
        transport.push_response(vec![0x63, 0xBE, 0xEF]);
        client.read_memory_by_address(0x1002, 2).await.unwrap();
        assert_eq!(transport.sent_count(), 3);
        assert_eq!(
            transport.sent()[2],
            vec![0x23, 0x32, 0x00, 0x10, 0x02, 0x00, 0x02]
        );
    }

    #[tokio::test]
    async fn request_upload_parses_block_length() {
        let (transport, client) = client();
        // lengthFormatIdentifier 0x20 → 2 bytes of maxNumberOfBlockLength
        transport.push_response(vec![0x75, 0x20, 0x01, 0x02]);

        let max = client.request_upload(0x0000, 0x8000).await.unwrap();
        assert_eq!(max, 0x0102 - 2);
    }

    #[tokio::test]
    async fn transfer_data_returns_counter_and_block() {
        let (transport, client) = client();
        transport.push_response(vec![0x76, 0x01, 0xAA, 0xBB, 0xCC]);

        let (counter, data) = client.transfer_data_upload(1).await.unwrap();
        assert_eq!(counter, 1);
        assert_eq!(data, vec![0xAA, 0xBB, 0xCC]);
    }
}
