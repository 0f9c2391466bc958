//! Binary frame codec
//!
//! One record on the wire, on disk and over the serial bridge:
//!
//! ```text
//! [AA 55][millis:u32 LE][DID:u16 BE][len:u8][data:len][crc8]
//! ```
//!
//! The CRC is CRC-8-CCITT (poly 0x07, init 0x00, no reflection) computed
//! over everything between the magic bytes and the CRC itself. The decoder
//! scans byte-by-byte for the magic sequence, so a reader dropped into the
//! middle of a stream resynchronises on the next frame boundary.

use std::io::{self, Read};

use thiserror::Error;

/// Frame start marker.
pub const FRAME_MAGIC: [u8; 2] = [0xAA, 0x55];

/// Largest payload a frame may carry.
pub const MAX_PAYLOAD_LEN: usize = 64;

/// Millis header + DID + length byte.
const HEADER_LEN: usize = 7;

/// One validated frame from the stream/log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Source-relative milliseconds, little-endian on the wire.
    pub timestamp_ms: u32,
    /// Data identifier, big-endian on the wire.
    pub did: u16,
    /// Raw DID payload, up to [`MAX_PAYLOAD_LEN`] bytes.
    pub data: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FrameError {
    /// The underlying reader is exhausted. Terminal.
    #[error("end of stream")]
    Eof,

    /// Declared payload length outside `0..=64`. The reader may rescan.
    #[error("frame data length {0} outside range")]
    BadLen(u8),

    /// Stored checksum does not match the computed one. The reader may rescan.
    #[error("frame checksum mismatch (computed {computed:#04x}, received {received:#04x})")]
    BadCrc { computed: u8, received: u8 },

    #[error("frame read failed: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Errors a scanning consumer can skip past; [`FrameError::Eof`] and
    /// I/O failures are terminal.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::BadLen(_) | FrameError::BadCrc { .. })
    }
}

impl Frame {
    pub fn new(timestamp_ms: u32, did: u16, data: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp_ms,
            did,
            data: data.into(),
        }
    }

    /// Serialise the frame, magic and CRC included.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.data.len() <= MAX_PAYLOAD_LEN);

        let mut out = Vec::with_capacity(2 + HEADER_LEN + self.data.len() + 1);
        out.extend_from_slice(&FRAME_MAGIC);
        out.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        out.extend_from_slice(&self.did.to_be_bytes());
        out.push(self.data.len() as u8);
        out.extend_from_slice(&self.data);
        out.push(crc8(0x00, &out[2..]));
        out
    }
}

/// CRC-8-CCITT over `buf`, poly 0x07, starting from `init`.
pub fn crc8(init: u8, buf: &[u8]) -> u8 {
    let mut crc = init;
    for &byte in buf {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Incremental frame decoder over any byte source.
///
/// Wrap the source in a `BufReader` when it is a file or socket; the
/// scanner reads one byte at a time while hunting for magic.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read the next frame, discarding noise until a magic sequence is
    /// found. `BadLen`/`BadCrc` leave the reader positioned after the bad
    /// frame's consumed bytes, so callers can keep scanning.
    pub fn read_frame(&mut self) -> Result<Frame, FrameError> {
        self.sync_to_magic()?;

        let mut header = [0u8; HEADER_LEN];
        self.read_exact(&mut header)?;

        let len = header[6];
        if len as usize > MAX_PAYLOAD_LEN {
            return Err(FrameError::BadLen(len));
        }

        let mut tail = vec![0u8; len as usize + 1];
        self.read_exact(&mut tail)?;
        let received = tail[len as usize];
        tail.truncate(len as usize);

        let mut computed = crc8(0x00, &header);
        computed = crc8(computed, &tail);
        if computed != received {
            return Err(FrameError::BadCrc { computed, received });
        }

        Ok(Frame {
            timestamp_ms: u32::from_le_bytes([header[0], header[1], header[2], header[3]]),
            did: u16::from_be_bytes([header[4], header[5]]),
            data: tail,
        })
    }

    /// Advance until the two magic bytes have been consumed.
    fn sync_to_magic(&mut self) -> Result<(), FrameError> {
        let mut byte = self.read_byte()?;
        loop {
            if byte != FRAME_MAGIC[0] {
                byte = self.read_byte()?;
                continue;
            }
            let next = self.read_byte()?;
            if next == FRAME_MAGIC[1] {
                return Ok(());
            }
            // The mismatch may itself be the start of the real magic
            // (e.g. AA AA 55), so re-examine it instead of discarding.
            byte = next;
        }
    }

    fn read_byte(&mut self) -> Result<u8, FrameError> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), FrameError> {
        self.inner.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                FrameError::Eof
            } else {
                FrameError::Io(e)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_one(bytes: &[u8]) -> Result<Frame, FrameError> {
        FrameReader::new(Cursor::new(bytes.to_vec())).read_frame()
    }

    #[test]
    fn round_trips_all_payload_lengths() {
        for len in 0..=MAX_PAYLOAD_LEN {
            let data: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let frame = Frame::new(0x0102_0304, 0x0100, data);
            let decoded = read_one(&frame.encode()).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn known_rpm_frame_decodes() {
        // 4000 raw (0x0FA0) on DID 0x0100 at t=10000ms
        let frame = Frame::new(10_000, 0x0100, vec![0x0F, 0xA0]);
        let encoded = frame.encode();
        assert_eq!(&encoded[..2], &FRAME_MAGIC);
        assert_eq!(&encoded[2..6], &10_000u32.to_le_bytes());
        assert_eq!(&encoded[6..8], &[0x01, 0x00]);
        assert_eq!(encoded[8], 2);
        assert_eq!(read_one(&encoded).unwrap(), frame);
    }

    #[test]
    fn any_flipped_bit_fails_crc() {
        let frame = Frame::new(1234, 0x0031, vec![0x00, 0x02]);
        let encoded = frame.encode();
        // Skip the magic (corruption there means resync, not BadCrc) and
        // the CRC byte itself (flipping it is also a mismatch, checked last).
        for i in 2..encoded.len() - 1 {
            for bit in 0..8 {
                let mut corrupt = encoded.clone();
                corrupt[i] ^= 1 << bit;
                match read_one(&corrupt) {
                    Err(FrameError::BadCrc { .. }) => {}
                    // Flipping the length byte may also trip the range check
                    // or starve the reader before the CRC is reached.
                    Err(FrameError::BadLen(_)) | Err(FrameError::Eof) if i == 8 => {}
                    other => panic!("byte {i} bit {bit}: expected failure, got {other:?}"),
                }
            }
        }

        let mut corrupt_crc = encoded;
        let last = corrupt_crc.len() - 1;
        corrupt_crc[last] ^= 0x01;
        assert!(matches!(
            read_one(&corrupt_crc),
            Err(FrameError::BadCrc { .. })
        ));
    }

    #[test]
    fn resynchronises_past_garbage_prefix() {
        let frame = Frame::new(77, 0x0009, vec![0x00, 0x5A]);
        let prefixes: &[&[u8]] = &[
            &[0x00],
            &[0xFF, 0x13, 0x37],
            &[0xAA],             // lone first magic byte
            &[0xAA, 0x54, 0x55], // near-miss magic
            &[0x55, 0xAA],      // reversed magic
        ];
        for prefix in prefixes {
            let mut bytes = prefix.to_vec();
            bytes.extend_from_slice(&frame.encode());
            assert_eq!(read_one(&bytes).unwrap(), frame, "prefix {prefix:02X?}");
        }
    }

    #[test]
    fn over_length_frame_is_bad_len() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&FRAME_MAGIC);
        bytes.extend_from_slice(&[0, 0, 0, 0, 0x01, 0x00]);
        bytes.push(65); // over MAX_PAYLOAD_LEN
        bytes.extend_from_slice(&[0u8; 66]);
        assert!(matches!(read_one(&bytes), Err(FrameError::BadLen(65))));
    }

    #[test]
    fn empty_stream_is_eof() {
        assert!(matches!(read_one(&[]), Err(FrameError::Eof)));
    }

    #[test]
    fn consecutive_frames_decode_in_order() {
        let frames = [
            Frame::new(0, 0x0100, vec![0x0F, 0xA0]),
            Frame::new(10, 0x0031, vec![0x00, 0x02]),
            Frame::new(20, 0x0009, vec![0x5A]),
        ];
        let mut bytes = Vec::new();
        for frame in &frames {
            bytes.extend_from_slice(&frame.encode());
        }

        let mut reader = FrameReader::new(Cursor::new(bytes));
        for expected in &frames {
            assert_eq!(&reader.read_frame().unwrap(), expected);
        }
        assert!(matches!(reader.read_frame(), Err(FrameError::Eof)));
    }

    #[test]
    fn corrupt_frame_then_good_frame_recovers() {
        let good = Frame::new(5, 0x0076, vec![0x02, 0x00]);
        let mut bad = Frame::new(1, 0x0100, vec![0x0F, 0xA0]).encode();
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;

        let mut bytes = bad;
        bytes.extend_from_slice(&good.encode());

        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::BadCrc { .. })
        ));
        assert_eq!(reader.read_frame().unwrap(), good);
    }
}
