//! Wire-level constants for the K701 diagnostic session

/// Tester → ECU CAN identifier (11-bit).
pub const CAN_ID_REQUEST: u32 = 0x7E0;

/// ECU → tester CAN identifier (11-bit).
pub const CAN_ID_RESPONSE: u32 = 0x7E8;

/// UDS service identifiers used by this pipeline.
pub mod service {
    pub const READ_DATA_BY_ID: u8 = 0x22;
    pub const READ_MEMORY_BY_ADDRESS: u8 = 0x23;
    pub const SECURITY_ACCESS: u8 = 0x27;
    pub const REQUEST_UPLOAD: u8 = 0x35;
    pub const TRANSFER_DATA: u8 = 0x36;
    pub const REQUEST_TRANSFER_EXIT: u8 = 0x37;
    pub const TESTER_PRESENT: u8 = 0x3E;

    pub const NEGATIVE_RESPONSE: u8 = 0x7F;
    /// Positive responses echo the request SID plus this offset.
    pub const POSITIVE_OFFSET: u8 = 0x40;
}

/// SecurityAccess (0x27) sub-functions. Seed requests are odd, the
/// matching key submission is seed + 1.
pub mod security {
    pub const L2_REQUEST_SEED: u8 = 0x03;
    pub const L2_SEND_KEY: u8 = 0x04;
    pub const L3_REQUEST_SEED: u8 = 0x05;
    pub const L3_SEND_KEY: u8 = 0x06;
}

/// TesterPresent sub-function bit 7: suppress the positive response.
pub const SUPPRESS_POSITIVE_RESPONSE: u8 = 0x80;

/// AddressAndLengthFormatIdentifiers probed for ReadMemoryByAddress.
/// High nibble = address byte count, low nibble = length byte count.
pub const ALFID_CANDIDATES: [u8; 8] = [0x31, 0x32, 0x33, 0x34, 0x41, 0x42, 0x43, 0x44];
