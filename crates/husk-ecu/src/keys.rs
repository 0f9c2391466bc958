//! K701 SecurityAccess seed/key algorithm
//!
//! The ECU hands out a two-byte seed; the expected key is the seed
//! multiplied by a per-level magic constant, truncated to 16 bits. Level
//! 1 exists in the protocol but no magic number for it is known.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    Level2,
    Level3,
}

impl SecurityLevel {
    pub fn as_u8(self) -> u8 {
        match self {
            SecurityLevel::Level2 => 2,
            SecurityLevel::Level3 => 3,
        }
    }

    fn magic(self) -> u16 {
        match self {
            SecurityLevel::Level2 => 0x4D4E,
            SecurityLevel::Level3 => 0x6F31,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("no key algorithm for security level {0}")]
    UnsupportedLevel(u8),
}

/// Compute the two-byte key for a two-byte seed, big-endian on both
/// sides: `key = (magic[level] * seed) mod 2^16`.
pub fn generate_key(level: u8, seed: [u8; 2]) -> Result<[u8; 2], KeyError> {
    let level = match level {
        2 => SecurityLevel::Level2,
        3 => SecurityLevel::Level3,
        other => return Err(KeyError::UnsupportedLevel(other)),
    };

    let seed = u16::from_be_bytes(seed);
    let key = level.magic().wrapping_mul(seed);
    Ok(key.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level3_key() {
        // (0x6F31 * 0x1234) mod 2^16 = 0x07F4
        assert_eq!(generate_key(3, [0x12, 0x34]), Ok([0x07, 0xF4]));
        // (0x6F31 * 0xABCD) mod 2^16 = 0xC53D
        assert_eq!(generate_key(3, [0xAB, 0xCD]), Ok([0xC5, 0x3D]));
    }

    #[test]
    fn level2_key() {
        // Seed 1 returns the magic itself.
        assert_eq!(generate_key(2, [0x00, 0x01]), Ok([0x4D, 0x4E]));
    }

    #[test]
    fn level1_is_unsupported() {
        assert_eq!(generate_key(1, [0x00, 0x01]), Err(KeyError::UnsupportedLevel(1)));
        assert!(generate_key(0, [0x00, 0x00]).is_err());
        assert!(generate_key(4, [0x00, 0x00]).is_err());
    }
}
