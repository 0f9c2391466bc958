//! Transport and protocol error types

use thiserror::Error;

use crate::nrc::Nrc;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("transport closed")]
    Closed,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive timed out")]
    Timeout,

    #[error("iso-tp protocol violation: {0}")]
    Protocol(String),

    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    #[error("transport not supported: {0}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum UdsError {
    /// The ECU answered `7F <sid> <nrc>` with anything other than
    /// `responsePending`.
    #[error("negative response to service {service:#04x}: {nrc}")]
    NegativeResponse { service: u8, nrc: Nrc },

    /// A positive response that does not have the expected shape.
    #[error("malformed response: {0}")]
    InvalidResponse(String),

    #[error("no response before deadline")]
    Timeout,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl UdsError {
    /// True when the ECU reported `requestOutOfRange`; the memory-read
    /// path reads this as end-of-range, the RDBI path as "unknown DID".
    pub fn is_out_of_range(&self) -> bool {
        matches!(
            self,
            UdsError::NegativeResponse {
                nrc: Nrc::RequestOutOfRange,
                ..
            }
        )
    }

    /// Timeouts and transport hiccups; safe to retry or skip past.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UdsError::Timeout | UdsError::Transport(TransportError::Timeout)
        )
    }
}
