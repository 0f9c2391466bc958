//! UDS negative response codes
//!
//! The subset of ISO 14229 NRCs this pipeline actually meets, plus a
//! catch-all for the rest. `ResponsePending` and `RequestOutOfRange` get
//! special handling upstream; everything else is diagnostic detail.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nrc {
    GeneralReject,
    ServiceNotSupported,
    SubFunctionNotSupported,
    IncorrectMessageLength,
    BusyRepeatRequest,
    ConditionsNotCorrect,
    RequestSequenceError,
    RequestOutOfRange,
    SecurityAccessDenied,
    InvalidKey,
    ExceededNumberOfAttempts,
    RequiredTimeDelayNotExpired,
    UploadDownloadNotAccepted,
    GeneralProgrammingFailure,
    WrongBlockSequenceCounter,
    ResponsePending,
    ServiceNotSupportedInActiveSession,
    Other(u8),
}

impl Nrc {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x10 => Nrc::GeneralReject,
            0x11 => Nrc::ServiceNotSupported,
            0x12 => Nrc::SubFunctionNotSupported,
            0x13 => Nrc::IncorrectMessageLength,
            0x21 => Nrc::BusyRepeatRequest,
            0x22 => Nrc::ConditionsNotCorrect,
            0x24 => Nrc::RequestSequenceError,
            0x31 => Nrc::RequestOutOfRange,
            0x33 => Nrc::SecurityAccessDenied,
            0x35 => Nrc::InvalidKey,
            0x36 => Nrc::ExceededNumberOfAttempts,
            0x37 => Nrc::RequiredTimeDelayNotExpired,
            0x70 => Nrc::UploadDownloadNotAccepted,
            0x72 => Nrc::GeneralProgrammingFailure,
            0x73 => Nrc::WrongBlockSequenceCounter,
            0x78 => Nrc::ResponsePending,
            0x7F => Nrc::ServiceNotSupportedInActiveSession,
            other => Nrc::Other(other),
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            Nrc::GeneralReject => 0x10,
            Nrc::ServiceNotSupported => 0x11,
            Nrc::SubFunctionNotSupported => 0x12,
            Nrc::IncorrectMessageLength => 0x13,
            Nrc::BusyRepeatRequest => 0x21,
            Nrc::ConditionsNotCorrect => 0x22,
            Nrc::RequestSequenceError => 0x24,
            Nrc::RequestOutOfRange => 0x31,
            Nrc::SecurityAccessDenied => 0x33,
            Nrc::InvalidKey => 0x35,
            Nrc::ExceededNumberOfAttempts => 0x36,
            Nrc::RequiredTimeDelayNotExpired => 0x37,
            Nrc::UploadDownloadNotAccepted => 0x70,
            Nrc::GeneralProgrammingFailure => 0x72,
            Nrc::WrongBlockSequenceCounter => 0x73,
            Nrc::ResponsePending => 0x78,
            Nrc::ServiceNotSupportedInActiveSession => 0x7F,
            Nrc::Other(byte) => byte,
        }
    }
}

impl From<u8> for Nrc {
    fn from(byte: u8) -> Self {
        Nrc::from_byte(byte)
    }
}

impl fmt::Display for Nrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Nrc::Other(byte) => write!(f, "unknown NRC {byte:#04x}"),
            known => write!(f, "{known:?} ({:#04x})", known.byte()),
        }
    }
}
