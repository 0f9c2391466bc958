//! husk-uds - UDS client and ISO-TP transports for the K701 vehicle bus
//!
//! Layering, bottom up:
//!
//! - [`transport`]: moves raw UDS payloads. Either a user-space ISO-TP
//!   implementation over two raw SocketCAN sockets (the live driver), a
//!   kernel `CAN_ISOTP` socket (the ROM dumper), or a scripted mock for
//!   tests.
//! - [`UdsClient`]: request/response with negative-response handling,
//!   `responsePending` deadline extension and a bus mutex that keeps
//!   TesterPresent from interleaving with an in-flight transaction.
//!
//! Seed/key math is ECU-specific and lives in `husk-ecu`; the client only
//! moves seeds and keys.

pub mod client;
pub mod error;
pub mod nrc;
pub mod transport;
pub mod wire;

pub use client::UdsClient;
pub use error::{TransportError, UdsError};
pub use nrc::Nrc;
pub use transport::UdsTransport;
