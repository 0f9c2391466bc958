//! husk-core - shared telemetry types for the K701 pipeline
//!
//! This crate holds the pieces every driver and consumer agrees on:
//!
//! - the binary frame codec used on the wire, on disk and during replay
//! - the [`Sample`] type and the [`EventHub`] that fans samples out to
//!   subscribers
//! - stream windowing and the dashboard model (streams, charts, tick)
//!
//! ```text
//! driver ──decoded samples──▶ EventHub ──▶ subscribers
//!    │                            │
//!    └──raw frames──▶ rawlog      └──▶ Dashboard (windowed, render-ready)
//! ```

pub mod chart;
pub mod frame;
pub mod hub;
pub mod sample;
pub mod stream;

pub use chart::{Chart, Dashboard};
pub use frame::{crc8, Frame, FrameError, FrameReader, FRAME_MAGIC, MAX_PAYLOAD_LEN};
pub use hub::{EventHub, Subscription};
pub use sample::Sample;
pub use stream::{ColourStop, DataPoint, Stream, StreamDescriptor};
