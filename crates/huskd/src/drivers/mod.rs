//! Vehicle drivers and their supervisor seam
//!
//! Three ways samples get into the pipeline, selected by `--driver`:
//! a live ECU over SocketCAN, a serial bridge that emits pre-framed
//! telemetry, or deterministic playback of a recorded log. `init` does
//! resource acquisition (and the security handshake where there is one)
//! and is fatal on failure; `run` is the long-lived loop, and its
//! failure leaves the rest of the process serving cached state.

pub mod arduino;
pub mod replay;
#[cfg(target_os = "linux")]
pub mod socket_can;

use std::sync::Arc;

use async_trait::async_trait;
use husk_core::EventHub;
use husk_ecu::K701;
use tokio::sync::watch;

use crate::cli::{Args, DriverKind};
use crate::emitter::SampleEmitter;

#[async_trait]
pub trait Driver: Send {
    /// Acquire resources and perform any handshake. Errors here abort
    /// startup.
    async fn init(&mut self) -> anyhow::Result<()>;

    /// The long-running driver loop; returns when shut down.
    async fn run(&mut self) -> anyhow::Result<()>;
}

/// Build the driver selected on the command line.
pub fn create_driver(
    args: &Args,
    hub: Arc<EventHub>,
    discrete_keys: Vec<&'static str>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Box<dyn Driver>> {
    let emitter = SampleEmitter::new(hub, Arc::new(K701), discrete_keys);

    match args.driver {
        DriverKind::Replay => {
            anyhow::ensure!(
                !args.replay.is_empty(),
                "--replay <path> is required with the replay driver"
            );
            Ok(Box::new(replay::ReplayDriver::new(
                args.replay.clone().into(),
                args.replay_speed,
                args.replay_loop,
                args.replay_skip_frames,
                args.strict_crc,
                emitter,
                shutdown,
            )))
        }
        DriverKind::Arduino => Ok(Box::new(arduino::ArduinoDriver::new(
            args.serial_port.clone(),
            args.baud,
            args.log_dir.clone(),
            emitter,
            shutdown,
        ))),
        #[cfg(target_os = "linux")]
        DriverKind::SocketCan => Ok(Box::new(socket_can::SocketCanDriver::new(
            args.socket_can_address.clone(),
            args.log_dir.clone(),
            emitter,
            shutdown,
        ))),
        #[cfg(not(target_os = "linux"))]
        DriverKind::SocketCan => {
            anyhow::bail!("the socket-can driver requires Linux")
        }
    }
}
