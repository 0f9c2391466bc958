//! Serial bridge driver
//!
//! A microcontroller on the bike already speaks the binary frame format;
//! this driver just opens its USB serial port, re-records the stream and
//! pushes decoded samples into the hub. With `--serial-port auto` the
//! first port with an Arduino-or-clone USB vendor ID wins.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use husk_core::{FrameError, FrameReader};
use serialport::{SerialPort, SerialPortType};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::Driver;
use crate::emitter::SampleEmitter;
use crate::rawlog::{RawLog, LOG_EXT, LOG_NAME};

/// Arduino, CH340, CP210x and FTDI vendor IDs; the first enumerated
/// port with one of these wins.
const PREFERRED_VIDS: [u16; 5] = [0x2341, 0x2A03, 0x1A86, 0x10C4, 0x0403];

const READ_TIMEOUT: Duration = Duration::from_millis(500);

pub struct ArduinoDriver {
    port_name: String,
    baud: u32,
    log_dir: PathBuf,
    emitter: Option<SampleEmitter>,
    shutdown: watch::Receiver<bool>,
    port: Option<Box<dyn SerialPort>>,
}

impl ArduinoDriver {
    pub fn new(
        port_name: String,
        baud: u32,
        log_dir: PathBuf,
        emitter: SampleEmitter,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            port_name,
            baud,
            log_dir,
            emitter: Some(emitter),
            shutdown,
            port: None,
        }
    }
}

#[async_trait::async_trait]
impl Driver for ArduinoDriver {
    async fn init(&mut self) -> anyhow::Result<()> {
        let name = if self.port_name == "auto" {
            auto_select_port()?
        } else {
            self.port_name.clone()
        };

        let port = serialport::new(&name, self.baud)
            .timeout(READ_TIMEOUT)
            .open()
            .with_context(|| format!("opening serial port {name}"))?;

        info!(port = %name, baud = self.baud, "serial connected");
        self.port = Some(port);
        Ok(())
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        let port = self.port.take().context("driver not initialised")?;
        let mut emitter = self.emitter.take().context("driver already running")?;
        let mut rawlog =
            RawLog::create(&self.log_dir, LOG_NAME, LOG_EXT).context("opening raw log")?;
        let shutdown = self.shutdown.clone();

        // The serial port only offers blocking reads; run the whole
        // frame loop on the blocking pool and poll the shutdown flag
        // between frames (the read timeout bounds the latency).
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let mut reader = FrameReader::new(port);
            loop {
                if *shutdown.borrow() {
                    let _ = rawlog.flush();
                    return Ok(());
                }

                match reader.read_frame() {
                    Ok(frame) => {
                        // Keep the bridge's own millis clock in the log so
                        // replay timing matches the ride.
                        if let Err(e) =
                            rawlog.write_frame(frame.timestamp_ms, frame.did, &frame.data)
                        {
                            warn!(error = %e, "raw log write failed");
                        }
                        emitter.emit(frame.did as u32, &frame.data);
                        let _ = rawlog.flush_if_due();
                    }
                    Err(FrameError::Eof) => bail!("serial stream closed"),
                    Err(e @ (FrameError::BadLen(_) | FrameError::BadCrc { .. })) => {
                        debug_assert!(e.is_recoverable());
                        debug!(error = %e, "bad frame, rescanning");
                    }
                    Err(FrameError::Io(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                        // Quiet bus; loop around and re-check shutdown.
                    }
                    Err(FrameError::Io(e)) => return Err(e).context("serial read"),
                }
            }
        })
        .await
        .context("serial task panicked")?
    }
}

fn auto_select_port() -> anyhow::Result<String> {
    let ports = serialport::available_ports().context("enumerating serial ports")?;
    for port in ports {
        if let SerialPortType::UsbPort(usb) = &port.port_type {
            if PREFERRED_VIDS.contains(&usb.vid) {
                debug!(port = %port.port_name, vid = format!("{:04x}", usb.vid), "auto-selected port");
                return Ok(port.port_name);
            }
        }
    }
    bail!("no arduino-like serial port found; pass --serial-port explicitly")
}
