//! Log replay driver
//!
//! Reads a recorded frame log and pushes it through the same decode and
//! broadcast path as live data, reproducing the inter-frame timing from
//! the recorded millis clock scaled by `--replay-speed`. Frames with bad
//! checksums are skipped by default because early recordings carry
//! broken CRCs; `--strict-crc` turns them back into hard errors.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use husk_core::{FrameError, FrameReader};
use tokio::sync::watch;
use tracing::{debug, info};

use super::Driver;
use crate::emitter::SampleEmitter;

const READ_BUFFER: usize = 1 << 20;

pub struct ReplayDriver {
    path: PathBuf,
    speed: f64,
    loop_replay: bool,
    skip_frames: usize,
    strict_crc: bool,
    emitter: SampleEmitter,
    shutdown: watch::Receiver<bool>,
}

impl ReplayDriver {
    pub fn new(
        path: PathBuf,
        speed: f64,
        loop_replay: bool,
        skip_frames: usize,
        strict_crc: bool,
        emitter: SampleEmitter,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            path,
            speed,
            loop_replay,
            skip_frames,
            strict_crc,
            emitter,
            shutdown,
        }
    }

    async fn play_once(&mut self) -> anyhow::Result<()> {
        let file = File::open(&self.path)
            .with_context(|| format!("opening replay file {}", self.path.display()))?;
        let mut reader = FrameReader::new(BufReader::with_capacity(READ_BUFFER, file));

        let mut first = true;
        let mut prev_ms: i64 = 0;
        let mut index = 0usize;

        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            let frame = match reader.read_frame() {
                Ok(frame) => frame,
                Err(FrameError::Eof) => {
                    info!("end of replay");
                    return Ok(());
                }
                Err(e) if e.is_recoverable() && !self.strict_crc => {
                    debug!(error = %e, "skipping bad frame");
                    continue;
                }
                Err(e) => return Err(e).context("reading replay frame"),
            };

            // Leading frames are consumed but never emitted.
            if index < self.skip_frames {
                index += 1;
                continue;
            }
            index += 1;

            if first {
                first = false;
                prev_ms = i64::from(frame.timestamp_ms);
            }

            if self.speed > 0.0 {
                let delta_ms = i64::from(frame.timestamp_ms) - prev_ms;
                if delta_ms > 0 {
                    let pause = Duration::from_secs_f64(delta_ms as f64 / self.speed / 1000.0);
                    tokio::select! {
                        _ = tokio::time::sleep(pause) => {}
                        _ = self.shutdown.changed() => return Ok(()),
                    }
                }
                prev_ms = i64::from(frame.timestamp_ms);
            }

            self.emitter.emit(frame.did as u32, &frame.data);
        }
    }
}

#[async_trait::async_trait]
impl Driver for ReplayDriver {
    async fn init(&mut self) -> anyhow::Result<()> {
        File::open(&self.path)
            .with_context(|| format!("replay file {} not readable", self.path.display()))?;
        info!(
            path = %self.path.display(),
            speed = self.speed,
            skip = self.skip_frames,
            "replay ready"
        );
        Ok(())
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            self.play_once().await?;
            if !self.loop_replay || *self.shutdown.borrow() {
                return Ok(());
            }
            debug!("looping replay from the start");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use husk_core::{EventHub, Frame, Sample, Subscription};
    use husk_ecu::K701;
    use std::io::Write;
    use std::sync::Arc;

    fn write_log(frames: &[Frame]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for frame in frames {
            file.write_all(&frame.encode()).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn driver(
        path: PathBuf,
        speed: f64,
        skip: usize,
        strict: bool,
    ) -> (ReplayDriver, watch::Sender<bool>, Subscription) {
        let hub = EventHub::new();
        let sub = hub.subscribe();
        let emitter = SampleEmitter::new(hub, Arc::new(K701), ["Gear"]);
        // The sender must outlive the run; a closed channel reads as
        // shutdown.
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = ReplayDriver::new(path, speed, false, skip, strict, emitter, shutdown_rx);
        (driver, shutdown_tx, sub)
    }

    async fn drain(sub: &mut Subscription) -> Vec<Sample> {
        tokio::time::sleep(Duration::from_millis(25)).await;
        let mut out = Vec::new();
        while let Some(sample) = sub.try_recv() {
            out.push(sample);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn inter_frame_timing_scales_with_speed() {
        // Two RPM frames 1000 ms apart, replayed at 2x.
        let log = write_log(&[
            Frame::new(0, 0x0100, vec![0x0F, 0xA0]),
            Frame::new(1_000, 0x0100, vec![0x1F, 0x40]),
        ]);
        let (mut driver, _shutdown, mut sub) = driver(log.path().into(), 2.0, 0, false);

        let started = tokio::time::Instant::now();
        driver.run().await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(elapsed, Duration::from_millis(500));
        assert_eq!(drain(&mut sub).await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn speed_zero_never_sleeps() {
        let log = write_log(&[
            Frame::new(0, 0x0100, vec![0x0F, 0xA0]),
            Frame::new(60_000, 0x0100, vec![0x1F, 0x40]),
        ]);
        let (mut driver, _shutdown, mut sub) = driver(log.path().into(), 0.0, 0, false);

        let started = tokio::time::Instant::now();
        driver.run().await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(drain(&mut sub).await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn leading_frames_are_skipped_silently() {
        let log = write_log(&[
            Frame::new(0, 0x0100, vec![0x00, 0x04]),
            Frame::new(10, 0x0100, vec![0x00, 0x08]),
            Frame::new(20, 0x0100, vec![0x00, 0x0C]),
        ]);
        let (mut driver, _shutdown, mut sub) = driver(log.path().into(), 0.0, 2, false);

        driver.run().await.unwrap();
        let samples = drain(&mut sub).await;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 3.0); // 12 / 4
    }

    #[tokio::test(start_paused = true)]
    async fn bad_crc_is_skipped_by_default() {
        let mut corrupt = Frame::new(0, 0x0100, vec![0x0F, 0xA0]).encode();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&corrupt).unwrap();
        file.write_all(&Frame::new(10, 0x0100, vec![0x1F, 0x40]).encode())
            .unwrap();
        file.flush().unwrap();

        let (mut driver, _shutdown, mut sub) = driver(file.path().into(), 0.0, 0, false);
        driver.run().await.unwrap();

        let samples = drain(&mut sub).await;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 2_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn strict_crc_aborts_on_a_bad_frame() {
        let mut corrupt = Frame::new(0, 0x0100, vec![0x0F, 0xA0]).encode();
        corrupt[4] ^= 0x01;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&corrupt).unwrap();
        file.flush().unwrap();

        let (mut driver, _shutdown, _sub) = driver(file.path().into(), 0.0, 0, true);
        assert!(driver.run().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_file_fails_init() {
        let (mut driver, _shutdown, _sub) =
            driver(PathBuf::from("/nonexistent/RAWLOG.bin"), 1.0, 0, false);
        assert!(driver.init().await.is_err());
    }
}
