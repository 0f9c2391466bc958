//! Raw frame recording
//!
//! Every accepted DID response is appended to `logs/RAWLOG[_N].bin` in
//! the same framed format the serial bridge emits, so a recording can be
//! replayed through the exact same decode path. Writes go through a
//! 1 MiB buffer flushed every couple of seconds; recording is
//! best-effort and never takes the live pipeline down.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use husk_core::Frame;
use tracing::info;

pub const LOG_NAME: &str = "RAWLOG";
pub const LOG_EXT: &str = ".bin";

const BUFFER_SIZE: usize = 1 << 20;
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

pub struct RawLog {
    writer: BufWriter<File>,
    path: PathBuf,
    last_flush: Instant,
}

impl RawLog {
    /// Open the next free `dir/name{ext}`, `dir/name_1{ext}`, … for
    /// appending. Creates `dir` if needed.
    pub fn create(dir: &Path, name: &str, ext: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = next_available_filename(dir, name, ext);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "recording raw frames");
        Ok(Self {
            writer: BufWriter::with_capacity(BUFFER_SIZE, file),
            path,
            last_flush: Instant::now(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one frame; `timestamp_ms` is driver-relative.
    pub fn write_frame(&mut self, timestamp_ms: u32, did: u16, data: &[u8]) -> io::Result<()> {
        let frame = Frame::new(timestamp_ms, did, data);
        self.writer.write_all(&frame.encode())
    }

    /// Flush if the cadence interval has passed.
    pub fn flush_if_due(&mut self) -> io::Result<()> {
        if self.last_flush.elapsed() >= FLUSH_INTERVAL {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.last_flush = Instant::now();
        self.writer.flush()
    }
}

impl Drop for RawLog {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// First of `name{ext}`, `name_1{ext}`, `name_2{ext}`, … that does not
/// exist yet.
fn next_available_filename(dir: &Path, name: &str, ext: &str) -> PathBuf {
    let candidate = dir.join(format!("{name}{ext}"));
    if !candidate.exists() {
        return candidate;
    }
    for i in 1.. {
        let candidate = dir.join(format!("{name}_{i}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}

#[cfg(test)]
mod tests {
    use super::*;
    use husk_core::{FrameError, FrameReader};
    use std::io::BufReader;

    #[test]
    fn filenames_count_up_from_the_base_name() {
        let dir = tempfile::tempdir().unwrap();

        let first = RawLog::create(dir.path(), LOG_NAME, LOG_EXT).unwrap();
        assert_eq!(first.path(), dir.path().join("RAWLOG.bin"));

        let second = RawLog::create(dir.path(), LOG_NAME, LOG_EXT).unwrap();
        assert_eq!(second.path(), dir.path().join("RAWLOG_1.bin"));

        let third = RawLog::create(dir.path(), LOG_NAME, LOG_EXT).unwrap();
        assert_eq!(third.path(), dir.path().join("RAWLOG_2.bin"));
    }

    #[test]
    fn gaps_in_the_sequence_are_reused() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("RAWLOG.bin"), b"").unwrap();
        fs::write(dir.path().join("RAWLOG_2.bin"), b"").unwrap();

        let log = RawLog::create(dir.path(), LOG_NAME, LOG_EXT).unwrap();
        assert_eq!(log.path(), dir.path().join("RAWLOG_1.bin"));
    }

    #[test]
    fn written_frames_read_back_intact() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RawLog::create(dir.path(), LOG_NAME, LOG_EXT).unwrap();
        log.write_frame(100, 0x0100, &[0x0F, 0xA0]).unwrap();
        log.write_frame(110, 0x0031, &[0x00, 0x02]).unwrap();
        let path = log.path().to_path_buf();
        drop(log); // flush

        let mut reader = FrameReader::new(BufReader::new(File::open(path).unwrap()));
        let first = reader.read_frame().unwrap();
        assert_eq!((first.timestamp_ms, first.did), (100, 0x0100));
        assert_eq!(first.data, vec![0x0F, 0xA0]);
        let second = reader.read_frame().unwrap();
        assert_eq!((second.timestamp_ms, second.did), (110, 0x0031));
        assert!(matches!(reader.read_frame(), Err(FrameError::Eof)));
    }
}
