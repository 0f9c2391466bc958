//! Command-line surface

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DriverKind {
    /// Serial bridge emitting pre-framed telemetry
    Arduino,
    /// Live ECU over SocketCAN
    SocketCan,
    /// Deterministic playback of a recorded log
    Replay,
}

#[derive(Debug, Parser)]
#[command(name = "huskd", about = "K701 in-vehicle telemetry daemon", version)]
pub struct Args {
    /// Driver used to communicate with the vehicle
    #[arg(long, value_enum, default_value_t = DriverKind::SocketCan)]
    pub driver: DriverKind,

    /// HTTP listen address; consumed by the embedding web layer
    #[arg(long, default_value = ":8080")]
    pub addr: String,

    /// Serial device path, or `auto` to pick the first Arduino-looking port
    #[arg(long, default_value = "auto")]
    pub serial_port: String,

    /// Serial baud rate
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,

    /// CAN interface name
    #[arg(long = "socket-can-address", default_value = "can0")]
    pub socket_can_address: String,

    /// Path to a .bin log to replay
    #[arg(long, default_value = "")]
    pub replay: String,

    /// Replay time scaling; 0 plays as fast as possible
    #[arg(long, default_value_t = 1.0)]
    pub replay_speed: f64,

    /// Restart the replay at end of file
    #[arg(long, default_value_t = false)]
    pub replay_loop: bool,

    /// Number of leading frames to consume without emitting
    #[arg(long, default_value_t = 0)]
    pub replay_skip_frames: usize,

    /// Abort replay on a bad frame checksum instead of skipping it
    /// (early logs carry broken CRCs, so skipping is the default)
    #[arg(long, default_value_t = false)]
    pub strict_crc: bool,

    /// Dashboard post-processing rate in Hz
    #[arg(long, default_value_t = 30)]
    pub tick_rate: u32,

    /// Directory raw frame logs are written to
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_vehicle_setup() {
        let args = Args::parse_from(["huskd"]);
        assert_eq!(args.driver, DriverKind::SocketCan);
        assert_eq!(args.socket_can_address, "can0");
        assert_eq!(args.baud, 115_200);
        assert_eq!(args.replay_speed, 1.0);
        assert!(!args.strict_crc);
        assert_eq!(args.tick_rate, 30);
    }

    #[test]
    fn replay_flags_parse() {
        let args = Args::parse_from([
            "huskd",
            "--driver",
            "replay",
            "--replay",
            "logs/RAWLOG_3.bin",
            "--replay-speed",
            "2.5",
            "--replay-loop",
            "--replay-skip-frames",
            "100",
        ]);
        assert_eq!(args.driver, DriverKind::Replay);
        assert_eq!(args.replay, "logs/RAWLOG_3.bin");
        assert_eq!(args.replay_speed, 2.5);
        assert!(args.replay_loop);
        assert_eq!(args.replay_skip_frames, 100);
    }
}
