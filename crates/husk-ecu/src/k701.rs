//! K701 DID catalog and decode table
//!
//! Raw payloads come back from ReadDataByIdentifier as big-endian bytes;
//! every entry here validates a minimum length and applies the scaling
//! that turns them into physical values. Values are rounded to the
//! precision the sensor actually delivers so consumers aren't fooled by
//! conversion noise.

use std::time::Duration;

use crate::{DidValue, EcuProfile, PollEntry};

/// Stream keys, stable across config, decode and presentation.
pub mod stream {
    pub const RPM: &str = "RPM";
    pub const COMPUTED_THROTTLE: &str = "Computed-Throttle";
    pub const INPUT_THROTTLE: &str = "Input-Throttle";
    pub const TPS: &str = "TPS";
    pub const COOLANT: &str = "Coolant";
    pub const GEAR: &str = "Gear";
    pub const INJECTION_TIME: &str = "Injection-Time";
    pub const CLUTCH: &str = "Clutch";
    pub const FRONT_BRAKE: &str = "Front-Brake";
    pub const SIDE_STAND: &str = "Side-Stand";
    pub const SAS_VALVE: &str = "SAS-Valve";
    pub const O2_VOLTAGE: &str = "O2-Voltage";
    pub const O2_COMPENSATION: &str = "O2-Compensation";
    pub const COIL1_CURRENT: &str = "Coil-1-Current";
    pub const COIL2_CURRENT: &str = "Coil-2-Current";
    pub const COIL1_DWELL: &str = "Coil-1-Dwell";
    pub const COIL2_DWELL: &str = "Coil-2-Dwell";
    pub const ENGINE_LOAD: &str = "Engine-Load";
    pub const BARO_VOLTAGE: &str = "Barometer-Volt";
    pub const ALTITUDE: &str = "Estimated-Altitude";
}

/// Known DIDs.
pub mod did {
    pub const COMPUTED_THROTTLE: u16 = 0x0001;
    pub const BARO: u16 = 0x0004;
    pub const BARO_VOLTAGE: u16 = 0x0005;
    pub const ENGINE_LOAD: u16 = 0x0007;
    pub const COOLANT: u16 = 0x0009;
    pub const O2_VOLTAGE: u16 = 0x0012;
    pub const LEVERS: u16 = 0x0030;
    pub const GEAR: u16 = 0x0031;
    pub const SIDE_STAND: u16 = 0x0042;
    pub const SAS_VALVE: u16 = 0x0064;
    pub const GRIP: u16 = 0x0070;
    pub const TPS: u16 = 0x0076;
    pub const RPM: u16 = 0x0100;
    pub const O2_COMPENSATION: u16 = 0x0102;
    pub const COIL2_CURRENT: u16 = 0x0108;
    pub const INJECTION_TIME: u16 = 0x0110;
    pub const COIL1_CURRENT: u16 = 0x0120;
    pub const COIL1_DWELL: u16 = 0x0130;
    pub const COIL2_DWELL: u16 = 0x0132;
}

const COOLANT_OFFSET: f64 = -40.0;

/// Standard atmosphere constants for the barometric altitude estimate.
const SEA_LEVEL_HPA: f64 = 1013.25;
const MMHG_TO_HPA: f64 = 1.33322;

const FAST: Duration = Duration::from_millis(10);
const MEDIUM: Duration = Duration::from_millis(50);
const SLOW: Duration = Duration::from_secs(1);
const GLACIAL: Duration = Duration::from_secs(60);

/// What the scheduler polls and how often. Engine signals move every few
/// milliseconds, temperature over seconds, barometric pressure over
/// minutes.
pub const POLL_TABLE: &[PollEntry] = &[
    PollEntry { did: did::RPM, interval: FAST },
    PollEntry { did: did::COMPUTED_THROTTLE, interval: FAST },
    PollEntry { did: did::GRIP, interval: FAST },
    PollEntry { did: did::TPS, interval: FAST },
    PollEntry { did: did::GEAR, interval: FAST },
    PollEntry { did: did::INJECTION_TIME, interval: FAST },
    PollEntry { did: did::LEVERS, interval: FAST },
    PollEntry { did: did::O2_VOLTAGE, interval: MEDIUM },
    PollEntry { did: did::O2_COMPENSATION, interval: MEDIUM },
    PollEntry { did: did::COIL1_CURRENT, interval: MEDIUM },
    PollEntry { did: did::COIL2_CURRENT, interval: MEDIUM },
    PollEntry { did: did::COIL1_DWELL, interval: MEDIUM },
    PollEntry { did: did::COIL2_DWELL, interval: MEDIUM },
    PollEntry { did: did::ENGINE_LOAD, interval: MEDIUM },
    PollEntry { did: did::SIDE_STAND, interval: MEDIUM },
    PollEntry { did: did::SAS_VALVE, interval: MEDIUM },
    PollEntry { did: did::COOLANT, interval: SLOW },
    PollEntry { did: did::BARO_VOLTAGE, interval: GLACIAL },
    PollEntry { did: did::BARO, interval: GLACIAL },
];

/// The Husqvarna/KTM K701 engine controller.
#[derive(Debug, Default, Clone, Copy)]
pub struct K701;

impl EcuProfile for K701 {
    fn decode(&self, did: u32, data: &[u8]) -> Vec<DidValue> {
        let one = |key, value| vec![DidValue::new(key, value)];

        match did as u16 {
            did::RPM if data.len() >= 2 => one(stream::RPM, be16(data) / 4.0),

            // ECU-computed throttle target, last byte 0..255
            did::COMPUTED_THROTTLE if !data.is_empty() => one(
                stream::COMPUTED_THROTTLE,
                round1(u8_last(data) / 255.0 * 100.0),
            ),

            // Raw twist-grip potentiometer in percent
            did::GRIP if !data.is_empty() => {
                one(stream::INPUT_THROTTLE, round1(u8_last(data) / 255.0 * 100.0))
            }

            // Throttle plate position, 10-bit; idle sits around 20%
            did::TPS if data.len() >= 2 => {
                one(stream::TPS, round1(be16(data) / 1023.0 * 100.0))
            }

            did::COOLANT if data.len() >= 2 => one(stream::COOLANT, be16(data) + COOLANT_OFFSET),
            did::COOLANT if data.len() == 1 => {
                one(stream::COOLANT, data[0] as f64 + COOLANT_OFFSET)
            }

            did::GEAR if data.len() >= 2 => one(stream::GEAR, data[1] as f64),

            did::INJECTION_TIME if data.len() >= 2 => {
                one(stream::INJECTION_TIME, round2(be16(data) / 1000.0))
            }

            // Clutch switch and front brake pressure share one DID
            did::LEVERS if data.len() >= 2 => vec![
                DidValue::new(stream::CLUTCH, flag(data[0])),
                DidValue::new(stream::FRONT_BRAKE, round1(data[1] as f64 / 255.0 * 100.0)),
            ],

            did::SIDE_STAND if data.len() >= 2 => one(stream::SIDE_STAND, flag(data[1])),
            did::SAS_VALVE if data.len() >= 2 => one(stream::SAS_VALVE, flag(data[1])),

            did::O2_VOLTAGE if data.len() >= 2 => {
                one(stream::O2_VOLTAGE, round2(be16(data) / 1023.0 * 5.0))
            }

            // Fuel trim as a signed fraction around stoichiometric
            did::O2_COMPENSATION if data.len() >= 2 => {
                one(stream::O2_COMPENSATION, round2(be16(data) / 32768.0 - 1.0))
            }

            did::COIL1_CURRENT if data.len() >= 2 => {
                one(stream::COIL1_CURRENT, round1(be16(data) / 10.0))
            }
            did::COIL2_CURRENT if data.len() >= 2 => {
                one(stream::COIL2_CURRENT, round1(be16(data) / 10.0))
            }
            did::COIL1_DWELL if data.len() >= 2 => {
                one(stream::COIL1_DWELL, round2(be16(data) / 1000.0))
            }
            did::COIL2_DWELL if data.len() >= 2 => {
                one(stream::COIL2_DWELL, round2(be16(data) / 1000.0))
            }

            did::ENGINE_LOAD if !data.is_empty() => {
                one(stream::ENGINE_LOAD, round1(u8_last(data) / 255.0 * 100.0))
            }

            did::BARO_VOLTAGE if data.len() >= 2 => {
                one(stream::BARO_VOLTAGE, round3(be16(data) / 10_000.0))
            }

            // Pressure in mmHg converted to the barometric altitude
            did::BARO if data.len() >= 2 => {
                let hpa = be16(data) * MMHG_TO_HPA;
                let metres = 44_330.0 * (1.0 - (hpa / SEA_LEVEL_HPA).powf(0.1903));
                one(stream::ALTITUDE, round1(metres))
            }

            // Unknown DID or payload too short: nothing to report.
            _ => Vec::new(),
        }
    }
}

fn be16(data: &[u8]) -> f64 {
    u16::from_be_bytes([data[0], data[1]]) as f64
}

fn u8_last(data: &[u8]) -> f64 {
    data[data.len() - 1] as f64
}

/// 0xFF means engaged/open on the switch DIDs.
fn flag(byte: u8) -> f64 {
    if byte == 0xFF {
        1.0
    } else {
        0.0
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(did: u16, data: &[u8]) -> Vec<DidValue> {
        K701.decode(did as u32, data)
    }

    fn decode_one(did: u16, data: &[u8]) -> DidValue {
        let values = decode(did, data);
        assert_eq!(values.len(), 1, "expected one sample from {did:#06x}");
        values[0]
    }

    #[test]
    fn rpm_is_quarter_of_raw() {
        // 0x0FA0 = 4000 raw → 1000 rpm
        let v = decode_one(did::RPM, &[0x0F, 0xA0]);
        assert_eq!(v.key, stream::RPM);
        assert_eq!(v.value, 1000.0);
    }

    #[test]
    fn coolant_applies_offset() {
        assert_eq!(decode_one(did::COOLANT, &[0x00, 0x5A]).value, 50.0);
        // Single-byte variant seen on the serial bridge
        assert_eq!(decode_one(did::COOLANT, &[0x5A]).value, 50.0);
    }

    #[test]
    fn gear_uses_second_byte() {
        let v = decode_one(did::GEAR, &[0x00, 0x03]);
        assert_eq!(v.key, stream::GEAR);
        assert_eq!(v.value, 3.0);
    }

    #[test]
    fn injection_time_rounds_to_hundredths() {
        assert_eq!(decode_one(did::INJECTION_TIME, &[0x03, 0xE8]).value, 1.0);
        assert_eq!(decode_one(did::INJECTION_TIME, &[0x27, 0x10]).value, 10.0);
        // 2345 µs → 2.35 ms, not 2.345
        assert_eq!(decode_one(did::INJECTION_TIME, &[0x09, 0x29]).value, 2.35);
    }

    #[test]
    fn throttle_family_scales_last_byte() {
        assert_eq!(decode_one(did::COMPUTED_THROTTLE, &[0x00, 0xFF]).value, 100.0);
        assert_eq!(decode_one(did::GRIP, &[0x80]).value, 50.2);
        let tps = decode_one(did::TPS, &[0x02, 0x00]);
        assert_eq!(tps.value, 50.0); // 512/1023*100 ≈ 50.0488, rounds to 50.0
    }

    #[test]
    fn levers_fan_out_into_two_streams() {
        let values = decode(did::LEVERS, &[0xFF, 0x80]);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], DidValue::new(stream::CLUTCH, 1.0));
        assert_eq!(values[1], DidValue::new(stream::FRONT_BRAKE, 50.2));
    }

    #[test]
    fn switches_are_binary() {
        assert_eq!(decode_one(did::SIDE_STAND, &[0x00, 0xFF]).value, 1.0);
        assert_eq!(decode_one(did::SIDE_STAND, &[0x00, 0x00]).value, 0.0);
        assert_eq!(decode_one(did::SAS_VALVE, &[0x00, 0x7F]).value, 0.0);
    }

    #[test]
    fn o2_sensor_scaling() {
        // Full-scale ADC → 5 V
        assert_eq!(decode_one(did::O2_VOLTAGE, &[0x03, 0xFF]).value, 5.0);
        // 32768 raw → trim 0.0
        assert_eq!(decode_one(did::O2_COMPENSATION, &[0x80, 0x00]).value, 0.0);
        // 0 raw → −1.0
        assert_eq!(decode_one(did::O2_COMPENSATION, &[0x00, 0x00]).value, -1.0);
    }

    #[test]
    fn coil_scaling() {
        assert_eq!(decode_one(did::COIL1_CURRENT, &[0x00, 0x7B]).value, 12.3);
        assert_eq!(decode_one(did::COIL2_DWELL, &[0x0D, 0xAC]).value, 3.5);
    }

    #[test]
    fn altitude_at_sea_level_pressure_is_zero() {
        // 760 mmHg ≈ 1013.25 hPa → ~0 m
        let v = decode_one(did::BARO, &[0x02, 0xF8]);
        assert_eq!(v.key, stream::ALTITUDE);
        assert_eq!(v.value, 0.0);
    }

    #[test]
    fn baro_voltage_is_three_decimals() {
        assert_eq!(decode_one(did::BARO_VOLTAGE, &[0x0B, 0xB8]).value, 0.3);
        assert_eq!(decode_one(did::BARO_VOLTAGE, &[0x0B, 0xBF]).value, 0.301);
    }

    #[test]
    fn unknown_did_decodes_to_nothing() {
        assert!(decode(0xBEEF, &[0x01, 0x02]).is_empty());
    }

    #[test]
    fn short_payload_decodes_to_nothing() {
        assert!(decode(did::RPM, &[0x0F]).is_empty());
        assert!(decode(did::GEAR, &[0x03]).is_empty());
        assert!(decode(did::COMPUTED_THROTTLE, &[]).is_empty());
    }

    #[test]
    fn poll_table_has_no_duplicate_dids() {
        let mut dids: Vec<u16> = POLL_TABLE.iter().map(|e| e.did).collect();
        dids.sort_unstable();
        dids.dedup();
        assert_eq!(dids.len(), POLL_TABLE.len());
    }
}
