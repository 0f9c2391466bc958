//! Dashboard configuration
//!
//! The stream table and chart grouping for the K701. Windows are sized
//! to how fast each signal moves: ten seconds for engine signals, five
//! minutes for coolant. One stream per chart starts active; the UI can
//! cycle the selection at runtime.

use husk_core::{Chart, ColourStop, Dashboard, Stream, StreamDescriptor};
use husk_ecu::k701::stream;

const FAST_WINDOW_MS: i64 = 10_000;
const COOLANT_WINDOW_MS: i64 = 300_000;

fn stop(offset_pct: u8, rgb: &str) -> ColourStop {
    ColourStop::new(offset_pct, rgb)
}

pub fn build_dashboard() -> Dashboard {
    let streams = vec![
        Stream::new(
            StreamDescriptor::new(stream::COMPUTED_THROTTLE, "ECU computed throttle", "%")
                .colours(vec![stop(100, "#FF2200")])
                .range(-5.0, 105.0)
                .window_ms(FAST_WINDOW_MS),
        ),
        Stream::new(
            StreamDescriptor::new(stream::INPUT_THROTTLE, "Rider throttle input", "%")
                .colours(vec![stop(100, "#00FF22")])
                .range(-5.0, 105.0)
                .window_ms(FAST_WINDOW_MS)
                .active(),
        ),
        Stream::new(
            StreamDescriptor::new(stream::TPS, "Throttle plate sensor", "%")
                .colours(vec![stop(100, "#2200FF")])
                .range(-5.0, 105.0)
                .window_ms(FAST_WINDOW_MS),
        ),
        Stream::new(
            StreamDescriptor::new(stream::RPM, "Engine rotational speed", "rpm")
                .colours(vec![stop(0, "#92FE9D"), stop(100, "#00C9FF")])
                .range(0.0, 10_000.0)
                .window_ms(FAST_WINDOW_MS)
                .active(),
        ),
        Stream::new(
            StreamDescriptor::new(stream::ENGINE_LOAD, "Calculated engine load", "%")
                .colours(vec![stop(0, "#92FE9D"), stop(100, "#00C9FF")])
                .range(0.0, 100.0)
                .window_ms(FAST_WINDOW_MS),
        ),
        Stream::new(
            StreamDescriptor::new(stream::GEAR, "Transmission gear", "")
                .discrete()
                .colours(vec![stop(0, "#92FE9D"), stop(100, "#00C9FF")])
                .range(-1.0, 7.0)
                .window_ms(FAST_WINDOW_MS)
                .active(),
        ),
        Stream::new(
            StreamDescriptor::new(stream::CLUTCH, "Clutch switch", "")
                .discrete()
                .colours(vec![stop(0, "#777777"), stop(100, "#00D084")])
                .range(-0.2, 1.2)
                .window_ms(FAST_WINDOW_MS),
        ),
        Stream::new(
            StreamDescriptor::new(stream::FRONT_BRAKE, "Front brake pressure", "%")
                .colours(vec![stop(0, "#777777"), stop(100, "#00D084")])
                .range(-20.0, 120.0)
                .window_ms(FAST_WINDOW_MS),
        ),
        Stream::new(
            StreamDescriptor::new(stream::SIDE_STAND, "Side stand switch", "")
                .discrete()
                .colours(vec![stop(0, "#777777"), stop(100, "#00D084")])
                .range(-0.2, 1.2)
                .window_ms(FAST_WINDOW_MS),
        ),
        Stream::new(
            StreamDescriptor::new(stream::SAS_VALVE, "SAS valve opening", "")
                .discrete()
                .colours(vec![stop(0, "#92FE9D"), stop(100, "#00C9FF")])
                .range(-0.2, 1.2)
                .window_ms(FAST_WINDOW_MS),
        ),
        Stream::new(
            StreamDescriptor::new(stream::COOLANT, "Coolant temperature", "°C")
                .colours(vec![
                    stop(0, "#FF0000"),
                    stop(50, "#00FF00"),
                    stop(100, "#0000FF"),
                ])
                .range(-10.0, 120.0)
                .window_ms(COOLANT_WINDOW_MS)
                .active(),
        ),
        Stream::new(
            StreamDescriptor::new(stream::INJECTION_TIME, "Injector pulse width", "ms")
                .colours(vec![stop(0, "#92FE9D"), stop(100, "#00C9FF")])
                .range(0.0, 15.0)
                .window_ms(FAST_WINDOW_MS)
                .active(),
        ),
        Stream::new(
            StreamDescriptor::new(stream::O2_VOLTAGE, "O₂ sensor voltage", "V")
                .colours(vec![stop(0, "#0033FF"), stop(100, "#66CCFF")])
                .range(-0.2, 1.2)
                .window_ms(FAST_WINDOW_MS)
                .active(),
        ),
        Stream::new(
            StreamDescriptor::new(stream::O2_COMPENSATION, "Real-time fuel trim", "")
                .colours(vec![stop(0, "#92FE9D"), stop(100, "#00C9FF")])
                .range(-0.5, 0.5)
                .window_ms(FAST_WINDOW_MS),
        ),
        Stream::new(
            StreamDescriptor::new(stream::COIL1_CURRENT, "Coil #1 primary current", "A")
                .colours(vec![stop(0, "#92FE9D"), stop(100, "#00C9FF")])
                .range(0.0, 30.0)
                .window_ms(FAST_WINDOW_MS)
                .active(),
        ),
        Stream::new(
            StreamDescriptor::new(stream::COIL2_CURRENT, "Coil #2 primary current", "A")
                .colours(vec![stop(0, "#92FE9D"), stop(100, "#00C9FF")])
                .range(0.0, 30.0)
                .window_ms(FAST_WINDOW_MS),
        ),
        Stream::new(
            StreamDescriptor::new(stream::COIL1_DWELL, "Coil #1 dwell time", "ms")
                .colours(vec![stop(0, "#92FE9D"), stop(100, "#00C9FF")])
                .range(0.0, 5.0)
                .window_ms(FAST_WINDOW_MS),
        ),
        Stream::new(
            StreamDescriptor::new(stream::COIL2_DWELL, "Coil #2 dwell time", "ms")
                .colours(vec![stop(0, "#92FE9D"), stop(100, "#00C9FF")])
                .range(0.0, 5.0)
                .window_ms(FAST_WINDOW_MS),
        ),
        Stream::new(
            StreamDescriptor::new(stream::BARO_VOLTAGE, "Barometric sensor voltage", "V")
                .colours(vec![stop(0, "#888888"), stop(100, "#DDDDDD")])
                .range(0.0, 10.0)
                .window_ms(FAST_WINDOW_MS),
        ),
        Stream::new(
            StreamDescriptor::new(stream::ALTITUDE, "Estimated altitude", "m")
                .colours(vec![stop(0, "#92FE9D"), stop(100, "#00C9FF")])
                .range(0.0, 2_000.0)
                .window_ms(FAST_WINDOW_MS)
                .active(),
        ),
    ];

    let charts = vec![
        Chart::new(
            "Throttle",
            vec![stream::COMPUTED_THROTTLE, stream::INPUT_THROTTLE, stream::TPS],
            1,
        ),
        Chart::new("RPM", vec![stream::RPM, stream::ENGINE_LOAD], 2),
        Chart::new(
            "Switches",
            vec![
                stream::GEAR,
                stream::CLUTCH,
                stream::FRONT_BRAKE,
                stream::SIDE_STAND,
                stream::SAS_VALVE,
            ],
            3,
        ),
        Chart::new("Coolant", vec![stream::COOLANT], 4),
        Chart::new("Injection", vec![stream::INJECTION_TIME], 5),
        Chart::new("O2", vec![stream::O2_VOLTAGE, stream::O2_COMPENSATION], 6),
        Chart::new(
            "Coils",
            vec![
                stream::COIL1_CURRENT,
                stream::COIL2_CURRENT,
                stream::COIL1_DWELL,
                stream::COIL2_DWELL,
            ],
            7,
        ),
        Chart::new("Pressure", vec![stream::ALTITUDE, stream::BARO_VOLTAGE], 8),
    ];

    Dashboard::new(streams, charts)
}
