//! Stream descriptors and per-stream windowing
//!
//! A stream is a named series of `(timestamp, value)` samples. Each one
//! keeps a rolling window of recent points and, on every tick, produces
//! a render-ready copy of that window: timestamps shifted so the window
//! spans `[0, window_size_ms]` and values flipped to `min + max − v` for
//! an SVG viewport where Y grows downward.

use std::collections::VecDeque;

use serde::Serialize;

/// One gradient stop used when the stream is drawn.
#[derive(Debug, Clone, Serialize)]
pub struct ColourStop {
    /// Position along the gradient, 0–100.
    pub offset_pct: u8,
    /// `#rrggbb`
    pub rgb: String,
}

impl ColourStop {
    pub fn new(offset_pct: u8, rgb: &str) -> Self {
        Self {
            offset_pct,
            rgb: rgb.to_string(),
        }
    }
}

/// Static configuration of a stream. Created at startup, mutated only by
/// the active-stream toggle.
#[derive(Debug, Clone, Serialize)]
pub struct StreamDescriptor {
    pub key: &'static str,
    pub description: String,
    pub unit: String,
    /// Stepped data (gears, switches); rendered without interpolation.
    pub discrete: bool,
    pub colours: Vec<ColourStop>,
    /// Bottom of the y-axis.
    pub min: f64,
    /// Top of the y-axis.
    pub max: f64,
    /// How many milliseconds of data the window shows.
    pub window_size_ms: i64,
    /// Whether this stream is the selected one within its chart.
    pub is_active: bool,
}

impl StreamDescriptor {
    pub fn new(key: &'static str, description: &str, unit: &str) -> Self {
        Self {
            key,
            description: description.to_string(),
            unit: unit.to_string(),
            discrete: false,
            colours: Vec::new(),
            min: 0.0,
            max: 100.0,
            window_size_ms: 10_000,
            is_active: false,
        }
    }

    pub fn discrete(mut self) -> Self {
        self.discrete = true;
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn window_ms(mut self, window_size_ms: i64) -> Self {
        self.window_size_ms = window_size_ms;
        self
    }

    pub fn colours(mut self, colours: Vec<ColourStop>) -> Self {
        self.colours = colours;
        self
    }

    pub fn active(mut self) -> Self {
        self.is_active = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DataPoint {
    pub timestamp_ms: i64,
    pub value: f64,
}

/// A stream descriptor plus its runtime window state.
#[derive(Debug)]
pub struct Stream {
    descriptor: StreamDescriptor,
    /// Raw samples covering the current window, plus at most one point
    /// left of it so segments crossing the edge still render.
    points: VecDeque<DataPoint>,
    latest: Option<DataPoint>,
    start_ms: Option<i64>,
    current_ms: i64,
    dirty: bool,
    /// Render-space copy produced by the last tick.
    window: Vec<DataPoint>,
}

impl Stream {
    pub fn new(descriptor: StreamDescriptor) -> Self {
        Self {
            descriptor,
            points: VecDeque::new(),
            latest: None,
            start_ms: None,
            current_ms: 0,
            dirty: false,
            window: Vec::new(),
        }
    }

    pub fn key(&self) -> &'static str {
        self.descriptor.key
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    pub fn is_discrete(&self) -> bool {
        self.descriptor.discrete
    }

    pub fn is_active(&self) -> bool {
        self.descriptor.is_active
    }

    pub fn set_active(&mut self, active: bool) {
        self.descriptor.is_active = active;
    }

    /// Last sample added, untransformed.
    pub fn latest(&self) -> Option<DataPoint> {
        self.latest
    }

    /// Timestamp of the first sample ever added.
    pub fn start_ms(&self) -> Option<i64> {
        self.start_ms
    }

    /// Record a sample. Points that have slid out of the window are
    /// discarded, keeping one point past the left edge.
    pub fn add(&mut self, timestamp_ms: i64, value: f64) {
        let point = DataPoint {
            timestamp_ms,
            value,
        };
        self.start_ms.get_or_insert(timestamp_ms);
        self.latest = Some(point);
        self.points.push_back(point);
        self.dirty = true;
        self.trim();
    }

    /// Advance the stream clock and, if anything changed since the last
    /// tick, rebuild the emitted window.
    pub fn on_tick(&mut self, now_ms: i64) {
        self.current_ms = now_ms;
        let Some(latest) = self.latest else {
            return;
        };
        if !self.dirty {
            return;
        }
        self.dirty = false;
        self.trim();

        let window_size = self.descriptor.window_size_ms;
        let left = now_ms - window_size;

        // Index range of points inside [left, now], widened by one on
        // each side so edge-crossing segments keep their slope.
        let first_inside = self
            .points
            .iter()
            .position(|p| p.timestamp_ms >= left)
            .unwrap_or(self.points.len());
        let last_inside = self
            .points
            .iter()
            .rposition(|p| p.timestamp_ms <= now_ms)
            .unwrap_or(0);
        let from = first_inside.saturating_sub(1);
        let to = (last_inside + 2).min(self.points.len());

        let mut window = std::mem::take(&mut self.window);
        window.clear();
        for point in self.points.iter().skip(from).take(to.saturating_sub(from)) {
            window.push(self.to_render_space(*point, now_ms));
        }

        // Pin the latest value to the right edge so the trace always
        // reaches it, even when no sample landed this tick.
        window.push(DataPoint {
            timestamp_ms: window_size,
            value: self.invert(latest.value),
        });
        self.window = window;
    }

    /// The render-space points produced by the last tick. Non-empty once
    /// any sample has been added and a tick has run.
    pub fn window(&self) -> &[DataPoint] {
        &self.window
    }

    fn to_render_space(&self, point: DataPoint, now_ms: i64) -> DataPoint {
        DataPoint {
            timestamp_ms: point.timestamp_ms + self.descriptor.window_size_ms - now_ms,
            value: self.invert(point.value),
        }
    }

    /// Flip a value for an SVG y-axis that grows downward.
    fn invert(&self, value: f64) -> f64 {
        self.descriptor.min + self.descriptor.max - value
    }

    fn trim(&mut self) {
        let left = self.current_ms - self.descriptor.window_size_ms;
        while self.points.len() >= 2 && self.points[1].timestamp_ms <= left {
            self.points.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_stream() -> Stream {
        Stream::new(
            StreamDescriptor::new("RPM", "Engine rotational speed", "rpm")
                .range(0.0, 10_000.0)
                .window_ms(10_000),
        )
    }

    #[test]
    fn emitted_window_is_origin_shifted() {
        let mut stream = test_stream();
        stream.add(1_000, 2_000.0);
        stream.add(5_000, 4_000.0);
        stream.on_tick(5_000);

        let window = stream.window();
        // Two samples plus the right-edge sentinel.
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].timestamp_ms, 1_000 + 10_000 - 5_000);
        assert_eq!(window[1].timestamp_ms, 10_000);
        assert_eq!(window[2].timestamp_ms, 10_000);

        for point in window {
            assert!(point.timestamp_ms >= 0 && point.timestamp_ms <= 10_000);
        }
    }

    #[test]
    fn values_are_y_inverted() {
        let mut stream = test_stream();
        stream.add(0, 2_500.0);
        stream.on_tick(0);

        // min + max − v
        assert_eq!(stream.window()[0].value, 0.0 + 10_000.0 - 2_500.0);
    }

    #[test]
    fn sentinel_tracks_latest_value() {
        let mut stream = test_stream();
        stream.add(0, 1_000.0);
        stream.on_tick(8_000);

        let last = *stream.window().last().unwrap();
        assert_eq!(last.timestamp_ms, 10_000);
        assert_eq!(last.value, 10_000.0 - 1_000.0);
    }

    #[test]
    fn window_nonempty_after_any_sample() {
        let mut stream = test_stream();
        stream.add(42, 123.0);
        stream.on_tick(50_000); // sample long gone off-screen
        assert!(!stream.window().is_empty());
    }

    #[test]
    fn old_points_slide_out_keeping_one_edge_point() {
        let mut stream = test_stream();
        for ts in (0..30_000).step_by(1_000) {
            stream.add(ts, ts as f64);
            stream.on_tick(ts);
        }
        // Window covers [19000, 29000]; one point at or before the left
        // edge must survive for the crossing segment.
        assert!(stream.points.len() <= 12);
        assert!(stream.points[0].timestamp_ms <= 19_000);
        assert!(stream.points[1].timestamp_ms > 19_000);
    }

    #[test]
    fn clean_tick_keeps_previous_window() {
        let mut stream = test_stream();
        stream.add(100, 1.0);
        stream.on_tick(200);
        let before = stream.window().to_vec();

        stream.on_tick(300);
        assert_eq!(stream.window(), &before[..]);
    }

    #[test]
    fn no_tick_output_before_first_sample() {
        let mut stream = test_stream();
        stream.on_tick(1_000);
        assert!(stream.window().is_empty());
    }
}
