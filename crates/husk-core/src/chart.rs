//! Charts and the dashboard configuration
//!
//! A chart groups streams for presentation and designates one of them as
//! active. Charts refer to streams by key; the streams themselves live in
//! the dashboard's central table and `charts_by_stream` is a derived
//! index, regenerated whenever the chart list changes.

use std::collections::HashMap;

use tracing::trace;

use crate::sample::Sample;
use crate::stream::Stream;

#[derive(Debug, Clone)]
pub struct Chart {
    key: &'static str,
    stream_keys: Vec<&'static str>,
    /// Index into `stream_keys` of the selected stream.
    active: usize,
    layout_priority: u8,
}

impl Chart {
    pub fn new(key: &'static str, stream_keys: Vec<&'static str>, layout_priority: u8) -> Self {
        debug_assert!(!stream_keys.is_empty());
        Self {
            key,
            stream_keys,
            active: 0,
            layout_priority,
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn stream_keys(&self) -> &[&'static str] {
        &self.stream_keys
    }

    pub fn layout_priority(&self) -> u8 {
        self.layout_priority
    }

    pub fn active_stream(&self) -> &'static str {
        self.stream_keys[self.active]
    }

    /// Select the next stream in the chart, wrapping around. Returns the
    /// newly active key.
    fn cycle(&mut self) -> &'static str {
        self.active = (self.active + 1) % self.stream_keys.len();
        self.stream_keys[self.active]
    }
}

/// The full dashboard: stream table, chart list and derived lookups.
/// Built once at startup and handed to the driver supervisor and the
/// tick task; there is no global registry.
#[derive(Debug)]
pub struct Dashboard {
    streams: HashMap<&'static str, Stream>,
    /// Charts in layout order.
    charts: Vec<Chart>,
    /// stream key → index into `charts`. Derived; rebuilt on change.
    charts_by_stream: HashMap<&'static str, usize>,
}

impl Dashboard {
    pub fn new(streams: Vec<Stream>, mut charts: Vec<Chart>) -> Self {
        charts.sort_by_key(Chart::layout_priority);
        let streams: HashMap<_, _> = streams.into_iter().map(|s| (s.key(), s)).collect();

        let mut dashboard = Self {
            streams,
            charts,
            charts_by_stream: HashMap::new(),
        };
        dashboard.rebuild_index();
        dashboard
    }

    fn rebuild_index(&mut self) {
        self.charts_by_stream = self
            .charts
            .iter()
            .enumerate()
            .flat_map(|(i, chart)| chart.stream_keys().iter().map(move |&key| (key, i)))
            .collect();
    }

    pub fn stream(&self, key: &str) -> Option<&Stream> {
        self.streams.get(key)
    }

    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    pub fn charts(&self) -> &[Chart] {
        &self.charts
    }

    pub fn chart_for_stream(&self, key: &str) -> Option<&Chart> {
        self.charts_by_stream
            .get(key)
            .and_then(|&i| self.charts.get(i))
    }

    /// Keys of every discrete stream; drivers use this to decide which
    /// samples get a step carry-over point.
    pub fn discrete_keys(&self) -> Vec<&'static str> {
        self.streams
            .values()
            .filter(|s| s.is_discrete())
            .map(Stream::key)
            .collect()
    }

    /// Route a sample to its stream's window. Samples for unknown keys
    /// are ignored; the decoder may know streams the dashboard does not
    /// show.
    pub fn add_sample(&mut self, sample: &Sample) {
        match self.streams.get_mut(sample.key) {
            Some(stream) => stream.add(sample.timestamp_ms, sample.value),
            None => trace!(key = sample.key, "sample for unconfigured stream"),
        }
    }

    /// One server-wide post-processing pass: advance every stream's
    /// window to `now_ms`.
    pub fn tick(&mut self, now_ms: i64) {
        for stream in self.streams.values_mut() {
            stream.on_tick(now_ms);
        }
    }

    /// Advance the active stream of `chart_key` to the next one and sync
    /// the streams' active flags. Returns the newly active stream key.
    pub fn cycle_active_stream(&mut self, chart_key: &str) -> Option<&'static str> {
        let chart = self.charts.iter_mut().find(|c| c.key() == chart_key)?;
        let next = chart.cycle();
        let keys: Vec<&'static str> = chart.stream_keys().to_vec();
        for key in keys {
            if let Some(stream) = self.streams.get_mut(key) {
                stream.set_active(key == next);
            }
        }
        Some(next)
    }
}
