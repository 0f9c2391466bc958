//! Hub ingest and the server-wide render tick
//!
//! Two small tasks connect the sample pipeline to presentation: one
//! drains a hub subscription into the dashboard's stream windows, the
//! other runs `Dashboard::tick` at a fixed rate and hands the result to
//! a [`TickSink`]. The sink is the seam the web layer plugs into; the
//! default implementation just traces.

use std::sync::Arc;
use std::time::Duration;

use husk_core::{Dashboard, EventHub};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Receives the post-processed dashboard once per tick.
pub trait TickSink: Send + Sync {
    fn on_tick(&self, now_ms: i64, dashboard: &Dashboard);
}

/// Default sink: log the active streams' latest values at trace level.
pub struct TraceSink;

impl TickSink for TraceSink {
    fn on_tick(&self, now_ms: i64, dashboard: &Dashboard) {
        for stream in dashboard.streams() {
            if stream.is_active() {
                if let Some(latest) = stream.latest() {
                    trace!(now_ms, key = stream.key(), value = latest.value, "tick");
                }
            }
        }
    }
}

/// Spawn the ingest and tick tasks. Both stop when `shutdown` flips or,
/// for the ingest task, when the hub closes.
pub fn spawn_dashboard_tasks(
    dashboard: Arc<Mutex<Dashboard>>,
    hub: Arc<EventHub>,
    sink: Arc<dyn TickSink>,
    tick_rate_hz: u32,
    shutdown: watch::Receiver<bool>,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let ingest = {
        let dashboard = dashboard.clone();
        let mut shutdown = shutdown.clone();
        let mut subscription = hub.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    sample = subscription.recv() => match sample {
                        Some(sample) => dashboard.lock().add_sample(&sample),
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            debug!("dashboard ingest stopped");
        })
    };

    let tick = {
        let mut shutdown = shutdown.clone();
        let period = Duration::from_secs_f64(1.0 / tick_rate_hz.max(1) as f64);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now_ms = chrono::Utc::now().timestamp_millis();
                        let mut dashboard = dashboard.lock();
                        dashboard.tick(now_ms);
                        sink.on_tick(now_ms, &dashboard);
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("render tick stopped");
        })
    };

    (ingest, tick)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::build_dashboard;
    use husk_core::Sample;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingSink(AtomicU64);

    impl TickSink for CountingSink {
        fn on_tick(&self, _now_ms: i64, _dashboard: &Dashboard) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn samples_flow_into_windows_and_ticks_fire() {
        let dashboard = Arc::new(Mutex::new(build_dashboard()));
        let hub = EventHub::new();
        let sink = Arc::new(CountingSink(AtomicU64::new(0)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (ingest, tick) = spawn_dashboard_tasks(
            dashboard.clone(),
            hub.clone(),
            sink.clone(),
            100,
            shutdown_rx,
        );

        hub.broadcast(Sample::new("RPM", 1, 4_000.0));
        tokio::time::sleep(Duration::from_millis(100)).await;

        shutdown_tx.send(true).unwrap();
        let _ = tokio::join!(ingest, tick);

        assert!(sink.0.load(Ordering::Relaxed) >= 2);
        let dashboard = dashboard.lock();
        let rpm = dashboard.stream("RPM").unwrap();
        assert_eq!(rpm.latest().unwrap().value, 4_000.0);
        assert!(!rpm.window().is_empty());
    }
}
