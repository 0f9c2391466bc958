//! huskd - K701 in-vehicle telemetry daemon
//!
//! Polls the engine ECU over the diagnostic bus (or replays a recorded
//! log), decodes DID payloads into named sample streams, records the raw
//! frames, and keeps a render-ready dashboard of windowed data for the
//! web layer to push to browsers.
//!
//! ```text
//! driver (socket-can | arduino | replay)
//!    │ raw DID payloads
//!    ├──▶ raw log (logs/RAWLOG*.bin)
//!    └──▶ decode ──▶ hub ──▶ subscribers
//!                        └──▶ dashboard windows ──▶ tick sink
//! ```

mod backoff;
mod cli;
mod dashboard;
mod drivers;
mod emitter;
mod poll;
mod rawlog;
mod render;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use husk_core::EventHub;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Args;
use crate::render::{spawn_dashboard_tasks, TraceSink};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huskd=info,husk_uds=info,husk_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!(driver = ?args.driver, "starting huskd");
    debug!(addr = %args.addr, "listen address reserved for the web layer");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let hub = EventHub::new();
    let dashboard = Arc::new(Mutex::new(dashboard::build_dashboard()));
    let discrete_keys = dashboard.lock().discrete_keys();

    let (ingest, tick) = spawn_dashboard_tasks(
        dashboard.clone(),
        hub.clone(),
        Arc::new(TraceSink),
        args.tick_rate,
        shutdown_rx.clone(),
    );

    let mut driver = drivers::create_driver(&args, hub.clone(), discrete_keys, shutdown_rx)?;
    driver.init().await.context("driver init failed")?;

    let driver_task = tokio::spawn(async move {
        if let Err(e) = driver.run().await {
            // Keep the process up; subscribers continue to see the last
            // known state and the operator gets the diagnostics.
            error!(error = %e, "driver stopped");
        }
    });

    tokio::signal::ctrl_c().await.context("signal handler")?;
    info!("shutting down");

    let _ = shutdown_tx.send(true);
    hub.close();
    if tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = driver_task.await;
        let _ = ingest.await;
        let _ = tick.await;
    })
    .await
    .is_err()
    {
        error!("tasks did not stop within grace period");
    }

    Ok(())
}
