//! Tessera sync daemon.
//!
//! Keeps a local world store in step with the external world until Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `$TESSERA_CONFIG` or `tessera-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Open the world store
//! 4. Start the ingestion engine
//! 5. Bind the event hub, attach the engine, start the listener
//! 6. Run the pending-chunk sweep on an interval
//! 7. On Ctrl-C: stop the sweep, drain the engine, release the hub, close
//!    the store

mod error;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tessera_sync::config::{LogFormat, LoggingConfig};
use tessera_sync::{SyncContext, SyncEngine};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::DaemonError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "tessera-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any initialization step fails.
#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    // 1. Load configuration.
    let config_path = std::env::var("TESSERA_CONFIG")
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let ctx = SyncContext::from_file(&config_path)?;

    // 2. Initialize structured logging.
    init_tracing(&ctx.config().logging);
    info!(
        config = %config_path.display(),
        bind_addr = %ctx.config().hub.bind_addr,
        store = %ctx.config().store.url,
        snapshot_root = %ctx.config().snapshots.root.display(),
        "tessera-daemon starting"
    );

    // 3. Open the store.
    let store = ctx.connect_store().await?;

    // 4. Start the engine.
    let engine = Arc::new(ctx.start_engine(store.clone()));

    // 5. Bind the hub and start listening.
    let hub = ctx.hub()?;
    engine.attach(&hub);
    hub.run()?;
    info!(addr = %hub.local_addr(), "Listening for world events");

    // 6. Periodic sweep.
    let (stop_tx, stop_rx) = watch::channel(false);
    let sweeper = spawn_sweeper(
        Arc::clone(&engine),
        ctx.config().engine.sweep_interval(),
        stop_rx,
    );

    // 7. Wait for Ctrl-C, then shut down in reverse order.
    tokio::signal::ctrl_c()
        .await
        .map_err(|source| DaemonError::Signal { source })?;
    info!("Shutdown requested");

    stop_tx.send_replace(true);
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Sweep task ended abnormally");
    }
    ctx.reset();
    engine.shutdown().await;

    let stats = engine.stats();
    info!(
        applied = stats.applied,
        failed = stats.failed,
        rejected = stats.rejected,
        dropped = stats.dropped,
        gaps = stats.gaps,
        chunk_loads = stats.chunk_loads,
        load_failures = stats.load_failures,
        received = hub.stats().received,
        malformed = hub.stats().malformed,
        "Final ingestion stats"
    );

    store.close().await;
    info!("tessera-daemon shutdown complete");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Load every complete-but-unloaded chunk once per `interval` until `stop`
/// flips.
fn spawn_sweeper(
    engine: Arc<SyncEngine>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = engine.sweep_pending().await;
                    if report.failed > 0 {
                        tracing::debug!(failed = report.failed, "Some pending chunks are still unavailable");
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Sweep task stopped");
    })
}
