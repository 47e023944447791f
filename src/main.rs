//! Loki Shipper demo - ships the process's own tracing events to Loki
//!
//! Emits a heartbeat event every few seconds until Ctrl+C, then flushes the
//! pending batch and exits.
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `LOKI_ENDPOINT`: Loki base URL (default: http://localhost:3100)
//! - `LOKI_BATCH_MAX_SIZE`: Records per batch (default: 1000)
//! - `LOKI_BATCH_MAX_WAIT_MS`: Milliseconds before a partial batch is flushed (default: 1000)
//! - `LOKI_LABELS`: Stream labels, `key=value,key=value` (default: `app=loki-shipper`)
//! - `LOKI_USERNAME` / `LOKI_PASSWORD`: Basic auth credentials
//! - `LOKI_VISIBLE_LEVELS`: Shipped levels (default: error,warn,info)
//! - `RUST_LOG`: Local console filter (default: info)

use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use loki_shipper::config::Config;
use loki_shipper::layer::LokiLayer;

/// Interval between heartbeat events
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    config
        .labels
        .entry("app".to_string())
        .or_insert_with(|| "loki-shipper".to_string());
    let push_url = config.push_url();

    let layer = match LokiLayer::new(config) {
        Ok(layer) => layer,
        Err(e) => {
            eprintln!("Failed to start Loki pusher: {}", e);
            std::process::exit(1);
        }
    };
    let pusher = layer.pusher();

    init_tracing(layer);
    info!(push_url = %push_url, "Loki shipper started. Press Ctrl+C to stop.");

    let heartbeat = tokio::spawn(run_heartbeat());

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, stopping..."),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }
    heartbeat.abort();

    // shutdown() blocks until the final flush attempt is done
    let stopping = pusher.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || stopping.shutdown()).await {
        warn!(error = %e, "Pusher shutdown task failed");
    }

    let stats = pusher.stats();
    info!(
        records = stats.records_received,
        batches_sent = stats.batches_sent,
        batches_failed = stats.batches_failed,
        "Loki shipper stopped"
    );
}

/// Console output is the local diagnostic channel; the Loki layer ships the
/// same events remotely, filtered by its own level list.
fn init_tracing(layer: LokiLayer) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .compact()
                .with_filter(filter),
        )
        .init();
}

async fn run_heartbeat() {
    let mut ticker = interval(HEARTBEAT_INTERVAL);
    let mut beats: u64 = 0;

    loop {
        ticker.tick().await;
        beats += 1;
        info!(beats, "heartbeat");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_interval() {
        assert!(HEARTBEAT_INTERVAL >= Duration::from_secs(1));
    }
}
