//! # statsd-aggregator
//!
//! A StatsD-compatible UDP aggregation daemon. Ingests counter, gauge, and
//! timer metrics over UDP, aggregates them in-memory, and periodically
//! flushes Graphite-line text to a downstream sink over TCP. A separate
//! admin TCP channel answers adaptive-sample-rate queries.
//!
//! ## Architecture
//!
//! ```text
//! UDP datagrams ─▶ ingester ─┬─▶ aggregator ─▶ sink (TCP, periodic flush)
//!                            └─▶ observation window ◀─ admin server (TCP)
//! ```
//!
//! ## Responsibilities
//!
//! 1. Parse the StatsD wire protocol (counters, gauges, timers, sampling).
//! 2. Aggregate in-memory, applying each kind's merge rule.
//! 3. Flush aggregates as Graphite plaintext on a fixed interval.
//! 4. Serve adaptive sample-rate advice over an admin TCP protocol.
//! 5. Expose Prometheus metrics for the daemon's own operation.
//!
//! ## NOT Responsible For
//!
//! - Downstream storage or rendering of the flushed metrics.
//! - Authentication on the UDP or admin ports (neither StatsD nor this
//!   daemon speaks one).
//! - Retrying a failed flush (state is reset regardless; see `aggregator`).

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod admin;
mod aggregator;
mod config;
mod errors;
mod ingest;
mod metrics;
mod model;
mod parser;
mod sink;
mod timer_stats;
mod window;

use aggregator::Aggregator;
use config::Config;
use metrics::MetricsServer;
use window::ObservationWindow;

const CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "statsd_aggregator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting statsd-aggregator v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::from_env()?);
    info!(
        listen_addr = %config.listen_addr,
        admin_addr = %config.admin_addr,
        graphite_addr = %config.graphite_addr,
        flush_interval_secs = config.flush_interval_secs,
        "configuration loaded"
    );

    let metrics_addr: SocketAddr = config
        .metrics_addr
        .parse()
        .map_err(|_| errors::DaemonError::InvalidConfiguration("METRICS_ADDR".to_string()))?;
    let metrics_server = MetricsServer::new(metrics_addr);
    tokio::spawn(async move {
        if let Err(source) = metrics_server.serve().await {
            error!(%source, "metrics server error");
        }
    });
    info!(addr = %metrics_addr, "metrics endpoint listening");

    let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (observations_tx, observations_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (requests_tx, requests_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let aggregator = Aggregator::new(config.clone());
    let aggregator_handle = tokio::spawn(aggregator.run(events_rx, shutdown_rx));

    let window = ObservationWindow::new(config.max_timers_per_s);
    let window_handle = tokio::spawn(window.run(observations_rx, requests_rx));

    let listen_addr = config.listen_addr.clone();
    let ingest_handle = tokio::spawn(async move {
        if let Err(source) = ingest::run(&listen_addr, events_tx, observations_tx).await {
            error!(%source, "ingest server error");
        }
    });

    let admin_addr = config.admin_addr.clone();
    let mut admin_handle = tokio::spawn(admin::run(admin_addr, requests_tx));

    info!("service ready, listening for shutdown signals (SIGTERM, SIGINT)");

    // An admin listener accept error is fatal, not transient: the admin
    // task exits its loop on the first accept error, and that exit is itself
    // the trigger to tear the whole daemon down, not merely a logged line.
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("SIGINT (Ctrl+C) received, initiating graceful shutdown...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("SIGTERM received, initiating graceful shutdown...");
        }
        result = &mut admin_handle => {
            match result {
                Ok(Err(source)) => error!(%source, "admin server failed fatally, shutting down"),
                Ok(Ok(())) => error!("admin server exited unexpectedly, shutting down"),
                Err(source) => error!(%source, "admin server task panicked, shutting down"),
            }
        }
    }

    ingest_handle.abort();
    admin_handle.abort();

    // Tells the aggregator to perform one final flush before exiting; the
    // observation window has no persistent state worth flushing and is left
    // to end naturally once its channels drop.
    let _ = shutdown_tx.send(());
    if let Err(source) = aggregator_handle.await {
        error!(%source, "aggregator task panicked during shutdown");
    }
    window_handle.abort();

    info!("statsd-aggregator stopped");
    Ok(())
}
