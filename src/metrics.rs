//! Ambient Prometheus metrics for the statsd aggregation daemon itself.
//!
//! These are daemon-internal operational counters (datagrams received,
//! parse errors, flush outcomes), not the client-submitted metrics, which
//! flow to the downstream sink instead. This surface is for operability and
//! is not part of the wire contract clients or the sink see.

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_int_gauge, Counter,
    CounterVec, Encoder, Histogram, IntGauge, TextEncoder,
};
use std::net::SocketAddr;

lazy_static! {
    /// Total UDP datagrams received on the ingest socket.
    pub static ref DATAGRAMS_RECEIVED: Counter = register_counter!(
        "statsd_datagrams_received_total",
        "Total number of UDP datagrams received"
    )
    .unwrap();

    /// Lines rejected by the parser, by reason.
    pub static ref LINES_REJECTED: CounterVec = register_counter_vec!(
        "statsd_lines_rejected_total",
        "Total number of input lines rejected by the parser",
        &["reason"]
    )
    .unwrap();

    /// Events applied to the aggregator state, by metric kind.
    pub static ref EVENTS_APPLIED: CounterVec = register_counter_vec!(
        "statsd_events_applied_total",
        "Total number of events merged into aggregator state",
        &["kind"]
    )
    .unwrap();

    /// Flush attempts, by outcome (ok / dial_error / write_error).
    pub static ref FLUSHES: CounterVec = register_counter_vec!(
        "statsd_flushes_total",
        "Total number of flush attempts by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Number of output lines written on the most recent successful flush.
    pub static ref LAST_FLUSH_LINES: IntGauge = register_int_gauge!(
        "statsd_last_flush_lines",
        "Number of lines written on the most recent successful flush"
    )
    .unwrap();

    /// Wall-clock time spent building and writing a flush.
    pub static ref FLUSH_DURATION: Histogram = register_histogram!(
        "statsd_flush_duration_seconds",
        "Time spent computing and writing one flush",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .unwrap();
}

pub struct MetricsServer {
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|source| crate::errors::DaemonError::MetricsBind {
                addr: self.addr.to_string(),
                source,
            })?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
