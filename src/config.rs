//! Configuration management for the statsd aggregation daemon
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::errors::{DaemonError, DaemonResult};
use crate::model::PercentileThreshold;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub admin_addr: String,
    pub graphite_addr: String,
    pub metrics_addr: String,
    pub flush_interval_secs: u64,
    pub prefix_rates: String,
    pub prefix_timers: String,
    pub prefix_gauges: String,
    pub percentile_thresholds: Vec<PercentileThreshold>,
    pub max_timers_per_s: f64,
}

impl Config {
    pub fn from_env() -> DaemonResult<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        Ok(Config {
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8125".to_string()),
            admin_addr: env::var("ADMIN_ADDR").unwrap_or_else(|_| "0.0.0.0:8126".to_string()),
            graphite_addr: env::var("GRAPHITE_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:2003".to_string()),
            metrics_addr: env::var("METRICS_ADDR").unwrap_or_else(|_| "0.0.0.0:9102".to_string()),
            flush_interval_secs: env::var("FLUSH_INTERVAL_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| {
                    DaemonError::InvalidConfiguration("FLUSH_INTERVAL_SECS".to_string())
                })?,
            prefix_rates: env::var("PREFIX_RATES").unwrap_or_else(|_| "stats.".to_string()),
            prefix_timers: env::var("PREFIX_TIMERS")
                .unwrap_or_else(|_| "stats.timers.".to_string()),
            prefix_gauges: env::var("PREFIX_GAUGES")
                .unwrap_or_else(|_| "stats.gauges.".to_string()),
            percentile_thresholds: parse_percentile_thresholds(
                &env::var("PERCENTILE_THRESHOLDS").unwrap_or_default(),
            )?,
            max_timers_per_s: env::var("MAX_TIMERS_PER_S")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| DaemonError::InvalidConfiguration("MAX_TIMERS_PER_S".to_string()))?,
        })
    }
}

/// Parses a comma-separated list of signed percentile thresholds. An empty
/// string yields an empty list (no thresholds); the empty-string
/// zero-percentile fallthrough of the original implementation is
/// deliberately not reproduced.
fn parse_percentile_thresholds(raw: &str) -> DaemonResult<Vec<PercentileThreshold>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    raw.split(',')
        .map(|entry| {
            PercentileThreshold::parse(entry)
                .ok_or_else(|| DaemonError::BadPercentileThreshold(entry.trim().to_string()))
        })
        .collect()
}
