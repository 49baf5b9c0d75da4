//! Error types for the statsd aggregation daemon

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("invalid percentile threshold {0:?}")]
    BadPercentileThreshold(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to bind UDP listener on {addr}: {source}")]
    UdpBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind admin listener on {addr}: {source}")]
    AdminBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind metrics listener on {addr}: {source}")]
    MetricsBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

pub type DaemonResult<T> = Result<T, DaemonError>;

/// Errors confined to a single flush attempt; never fatal, always logged and
/// swallowed by the caller.
#[derive(Error, Debug)]
pub enum FlushError {
    #[error("failed to dial sink at {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("write to sink failed or deadline exceeded: {0}")]
    Write(#[source] std::io::Error),
}
