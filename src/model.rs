//! Core value types shared across the ingest, aggregation, and statistics
//! modules: the parsed event, its kind, and a percentile threshold.

/// The kind of a StatsD metric line, as decoded from the `|<kind>` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Timer,
}

/// A single parsed measurement: a bucket name, its value, its kind, and the
/// client-reported sampling rate (default 1.0 when absent on the wire).
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub bucket: String,
    pub value: f64,
    pub kind: MetricKind,
    pub sampling: f64,
}

impl Event {
    pub fn new(bucket: String, value: f64, kind: MetricKind, sampling: f64) -> Self {
        Self {
            bucket,
            value,
            kind,
            sampling,
        }
    }
}

/// A percentile threshold parsed from `percentile_thresholds`. `value` keeps
/// its sign (negative selects the lower tail); `label` is the printable form
/// with a leading minus stripped and `.` rewritten to `_`.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileThreshold {
    pub value: f64,
    pub label: String,
}

impl PercentileThreshold {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let value: f64 = raw.parse().ok()?;
        if value == 0.0 || value.abs() > 100.0 {
            return None;
        }
        let label = raw.trim_start_matches('-').replace('.', "_");
        Some(Self { value, label })
    }

    pub fn is_lower(&self) -> bool {
        self.value < 0.0
    }

    /// The magnitude used for percentile index computation: `k` is derived
    /// from `|p|` for both tails. A literal `100 + p` substitution for the
    /// lower tail would produce a different, wrong, `k`.
    pub fn absolute(&self) -> f64 {
        self.value.abs()
    }
}
