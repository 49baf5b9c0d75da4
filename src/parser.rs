//! Decodes one UDP payload into zero or more [`Event`]s.

use crate::model::{Event, MetricKind};
use tracing::debug;

const MAX_PACKET_LEN: usize = 512;

/// Parses a single UDP payload, which may contain multiple `\n`-separated
/// StatsD lines. Malformed lines are dropped and logged at debug verbosity;
/// the parser never aborts on bad input.
pub fn parse_packet(payload: &[u8]) -> Vec<Event> {
    if payload.len() > MAX_PACKET_LEN {
        debug!(len = payload.len(), "dropping oversized UDP payload");
        return Vec::new();
    }
    let text = String::from_utf8_lossy(payload);
    text.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<Event> {
    let line = line.trim_end_matches('\r');
    if line.is_empty() {
        return None;
    }

    let (bucket, rest) = split_once_colon(line)?;
    if bucket.is_empty() {
        debug!(line, "rejecting line with empty bucket");
        return None;
    }

    let mut parts = rest.split('|');
    let raw_value = parts.next()?;
    let raw_kind = parts.next();
    let raw_sampling = parts.next();

    if parts.next().is_some() {
        debug!(line, "rejecting line with extra '|' segments");
        return None;
    }

    let kind = match raw_kind {
        Some("c") => MetricKind::Counter,
        Some("g") => MetricKind::Gauge,
        Some("ms") => MetricKind::Timer,
        Some(other) => {
            debug!(line, kind = other, "rejecting line with unknown kind");
            return None;
        }
        None => {
            debug!(line, "rejecting line missing kind tag");
            return None;
        }
    };

    let value: f64 = match raw_value.parse() {
        Ok(v) if v.is_finite() => v,
        Ok(_) => {
            tracing::error!(line, "rejecting line with non-finite value");
            return None;
        }
        Err(_) => {
            tracing::error!(line, raw_value, "failed to parse metric value");
            return None;
        }
    };

    let sampling = match raw_sampling {
        None => 1.0,
        Some(tail) => match tail.strip_prefix('@') {
            Some(rate_str) => match rate_str.parse::<f64>() {
                Ok(rate) if rate > 0.0 && rate <= 1.0 => rate,
                _ => {
                    debug!(line, "rejecting line with invalid sampling rate");
                    return None;
                }
            },
            None => {
                debug!(line, "rejecting line with malformed sampling tail");
                return None;
            }
        },
    };

    Some(Event::new(bucket.to_string(), value, kind, sampling))
}

/// Splits on the first `:`, rejecting lines containing a second `:` in the
/// remainder.
fn split_once_colon(line: &str) -> Option<(&str, &str)> {
    let idx = line.find(':')?;
    let (bucket, rest) = line.split_at(idx);
    let rest = &rest[1..];
    if rest.contains(':') {
        debug!(line, "rejecting line with multiple ':' separators");
        return None;
    }
    Some((bucket, rest))
}
