//! The aggregator: a single-task state machine owning every counter,
//! gauge, and timer map. All mutation happens on this task; every other
//! component reaches it only by sending an [`Event`] over a channel.

use crate::config::Config;
use crate::metrics::{EVENTS_APPLIED, FLUSHES, FLUSH_DURATION, LAST_FLUSH_LINES};
use crate::model::{Event, MetricKind};
use crate::{sink, timer_stats};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// A gauge's "already flushed" tag. Replaces the original implementation's
/// in-band sentinel value with an explicit discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GaugeState {
    Fresh,
    Flushed,
}

#[derive(Default)]
struct TimerEntry {
    points: Vec<f64>,
    submitted: u64,
}

pub struct Aggregator {
    config: Arc<Config>,
    counters: HashMap<String, f64>,
    gauges: HashMap<String, (f64, GaugeState)>,
    timers: HashMap<String, TimerEntry>,
}

impl Aggregator {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            counters: HashMap::new(),
            gauges: HashMap::new(),
            timers: HashMap::new(),
        }
    }

    fn apply_event(&mut self, event: &Event) {
        match event.kind {
            MetricKind::Counter => {
                let entry = self.counters.entry(event.bucket.clone()).or_insert(0.0);
                *entry += event.value / event.sampling;
                EVENTS_APPLIED.with_label_values(&["counter"]).inc();
            }
            MetricKind::Gauge => {
                self.gauges
                    .insert(event.bucket.clone(), (event.value, GaugeState::Fresh));
                EVENTS_APPLIED.with_label_values(&["gauge"]).inc();
            }
            MetricKind::Timer => {
                let entry = self.timers.entry(event.bucket.clone()).or_default();
                entry.points.push(event.value);
                entry.submitted += (1.0 / event.sampling).round() as u64;
                EVENTS_APPLIED.with_label_values(&["timer"]).inc();
            }
        }
    }

    /// Runs the aggregator's event loop until shutdown, performing a final
    /// best-effort flush before returning.
    pub async fn run(
        mut self,
        mut events_rx: mpsc::Receiver<Event>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let mut flush_tick =
            tokio::time::interval(Duration::from_secs(self.config.flush_interval_secs));
        flush_tick.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    match event {
                        Some(event) => self.apply_event(&event),
                        None => break,
                    }
                }
                _ = flush_tick.tick() => {
                    self.flush().await;
                }
                _ = &mut shutdown_rx => {
                    info!("shutdown signal received, performing final flush");
                    self.flush().await;
                    break;
                }
            }
        }
    }

    async fn flush(&mut self) {
        let started = std::time::Instant::now();
        let now_ts = unix_now();
        let (buffer, line_count) = self.drain_into_buffer(now_ts);

        if buffer.is_empty() {
            FLUSH_DURATION.observe(started.elapsed().as_secs_f64());
            return;
        }

        let deadline = Duration::from_secs(self.config.flush_interval_secs);
        match sink::write_flush(&self.config.graphite_addr, &buffer, deadline).await {
            Ok(()) => {
                debug!(lines = line_count, "flush written to sink");
                FLUSHES.with_label_values(&["ok"]).inc();
                LAST_FLUSH_LINES.set(line_count as i64);
            }
            Err(crate::errors::FlushError::Dial { addr, source }) => {
                warn!(%addr, %source, "flush dial failed, state already reset");
                FLUSHES.with_label_values(&["dial_error"]).inc();
            }
            Err(crate::errors::FlushError::Write(source)) => {
                warn!(%source, "flush write failed or deadline exceeded");
                FLUSHES.with_label_values(&["write_error"]).inc();
            }
        }
        FLUSH_DURATION.observe(started.elapsed().as_secs_f64());
    }

    /// Drains all three maps into one Graphite-line buffer, applying each
    /// kind's reset rule regardless of whether the eventual sink write
    /// succeeds, so state never grows unbounded across flushes.
    fn drain_into_buffer(&mut self, now_ts: u64) -> (Vec<u8>, usize) {
        let mut buffer = String::new();
        let mut count = 0;

        // Counters: emit then remove every present bucket.
        for (bucket, value) in self.counters.drain() {
            let rate = value / self.config.flush_interval_secs as f64;
            let _ = writeln!(
                buffer,
                "{}{} {:.6} {}",
                self.config.prefix_rates, bucket, rate, now_ts
            );
            count += 1;
        }

        // Gauges: emit only Fresh entries, then tag them Flushed.
        for (bucket, (value, state)) in self.gauges.iter_mut() {
            if *state == GaugeState::Flushed {
                continue;
            }
            let _ = writeln!(
                buffer,
                "{}{} {:.6} {}",
                self.config.prefix_gauges, bucket, value, now_ts
            );
            *state = GaugeState::Flushed;
            count += 1;
        }

        // Timers: compute stats for every non-empty bucket, then drain.
        for (bucket, entry) in self.timers.drain() {
            if entry.points.is_empty() {
                continue;
            }
            let lines = timer_stats::compute_timer_lines(
                &entry.points,
                entry.submitted,
                self.config.flush_interval_secs,
                &self.config.percentile_thresholds,
            );
            for line in lines {
                let _ = writeln!(
                    buffer,
                    "{}{}.{} {:.6} {}",
                    self.config.prefix_timers, bucket, line.suffix, line.value, now_ts
                );
            }
            count += 1;
        }

        (buffer.into_bytes(), count)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PercentileThreshold;

    fn test_config() -> Config {
        Config {
            listen_addr: "127.0.0.1:0".to_string(),
            admin_addr: "127.0.0.1:0".to_string(),
            graphite_addr: "127.0.0.1:0".to_string(),
            metrics_addr: "127.0.0.1:0".to_string(),
            flush_interval_secs: 10,
            prefix_rates: "stats.".to_string(),
            prefix_timers: "stats.timers.".to_string(),
            prefix_gauges: "stats.gauges.".to_string(),
            percentile_thresholds: vec![PercentileThreshold::parse("75").unwrap()],
            max_timers_per_s: 1000.0,
        }
    }

    fn apply(agg: &mut Aggregator, bucket: &str, value: f64, kind: MetricKind, sampling: f64) {
        agg.apply_event(&Event::new(bucket.to_string(), value, kind, sampling));
    }

    #[test]
    fn counter_sum_divided_by_interval() {
        let mut agg = Aggregator::new(Arc::new(test_config()));
        apply(&mut agg, "foo", 3.0, MetricKind::Counter, 1.0);
        apply(&mut agg, "foo", 5.0, MetricKind::Counter, 1.0);

        let (buffer, count) = agg.drain_into_buffer(1_700_000_000);
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(count, 1);
        assert_eq!(text, "stats.foo 0.800000 1700000000\n");
    }

    #[test]
    fn sampled_counter_scales_by_inverse_sampling() {
        let mut agg = Aggregator::new(Arc::new(test_config()));
        apply(&mut agg, "foo", 1.0, MetricKind::Counter, 0.1);

        let (buffer, _count) = agg.drain_into_buffer(1_700_000_000);
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text, "stats.foo 1.000000 1700000000\n");
    }

    #[test]
    fn counter_idleness_second_flush_is_empty() {
        let mut agg = Aggregator::new(Arc::new(test_config()));
        apply(&mut agg, "foo", 1.0, MetricKind::Counter, 1.0);
        let (_buffer, count1) = agg.drain_into_buffer(1);
        assert_eq!(count1, 1);

        let (buffer2, count2) = agg.drain_into_buffer(2);
        assert_eq!(count2, 0);
        assert!(buffer2.is_empty());
    }

    #[test]
    fn gauge_emits_once_then_stays_silent_until_next_event() {
        let mut agg = Aggregator::new(Arc::new(test_config()));
        apply(&mut agg, "g1", 5.0, MetricKind::Gauge, 1.0);
        apply(&mut agg, "g1", 7.0, MetricKind::Gauge, 1.0);

        let (buffer, count) = agg.drain_into_buffer(1_700_000_000);
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(count, 1);
        assert_eq!(text, "stats.gauges.g1 7.000000 1700000000\n");

        let (buffer2, count2) = agg.drain_into_buffer(1_700_000_010);
        assert_eq!(count2, 0);
        assert!(buffer2.is_empty());
    }

    #[test]
    fn gauge_re_emits_after_new_event() {
        let mut agg = Aggregator::new(Arc::new(test_config()));
        apply(&mut agg, "g1", 5.0, MetricKind::Gauge, 1.0);
        let _ = agg.drain_into_buffer(1);

        apply(&mut agg, "g1", 9.0, MetricKind::Gauge, 1.0);
        let (buffer, count) = agg.drain_into_buffer(2);
        assert_eq!(count, 1);
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "stats.gauges.g1 9.000000 2\n"
        );
    }

    #[test]
    fn timer_flush_resets_state() {
        let mut agg = Aggregator::new(Arc::new(test_config()));
        for v in [1.0, 2.0, 3.0, 4.0] {
            apply(&mut agg, "t", v, MetricKind::Timer, 1.0);
        }

        let (buffer, count) = agg.drain_into_buffer(1_700_000_000);
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(count, 1);
        assert!(text.contains("stats.timers.t.upper 4.000000"));
        assert!(text.contains("stats.timers.t.lower 1.000000"));
        assert!(text.contains("stats.timers.t.mean 2.500000"));
        assert!(text.contains("stats.timers.t.count 4.000000"));
        assert!(text.contains("stats.timers.t.count_ps 0.400000"));

        assert!(agg.timers.is_empty());
    }

    #[test]
    fn empty_timer_bucket_is_skipped() {
        let mut agg = Aggregator::new(Arc::new(test_config()));
        agg.timers
            .insert("empty".to_string(), TimerEntry::default());
        let (buffer, count) = agg.drain_into_buffer(1);
        assert!(buffer.is_empty());
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn run_flushes_on_shutdown_signal() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let sink_addr = listener.local_addr().unwrap();
        let received = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            use tokio::io::AsyncReadExt;
            socket.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let mut config = test_config();
        config.graphite_addr = sink_addr.to_string();
        config.flush_interval_secs = 3600; // keep the tick from firing mid-test
        let aggregator = Aggregator::new(Arc::new(config));

        let (events_tx, events_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(aggregator.run(events_rx, shutdown_rx));

        events_tx
            .send(Event::new("foo".to_string(), 1.0, MetricKind::Counter, 1.0))
            .await
            .unwrap();
        // Give the aggregator a chance to drain the queued event before the
        // shutdown signal races it in `select!`.
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        drop(events_tx);

        let buf = tokio::time::timeout(Duration::from_secs(2), received)
            .await
            .unwrap()
            .unwrap();
        assert!(String::from_utf8(buf).unwrap().starts_with("stats.foo"));
    }
}
